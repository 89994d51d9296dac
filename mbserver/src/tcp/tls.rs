use std::sync::Arc;

use tokio_rustls::rustls;

/// TLS configuration for a Modbus TLS listener
///
/// Certificates, keys and client authentication are set up by the application in the
/// `rustls::ServerConfig`. The server only performs the handshake with it.
#[derive(Clone)]
pub struct TlsServerConfig {
    inner: Arc<rustls::ServerConfig>,
}

impl TlsServerConfig {
    /// Wrap an already built `rustls` configuration
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self { inner: config }
    }

    pub(crate) fn acceptor(&self) -> tokio_rustls::TlsAcceptor {
        tokio_rustls::TlsAcceptor::from(self.inner.clone())
    }
}

impl From<rustls::ServerConfig> for TlsServerConfig {
    fn from(config: rustls::ServerConfig) -> Self {
        Self::new(Arc::new(config))
    }
}

impl From<Arc<rustls::ServerConfig>> for TlsServerConfig {
    fn from(config: Arc<rustls::ServerConfig>) -> Self {
        Self::new(config)
    }
}

impl std::fmt::Debug for TlsServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsServerConfig")
            .field("alpn_protocols", &self.inner.alpn_protocols)
            .finish()
    }
}
