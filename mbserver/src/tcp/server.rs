use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::common::frame::FramedReader;
use crate::common::phys::PhysLayer;
use crate::error::RequestError;
use crate::serial::FrameErrorPolicy;
use crate::server::task::SessionTask;
use crate::server::ServerContext;

struct SessionTracker {
    max: usize,
    id: u64,
    sessions: BTreeMap<u64, CancellationToken>,
}

type SessionTrackerWrapper = Arc<Mutex<SessionTracker>>;

impl SessionTracker {
    fn new(max: usize) -> SessionTracker {
        Self {
            max,
            id: 0,
            sessions: BTreeMap::new(),
        }
    }

    fn get_next_id(&mut self) -> u64 {
        let ret = self.id;
        self.id += 1;
        ret
    }

    fn wrapped(max: usize) -> SessionTrackerWrapper {
        Arc::new(Mutex::new(Self::new(max)))
    }

    fn add(&mut self, token: CancellationToken) -> u64 {
        if self.sessions.len() >= self.max.max(1) {
            // ids are increasing so the first entry is the oldest session
            if let Some((id, oldest)) = self.sessions.pop_first() {
                tracing::warn!("exceeded max connections, closing oldest session: {}", id);
                oldest.cancel();
            }
        }

        let id = self.get_next_id();
        self.sessions.insert(id, token);
        id
    }

    fn remove(&mut self, id: u64) {
        self.sessions.remove(&id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }
}

pub(crate) enum TransportType {
    Tcp,
    #[cfg(feature = "tls")]
    Tls(tokio_rustls::TlsAcceptor),
}

impl TransportType {
    async fn wrap(&self, socket: TcpStream) -> std::io::Result<PhysLayer> {
        match self {
            TransportType::Tcp => Ok(PhysLayer::new_tcp(socket)),
            #[cfg(feature = "tls")]
            TransportType::Tls(acceptor) => {
                let stream = acceptor.accept(socket).await?;
                Ok(PhysLayer::new_tls(stream))
            }
        }
    }
}

pub(crate) struct ServerTask {
    listener: TcpListener,
    transport: Arc<TransportType>,
    context: ServerContext,
    tracker: SessionTrackerWrapper,
}

impl ServerTask {
    pub(crate) fn new(listener: TcpListener, transport: TransportType, context: ServerContext) -> Self {
        let tracker = SessionTracker::wrapped(context.max_sessions);
        Self {
            listener,
            transport: Arc::new(transport),
            context,
            tracker,
        }
    }

    pub(crate) async fn run(self) {
        loop {
            tokio::select! {
               _ = self.context.token.cancelled() => {
                    tracing::info!("server shutdown");
                    return;
               }
               result = self.listener.accept() => {
                   match result {
                        Err(err) => {
                            tracing::error!("error accepting connection: {}", err);
                            return;
                        }
                        Ok((socket, addr)) => {
                            self.handle(socket, addr).await
                        }
                   }
               }
            }
        }
    }

    async fn handle(&self, socket: TcpStream, addr: SocketAddr) {
        let token = self.context.token.child_token();
        let id = self.tracker.lock().await.add(token.clone());

        tracing::info!("accepted connection {} from: {}", id, addr);

        let transport = self.transport.clone();
        let tracker = self.tracker.clone();
        let mut session = SessionTask::new(
            self.context.queue.clone(),
            FramedReader::tcp(),
            self.context.decode,
            FrameErrorPolicy::Close,
            token.clone(),
        );

        let task = async move {
            let wrapped = tokio::select! {
                _ = token.cancelled() => None,
                result = transport.wrap(socket) => Some(result),
            };
            match wrapped {
                Some(Ok(mut phys)) => match session.run(&mut phys).await {
                    RequestError::Shutdown => tracing::info!("session closed"),
                    RequestError::Io(std::io::ErrorKind::UnexpectedEof) => {
                        tracing::info!("remote closed the connection")
                    }
                    err => tracing::warn!("session error: {}", err),
                },
                Some(Err(err)) => tracing::warn!("TLS handshake failed: {}", err),
                None => tracing::info!("session closed before the handshake completed"),
            }
            tracing::info!("shutdown session: {}", id);
            tracker.lock().await.remove(id);
        };

        self.context
            .tracker
            .spawn(task.instrument(tracing::info_span!("Session", remote = ?addr)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_oldest_session_when_full() {
        let mut tracker = SessionTracker::new(2);
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let third = CancellationToken::new();

        tracker.add(first.clone());
        tracker.add(second.clone());
        assert!(!first.is_cancelled());

        tracker.add(third.clone());
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!third.is_cancelled());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn removed_sessions_free_a_slot() {
        let mut tracker = SessionTracker::new(1);
        let first = CancellationToken::new();
        let id = tracker.add(first.clone());
        tracker.remove(id);

        tracker.add(CancellationToken::new());
        assert!(!first.is_cancelled());
        assert_eq!(tracker.len(), 1);
    }
}
