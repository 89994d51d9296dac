use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::common::frame::Frame;
use crate::common::phys::format_bytes;
use crate::decode::{AppDecodeLevel, DecodeLevel};
use crate::error::ServerError;
use crate::exception::ExceptionCode;

pub(crate) mod function;
pub(crate) mod handlers;
pub(crate) mod memory;
pub(crate) mod task;

pub use function::{code, FunctionHandler, FunctionTable};
pub use memory::Memory;

use task::Message;

/// Settings that apply to every transport of a server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    /// Number of decoded requests that may wait for processing before sessions stop reading
    pub request_queue_size: usize,
    /// Maximum number of concurrent TCP/TLS sessions per listener, the oldest is closed when exceeded
    pub max_sessions: usize,
    /// Decode levels used for logging
    pub decode: DecodeLevel,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            request_queue_size: 64,
            max_sessions: 100,
            decode: DecodeLevel::default(),
        }
    }
}

/// A Modbus server before it starts serving
///
/// The memory and the function table are set up here and then moved into the
/// processing task by [`Server::spawn`].
#[derive(Debug)]
pub struct Server {
    memory: Memory,
    functions: FunctionTable,
    settings: ServerSettings,
}

impl Server {
    /// Server with cleared memory, the default function table and default settings
    pub fn new() -> Self {
        Self::with_settings(ServerSettings::default())
    }

    /// Server with cleared memory and the default function table
    pub fn with_settings(settings: ServerSettings) -> Self {
        Self {
            memory: Memory::new(),
            functions: FunctionTable::new(),
            settings,
        }
    }

    /// Settings the server was created with
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Register memory
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Mutable register memory
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Function table used to answer requests
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Override the behavior of a function code, returning the handler it replaces
    pub fn register_function_handler<F>(&mut self, function: u8, handler: F) -> Option<FunctionHandler>
    where
        F: Fn(&mut Memory, &Frame) -> Result<Vec<u8>, ExceptionCode> + Send + Sync + 'static,
    {
        self.functions.insert(function, handler)
    }

    /// Stop answering a function code, requests for it get `IllegalFunction`
    pub fn unregister_function_handler(&mut self, function: u8) -> Option<FunctionHandler> {
        self.functions.remove(function)
    }

    /// Process one request and build its reply
    ///
    /// The reply keeps the header of the request. If the handler fails, or no handler is
    /// registered, it is an exception reply.
    pub fn handle(&mut self, request: &Frame) -> Frame {
        let level = self.settings.decode.app;
        if level.enabled() {
            tracing::info!(
                "PDU RX - {}",
                PduDisplay::new(level, request.function(), request.data())
            );
        }

        let mut reply = request.copy();
        match self.functions.execute(&mut self.memory, request) {
            Ok(data) => {
                reply.set_data(data);
                if level.enabled() {
                    tracing::info!(
                        "PDU TX - {}",
                        PduDisplay::new(level, reply.function(), reply.data())
                    );
                }
            }
            Err(ex) => {
                if level.enabled() {
                    tracing::warn!(
                        "PDU TX - Modbus exception {} ({:#04X}) for {}",
                        ex,
                        ex.value(),
                        function::name(request.function())
                    );
                }
                reply.set_exception(ex);
            }
        }
        reply
    }

    /// Start the task that processes requests. Must be called from within a Tokio runtime.
    ///
    /// Transports are added to the returned handle.
    pub fn spawn(self) -> ServerHandle {
        let (tx, rx) = mpsc::channel(self.settings.request_queue_size.max(1));
        let settings = self.settings;
        let consumer_token = CancellationToken::new();
        let consumer = TaskTracker::new();
        consumer.spawn(
            task::run_consumer(self, rx, consumer_token.clone())
                .instrument(tracing::info_span!("Modbus-Server")),
        );
        consumer.close();

        ServerHandle {
            context: ServerContext {
                queue: tx,
                decode: settings.decode,
                max_sessions: settings.max_sessions,
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
            consumer_token,
            consumer,
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// What every transport task needs to feed the processing task
#[derive(Clone)]
pub(crate) struct ServerContext {
    pub(crate) queue: mpsc::Sender<Message>,
    pub(crate) decode: DecodeLevel,
    pub(crate) max_sessions: usize,
    /// cancels every listener and session
    pub(crate) token: CancellationToken,
    /// tracks every listener and session
    pub(crate) tracker: TaskTracker,
}

/// Handle to a running server
///
/// Dropping the handle stops the server without waiting, use [`ServerHandle::shutdown`]
/// to wait until every transport has stopped.
pub struct ServerHandle {
    context: ServerContext,
    consumer_token: CancellationToken,
    consumer: TaskTracker,
}

impl ServerHandle {
    fn check_running(&self) -> Result<(), ServerError> {
        if self.context.token.is_cancelled() {
            return Err(ServerError::Shutdown);
        }
        Ok(())
    }

    /// Accept Modbus TCP connections on an address, returning the bound address
    pub async fn listen_tcp(&self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        self.check_running()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ServerError::Bind)?;
        let local = listener.local_addr().map_err(ServerError::Bind)?;

        let task = crate::tcp::server::ServerTask::new(
            listener,
            crate::tcp::server::TransportType::Tcp,
            self.context.clone(),
        );
        self.context.tracker.spawn(
            task.run()
                .instrument(tracing::info_span!("Modbus-Server-TCP", listen = ?local)),
        );

        Ok(local)
    }

    /// Accept Modbus TCP connections secured with TLS, returning the bound address
    #[cfg(feature = "tls")]
    pub async fn listen_tls(
        &self,
        addr: SocketAddr,
        config: crate::tcp::tls::TlsServerConfig,
    ) -> Result<SocketAddr, ServerError> {
        self.check_running()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ServerError::Bind)?;
        let local = listener.local_addr().map_err(ServerError::Bind)?;

        let task = crate::tcp::server::ServerTask::new(
            listener,
            crate::tcp::server::TransportType::Tls(config.acceptor()),
            self.context.clone(),
        );
        self.context.tracker.spawn(
            task.run()
                .instrument(tracing::info_span!("Modbus-Server-TLS", listen = ?local)),
        );

        Ok(local)
    }

    /// Serve requests arriving on a serial port, returning the name of the port
    ///
    /// The port is opened before this returns. Must be called from within a Tokio runtime.
    #[cfg(feature = "serial")]
    pub fn listen_rtu(
        &self,
        path: &str,
        settings: crate::serial::SerialSettings,
    ) -> Result<String, ServerError> {
        self.check_running()?;
        let port = crate::serial::open(path, settings)
            .map_err(|err| ServerError::SerialOpen(err.into()))?;

        let task = crate::serial::server::RtuServerTask::new(port, settings, self.context.clone());
        self.context.tracker.spawn(
            task.run()
                .instrument(tracing::info_span!("Modbus-Server-RTU", port = ?path)),
        );

        Ok(path.to_string())
    }

    /// Run a closure against the memory in sequence with the requests received from clients
    ///
    /// The closure never observes a partially applied request.
    pub async fn transaction<F, R>(&self, transaction: F) -> Result<R, ServerError>
    where
        F: FnOnce(&mut Memory) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let message = Message::Transaction(Box::new(move |memory| {
            // the caller may have given up waiting
            let _ = tx.send(transaction(memory));
        }));

        self.context
            .queue
            .send(message)
            .await
            .map_err(|_| ServerError::Shutdown)?;
        rx.await.map_err(|_| ServerError::Shutdown)
    }

    /// Stop accepting connections, close every session and port, then stop processing
    ///
    /// Returns once every task has exited.
    pub async fn shutdown(self) {
        self.context.token.cancel();
        self.context.tracker.close();
        self.context.tracker.wait().await;
        tracing::info!("all transports stopped");

        self.consumer_token.cancel();
        self.consumer.wait().await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.context.token.cancel();
        self.consumer_token.cancel();
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("tasks", &self.context.tracker.len())
            .field("shutdown", &self.context.token.is_cancelled())
            .finish()
    }
}

struct PduDisplay<'a> {
    level: AppDecodeLevel,
    function: u8,
    data: &'a [u8],
}

impl<'a> PduDisplay<'a> {
    fn new(level: AppDecodeLevel, function: u8, data: &'a [u8]) -> Self {
        Self {
            level,
            function,
            data,
        }
    }
}

impl std::fmt::Display for PduDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#04X})", function::name(self.function), self.function)?;
        if self.level.data_headers() {
            write!(f, " payload len: {}", self.data.len())?;
        }
        if self.level.data_values() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}
