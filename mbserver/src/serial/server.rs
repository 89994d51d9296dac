use crate::common::frame::FramedReader;
use crate::common::phys::PhysLayer;
use crate::error::RequestError;
use crate::serial::SerialSettings;
use crate::server::task::SessionTask;
use crate::server::ServerContext;

pub(crate) struct RtuServerTask {
    phys: PhysLayer,
    session: SessionTask,
}

impl RtuServerTask {
    pub(crate) fn new(
        port: tokio_serial::SerialStream,
        settings: SerialSettings,
        context: ServerContext,
    ) -> Self {
        Self {
            phys: PhysLayer::new_serial(port),
            session: SessionTask::new(
                context.queue,
                FramedReader::rtu(),
                context.decode,
                settings.frame_error_policy,
                context.token.child_token(),
            ),
        }
    }

    /// Serve the port until shutdown or failure, the port is closed on return
    pub(crate) async fn run(mut self) {
        tracing::info!("opened port");
        match self.session.run(&mut self.phys).await {
            RequestError::Shutdown => tracing::info!("port closed on shutdown"),
            err => tracing::warn!("closing port: {}", err),
        }
    }
}
