use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::common::frame::{Frame, FramedReader};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::serial::FrameErrorPolicy;
use crate::server::memory::Memory;
use crate::server::Server;

pub(crate) type Transaction = Box<dyn FnOnce(&mut Memory) + Send>;

/// A decoded frame and the way back to the session it arrived on
pub(crate) struct Request {
    pub(crate) frame: Frame,
    pub(crate) reply: oneshot::Sender<Frame>,
}

pub(crate) enum Message {
    Request(Request),
    Transaction(Transaction),
}

/// Sole owner of the memory and function table once the server is spawned
///
/// Every request and transaction is applied one at a time, in queue order.
pub(crate) async fn run_consumer(
    mut server: Server,
    mut queue: mpsc::Receiver<Message>,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            Message::Request(request) => {
                let reply = server.handle(&request.frame);
                // the session may have closed while the request was queued
                if request.reply.send(reply).is_err() {
                    tracing::debug!("session closed before the reply was ready");
                }
            }
            Message::Transaction(transaction) => transaction(server.memory_mut()),
        }
    }

    tracing::info!("request processing stopped");
}

/// Reads requests from one stream and writes back the replies, one at a time
pub(crate) struct SessionTask {
    queue: mpsc::Sender<Message>,
    reader: FramedReader,
    decode: DecodeLevel,
    policy: FrameErrorPolicy,
    token: CancellationToken,
}

impl SessionTask {
    pub(crate) fn new(
        queue: mpsc::Sender<Message>,
        reader: FramedReader,
        decode: DecodeLevel,
        policy: FrameErrorPolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            reader,
            decode,
            policy,
            token,
        }
    }

    /// Run until the stream fails or the session is cancelled
    pub(crate) async fn run(&mut self, io: &mut PhysLayer) -> RequestError {
        loop {
            if let Err(err) = self.run_one(io).await {
                return err;
            }
        }
    }

    async fn run_one(&mut self, io: &mut PhysLayer) -> Result<(), RequestError> {
        let result = tokio::select! {
            _ = self.token.cancelled() => return Err(RequestError::Shutdown),
            result = self.reader.next_frame(io, self.decode) => result,
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(RequestError::BadFrame(err)) if self.policy == FrameErrorPolicy::Discard => {
                tracing::warn!("discarding buffered bytes: {}", err);
                self.reader.discard();
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let (tx, rx) = oneshot::channel();
        let request = Message::Request(Request { frame, reply: tx });

        tokio::select! {
            _ = self.token.cancelled() => return Err(RequestError::Shutdown),
            result = self.queue.send(request) => result.map_err(|_| RequestError::Shutdown)?,
        }

        let reply = tokio::select! {
            _ = self.token.cancelled() => return Err(RequestError::Shutdown),
            reply = rx => reply.map_err(|_| RequestError::Shutdown)?,
        };

        if self.decode.frame.enabled() {
            tracing::info!("TX - {}", reply.display(self.decode.frame));
        }

        // a peer that stops reading must not keep the session alive past shutdown
        let bytes = reply.to_bytes();
        tokio::select! {
            _ = self.token.cancelled() => Err(RequestError::Shutdown),
            result = io.write(&bytes, self.decode.physical) => Ok(result?),
        }
    }
}
