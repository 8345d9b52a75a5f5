//! Per-connection reader task.
//!
//! The reader never writes to its socket; it publishes frames to the
//! dispatcher and, on malformed input, a protocol-error event so the
//! dispatcher can answer and close. This keeps the dispatcher the sole
//! writer of every connection.

use std::sync::Arc;

use codec::{COMMAND_CONNECT, COMMAND_RECONNECT, pool::TransportMessagePool};
use service::session::SessionId;
use tokio::{net::tcp::OwnedReadHalf, sync::mpsc::Sender};
use tokio_util::sync::CancellationToken;

use super::dispatcher::ClientMessage;

pub async fn run_reader(
    id: SessionId,
    mut reader: OwnedReadHalf,
    pool: Arc<TransportMessagePool>,
    messages: Sender<ClientMessage>,
    disconnects: Sender<SessionId>,
    token: CancellationToken,
) {
    let mut handshaken = false;
    loop {
        let mut frame = pool.obtain();
        let read = tokio::select! {
            // forced close by the dispatcher, which already cleaned up
            _ = token.cancelled() => {
                pool.release(frame);
                return;
            }
            read = frame.read_from(&mut reader) => read,
        };

        match read {
            Ok(()) => {}
            Err(err) if err.is_eof() => {
                pool.release(frame);
                log::info!("socket disconnect: session={}", id);
                let _ = disconnects.send(id).await;
                return;
            }
            Err(err) => {
                log::warn!("frame read failed: session={}, error={}", id, err);
                let command = frame.command();
                pool.release(frame);
                let _ = messages.send(ClientMessage::ProtocolError { id, command }).await;
                return;
            }
        }

        if let Err(err) = frame.verify_payload_crc() {
            log::warn!("frame checksum mismatch: session={}, error={}", id, err);
            let command = frame.command();
            pool.release(frame);
            let _ = messages.send(ClientMessage::ProtocolError { id, command }).await;
            return;
        }

        if !handshaken {
            let command = frame.command();
            if command != COMMAND_CONNECT && command != COMMAND_RECONNECT {
                log::warn!(
                    "first frame is not a handshake: session={}, command={:#06x}",
                    id,
                    command
                );
                pool.release(frame);
                let _ = disconnects.send(id).await;
                return;
            }
            handshaken = true;
        }

        log::trace!(
            "frame received: session={}, command={:#06x}, size={}",
            id,
            frame.command(),
            frame.payload_length()
        );

        if messages.send(ClientMessage::Frame { id, frame }).await.is_err() {
            // dispatcher gone, the server is shutting down
            return;
        }
    }
}
