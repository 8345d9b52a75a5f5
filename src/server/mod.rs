pub mod connection;
pub mod dispatcher;

use std::sync::Arc;

use anyhow::Result;
use codec::pool::TransportMessagePool;
use service::session::SessionId;
use tokio::{net::TcpListener, sync::mpsc::channel};
use tokio_util::sync::CancellationToken;

use self::dispatcher::{ClientMessage, Dispatcher};

/// Frames from every reader funnel through one queue into the dispatcher.
const MESSAGE_QUEUE_SIZE: usize = 128;
const DISCONNECT_QUEUE_SIZE: usize = 32;

/// Accept connections and feed the dispatcher until cancellation. One
/// reader task per connection publishes frames; the dispatcher is the
/// single owner of the room table and of every write after the accept.
///
/// An error from the dispatcher is an invariant breach and takes the
/// whole server down with it.
pub async fn serve(listener: TcpListener, token: CancellationToken) -> Result<()> {
    let pool = Arc::new(TransportMessagePool::new());
    let (messages, message_queue) = channel(MESSAGE_QUEUE_SIZE);
    let (disconnects, disconnect_queue) = channel(DISCONNECT_QUEUE_SIZE);

    let dispatcher = Dispatcher::new(pool.clone());
    let mut dispatcher_task =
        tokio::spawn(dispatcher.run(message_queue, disconnect_queue, token.clone()));

    let mut next_session = 0u64;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = &mut dispatcher_task => {
                // while we hold the queue senders the dispatcher only
                // exits on its own for an invariant breach
                return result?;
            }
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::warn!("accept failed: {}", err);
                        continue;
                    }
                };

                next_session += 1;
                let id = SessionId(next_session);
                log::info!("socket accept: session={}, addr={}", id, addr);

                let (read_half, write_half) = socket.into_split();
                let session_token = token.child_token();
                if messages
                    .send(ClientMessage::Accepted {
                        id,
                        writer: write_half,
                        cancel: session_token.clone(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }

                tokio::spawn(connection::run_reader(
                    id,
                    read_half,
                    pool.clone(),
                    messages.clone(),
                    disconnects.clone(),
                    session_token,
                ));
            }
        }
    }

    // closing both queues lets the dispatcher drain and exit
    drop(messages);
    drop(disconnects);
    dispatcher_task.await??;
    Ok(())
}
