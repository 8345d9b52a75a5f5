//! Transport layer client: dials the transporter, pumps incoming frames
//! into a channel, and exposes the session operations both roles share.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use codec::{
    COMMAND_ADB_TRANSPORT, COMMAND_CONNECT, COMMAND_CREATE_ROOM, COMMAND_JOIN_ROOM,
    COMMAND_RESPONSE_MASK, PROTOCOL_VERSION,
    frame::TransportFrame,
    payload::{ConnectPayload, ConnectRoomPayload, ConnectRoomResultPayload},
    pool::TransportMessagePool,
};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc::{Receiver, Sender, channel},
};

const FRAME_QUEUE_SIZE: usize = 16;

/// A handshaken session with the transporter. One background task reads
/// frames into an internal queue; everything else writes directly.
pub struct Transporter {
    writer: OwnedWriteHalf,
    frames: Receiver<TransportFrame>,
    pool: Arc<TransportMessagePool>,
    client_id: String,
}

impl Transporter {
    /// Dial the transporter and run the version handshake. The returned
    /// session carries the client id the relay assigned.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("failed to reach the transporter at {address}"))?;
        let (reader, writer) = stream.into_split();

        let pool = Arc::new(TransportMessagePool::new());
        let (sender, frames) = channel(FRAME_QUEUE_SIZE);
        tokio::spawn(run_reader(reader, pool.clone(), sender));

        let mut this = Self {
            writer,
            frames,
            pool,
            client_id: String::new(),
        };
        this.handshake().await?;
        Ok(this)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn handshake(&mut self) -> Result<()> {
        self.send(|frame| {
            frame.set_direct_command(COMMAND_CONNECT);
            frame.set_connect(&ConnectPayload {
                protocol_version: PROTOCOL_VERSION,
            })
        })
        .await?;

        let frame = self.recv().await?;
        let result = expect_response(&frame, COMMAND_CONNECT)
            .and_then(|_| Ok(frame.get_connect_response()?));
        self.release(frame);

        self.client_id = result?.client_id;
        log::info!("connected to the transporter: client={}", self.client_id);
        Ok(())
    }

    pub async fn create_room(&mut self) -> Result<String> {
        self.send(|frame| {
            frame.set_direct_command(COMMAND_CREATE_ROOM);
            frame.set_payload(&[])
        })
        .await?;

        let frame = self.recv().await?;
        let result = expect_response(&frame, COMMAND_CREATE_ROOM)
            .and_then(|_| Ok(frame.get_create_room_response()?));
        self.release(frame);

        let room_id = result?.room_id;
        log::info!("room created: room={}", room_id);
        Ok(room_id)
    }

    /// Join an existing room and wait for the owner's verdict.
    pub async fn join_room(&mut self, room_id: &str) -> Result<()> {
        self.send(|frame| {
            frame.set_direct_command(COMMAND_JOIN_ROOM);
            frame.set_connect_room(&ConnectRoomPayload {
                room_id: room_id.to_string(),
                // the transporter substitutes the assigned client id
                client_id: String::new(),
            })
        })
        .await?;

        let frame = self.recv().await?;
        let result = expect_response(&frame, COMMAND_JOIN_ROOM)
            .and_then(|_| Ok(frame.get_connect_room_result()?));
        self.release(frame);

        if result?.accepted == 0 {
            bail!("join room request denied: {room_id}");
        }
        log::info!("joined room: room={}", room_id);
        Ok(())
    }

    /// Wait for the next direct join request addressed to the room owner.
    pub async fn next_join_request(&mut self) -> Result<ConnectRoomPayload> {
        loop {
            let frame = self.recv().await?;
            if frame.command() == COMMAND_JOIN_ROOM {
                let payload = frame.get_connect_room();
                self.release(frame);
                return Ok(payload?);
            }
            log::warn!(
                "unexpected frame while waiting for a join request: {:#06x}",
                frame.command()
            );
            self.release(frame);
        }
    }

    pub async fn send_join_room_response(&mut self, accepted: bool) -> Result<()> {
        self.send(|frame| {
            frame.set_response_command(COMMAND_JOIN_ROOM);
            frame.set_connect_room_result(&ConnectRoomResultPayload {
                accepted: accepted as u32,
            })
        })
        .await
    }

    pub async fn recv(&mut self) -> Result<TransportFrame> {
        self.frames
            .recv()
            .await
            .ok_or_else(|| anyhow!("transporter connection closed"))
    }

    pub fn release(&self, frame: TransportFrame) {
        self.pool.release(frame);
    }

    async fn send(
        &mut self,
        build: impl FnOnce(&mut TransportFrame) -> Result<(), codec::Error>,
    ) -> Result<()> {
        let mut frame = self.pool.obtain();
        let result = match build(&mut frame) {
            Ok(()) => frame.write_to(&mut self.writer).await,
            Err(err) => Err(err),
        };
        self.pool.release(frame);
        result.map_err(Into::into)
    }

    /// Hand the session over to the forwarding stage: the sink wraps ADB
    /// bytes into relay frames, the stream yields whatever the peer sends.
    pub fn split(self) -> (TransporterSink, FrameStream) {
        (
            TransporterSink {
                writer: self.writer,
                pool: self.pool.clone(),
            },
            FrameStream {
                frames: self.frames,
                pool: self.pool,
            },
        )
    }
}

fn expect_response(frame: &TransportFrame, command: u32) -> Result<()> {
    if frame.is_error() {
        let payload = frame.get_error()?;
        bail!(
            "transporter error {:#06x}: {}",
            payload.error_code,
            payload.error_message
        );
    }
    frame.expect_command(command | COMMAND_RESPONSE_MASK)?;
    Ok(())
}

pub struct TransporterSink {
    writer: OwnedWriteHalf,
    pool: Arc<TransportMessagePool>,
}

impl TransporterSink {
    /// Wrap raw ADB bytes and relay them to the room peer.
    pub async fn send_adb(&mut self, packet: &[u8]) -> Result<()> {
        let mut frame = self.pool.obtain();
        frame.set_direct_command(COMMAND_ADB_TRANSPORT);
        let result = match frame.set_payload(packet) {
            Ok(()) => frame.write_to(&mut self.writer).await,
            Err(err) => Err(err),
        };
        self.pool.release(frame);
        result.map_err(Into::into)
    }
}

pub struct FrameStream {
    frames: Receiver<TransportFrame>,
    pool: Arc<TransportMessagePool>,
}

impl FrameStream {
    /// `None` once the transporter connection is gone.
    pub async fn recv(&mut self) -> Option<TransportFrame> {
        self.frames.recv().await
    }

    pub fn release(&self, frame: TransportFrame) {
        self.pool.release(frame);
    }
}

async fn run_reader(
    mut reader: OwnedReadHalf,
    pool: Arc<TransportMessagePool>,
    sender: Sender<TransportFrame>,
) {
    loop {
        let mut frame = pool.obtain();
        match frame.read_from(&mut reader).await {
            Ok(()) => {}
            Err(err) => {
                if !err.is_eof() {
                    log::error!("transporter read failed: {}", err);
                }
                pool.release(frame);
                // dropping the sender closes the queue for the consumer
                return;
            }
        }
        if let Err(err) = frame.verify_payload_crc() {
            log::error!("transporter frame checksum mismatch: {}", err);
            pool.release(frame);
            return;
        }
        if sender.send(frame).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{
        ERROR_ROOM_NOT_FOUND,
        payload::{ConnectResponsePayload, CreateRoomResponsePayload, ErrorPayload},
    };
    use tokio::net::TcpListener;

    /// A scripted transporter: accepts one connection and answers the
    /// handshake, then runs `script` on the established stream.
    async fn scripted_server<F, Fut>(script: F) -> Result<std::net::SocketAddr>
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = TransportFrame::new();
            frame.read_from(&mut stream).await.unwrap();
            assert_eq!(frame.command(), COMMAND_CONNECT);
            assert_eq!(
                frame.get_connect().unwrap().protocol_version,
                PROTOCOL_VERSION
            );
            frame.set_response_command(COMMAND_CONNECT);
            frame
                .set_connect_response(&ConnectResponsePayload {
                    client_id: "ABCD1234".to_string(),
                })
                .unwrap();
            frame.write_to(&mut stream).await.unwrap();
            script(stream).await.unwrap();
        });
        Ok(addr)
    }

    #[tokio::test]
    async fn test_handshake() -> Result<()> {
        let addr = scripted_server(|_stream| async { Ok(()) }).await?;
        let transporter = Transporter::connect(&addr.to_string()).await?;
        assert_eq!(transporter.client_id(), "ABCD1234");
        Ok(())
    }

    #[tokio::test]
    async fn test_create_room() -> Result<()> {
        let addr = scripted_server(|mut stream| async move {
            let mut frame = TransportFrame::new();
            frame.read_from(&mut stream).await?;
            assert_eq!(frame.command(), COMMAND_CREATE_ROOM);
            frame.set_response_command(COMMAND_CREATE_ROOM);
            frame.set_create_room_response(&CreateRoomResponsePayload {
                room_id: "EFGH5678".to_string(),
            })?;
            frame.write_to(&mut stream).await?;
            Ok(())
        })
        .await?;

        let mut transporter = Transporter::connect(&addr.to_string()).await?;
        assert_eq!(transporter.create_room().await?, "EFGH5678");
        Ok(())
    }

    #[tokio::test]
    async fn test_join_room_error_surfaces() -> Result<()> {
        let addr = scripted_server(|mut stream| async move {
            let mut frame = TransportFrame::new();
            frame.read_from(&mut stream).await?;
            assert_eq!(frame.command(), COMMAND_JOIN_ROOM);
            frame.set_error_response_command(COMMAND_JOIN_ROOM);
            frame.set_error(&ErrorPayload {
                error_code: ERROR_ROOM_NOT_FOUND,
                error_message: "Room not found with this id: ZZZZ0000".to_string(),
            })?;
            frame.write_to(&mut stream).await?;
            Ok(())
        })
        .await?;

        let mut transporter = Transporter::connect(&addr.to_string()).await?;
        let err = transporter.join_room("ZZZZ0000").await.unwrap_err();
        assert!(err.to_string().contains("Room not found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_join_room_denied() -> Result<()> {
        let addr = scripted_server(|mut stream| async move {
            let mut frame = TransportFrame::new();
            frame.read_from(&mut stream).await?;
            frame.set_response_command(COMMAND_JOIN_ROOM);
            frame.set_connect_room_result(&ConnectRoomResultPayload { accepted: 0 })?;
            frame.write_to(&mut stream).await?;
            Ok(())
        })
        .await?;

        let mut transporter = Transporter::connect(&addr.to_string()).await?;
        let err = transporter.join_room("EFGH5678").await.unwrap_err();
        assert!(err.to_string().contains("denied"));
        Ok(())
    }
}
