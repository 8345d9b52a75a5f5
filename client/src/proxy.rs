//! Impersonates an ADB device on a loopback listener so the local ADB
//! server can `adb connect` to the remote device.
//!
//! One connection is served at a time, the way a TCP device behaves. A
//! failed connection is logged and the listener accepts the next one; a
//! dead transporter session ends the proxy.

use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use codec::adb::{ADB_COMMAND_CONNECT, AdbPacket, MAX_ADB_PAYLOAD};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::mpsc::channel,
};

use crate::{
    bridge::{self, PAYLOAD_QUEUE_SIZE, PipeEnd},
    transporter::{FrameStream, TransporterSink},
};

pub struct AdbProxy {
    listener: TcpListener,
    room_id: String,
}

impl AdbProxy {
    pub async fn bind(listen: SocketAddr, room_id: &str) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind the device listener on {listen}"))?;
        Ok(Self {
            listener,
            room_id: room_id.to_string(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loopback connections and bridge them to the transporter
    /// until the relay session dies.
    pub async fn run(self, mut sink: TransporterSink, frames: FrameStream) -> Result<()> {
        let (payloads, mut payload_rx) = channel(PAYLOAD_QUEUE_SIZE);
        tokio::spawn(bridge::pump_frames(frames, payloads));

        log::info!(
            "impersonating device on {}, waiting for the local ADB server",
            self.listener.local_addr()?
        );
        loop {
            let (mut stream, addr) = self.listener.accept().await?;
            log::info!("local ADB server connected: addr={}", addr);

            if let Err(err) = accept_handshake(&mut stream, &self.room_id).await {
                log::error!("device handshake failed: {}", err);
                continue;
            }

            let (reader, writer) = stream.into_split();
            let (rx, end) = bridge::relay_packets(reader, writer, &mut sink, payload_rx).await?;
            payload_rx = rx;
            match end {
                PipeEnd::LocalClosed => {
                    log::info!("local ADB server disconnected, accepting a new connection");
                }
                PipeEnd::RelayClosed => bail!("transporter connection closed"),
            }
        }
    }
}

/// The device side of the ADB handshake: expect a `CNXN`, echo the
/// client's version and message size limit, and present ourselves as a
/// remote wrapper device.
async fn accept_handshake<S>(stream: &mut S, room_id: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut packet = AdbPacket::new();
    packet.read_from(stream).await?;
    if packet.command() != ADB_COMMAND_CONNECT {
        bail!(
            "unexpected command from the local ADB server: {}",
            packet.command_str()
        );
    }

    let version = packet.arg1();
    let max_payload = packet.arg2();
    log::info!(
        "local ADB server hello: version={:#x}, max_payload={}",
        version,
        max_payload
    );
    // the inbound buffer is fixed size, a peer allowed to send more would
    // overrun it
    if max_payload as usize > MAX_ADB_PAYLOAD {
        bail!("local ADB server max payload too large: {max_payload}");
    }

    let banner = format!("device:wrapper-remote-{room_id}");
    packet.set(ADB_COMMAND_CONNECT, version, max_payload, banner.as_bytes())?;
    packet.write_to(stream).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_handshake() -> Result<()> {
        let (mut local, mut remote) = tokio::io::duplex(0x4000);

        let handshake = tokio::spawn(async move {
            accept_handshake(&mut remote, "EFGH5678").await.unwrap();
        });

        let mut packet = AdbPacket::new();
        packet.set(ADB_COMMAND_CONNECT, 0x0100_0000, 0x1000, b"host::")?;
        packet.write_to(&mut local).await?;

        let mut reply = AdbPacket::new();
        reply.read_from(&mut local).await?;
        assert_eq!(reply.command(), ADB_COMMAND_CONNECT);
        assert_eq!(reply.arg1(), 0x0100_0000);
        assert_eq!(reply.arg2(), 0x1000);
        assert_eq!(reply.data(), b"device:wrapper-remote-EFGH5678");

        handshake.await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_cnxn() -> Result<()> {
        let (mut local, mut remote) = tokio::io::duplex(0x4000);

        let handshake =
            tokio::spawn(async move { accept_handshake(&mut remote, "EFGH5678").await });

        let mut packet = AdbPacket::new();
        packet.set(codec::adb::ADB_COMMAND_OPEN, 1, 0, b"shell:")?;
        packet.write_to(&mut local).await?;

        let err = handshake.await?.unwrap_err();
        assert!(err.to_string().contains("unexpected command"));
        Ok(())
    }

    #[tokio::test]
    async fn test_handshake_rejects_oversized_max_payload() -> Result<()> {
        let (mut local, mut remote) = tokio::io::duplex(0x4000);

        let handshake =
            tokio::spawn(async move { accept_handshake(&mut remote, "EFGH5678").await });

        let mut packet = AdbPacket::new();
        packet.set(ADB_COMMAND_CONNECT, 0x0100_0000, 0x10000, b"host::")?;
        packet.write_to(&mut local).await?;

        let err = handshake.await?.unwrap_err();
        assert!(err.to_string().contains("max payload too large"));
        Ok(())
    }
}
