//! Plumbing between an established transporter session and a local byte
//! pipe (the guest's loopback ADB connection or the owner's device
//! transport).
//!
//! One pump task turns incoming `AdbTransport` frames into payload bytes
//! for the active pipe; the relay functions read the pipe and wrap what
//! they find. The payload receiver survives a dying pipe so the next
//! connection can reuse it.

use anyhow::{Context, Result};
use bytes::Bytes;
use codec::{COMMAND_ADB_TRANSPORT, adb::AdbPacket};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::mpsc::{Receiver, Sender},
};
use tokio_util::sync::CancellationToken;

use crate::transporter::{FrameStream, TransporterSink};

pub const PAYLOAD_QUEUE_SIZE: usize = 16;

/// Why a relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    /// The local pipe closed; the caller may accept or open another one.
    LocalClosed,
    /// The transporter session is gone; nothing left to relay to.
    RelayClosed,
}

/// Turn incoming `AdbTransport` frames into payload bytes for whichever
/// pipe is currently active. Runs until the transporter connection dies.
pub async fn pump_frames(mut frames: FrameStream, payloads: Sender<Bytes>) {
    while let Some(frame) = frames.recv().await {
        if frame.command() == COMMAND_ADB_TRANSPORT {
            let bytes = Bytes::copy_from_slice(frame.payload());
            frames.release(frame);
            if payloads.send(bytes).await.is_err() {
                return;
            }
        } else {
            log::warn!(
                "unexpected frame from the transporter: {:#06x}",
                frame.command()
            );
            frames.release(frame);
        }
    }
}

/// Relay packet-framed ADB traffic: every message read off the pipe is one
/// validated ADB packet, wrapped whole into a relay frame. Used by the
/// guest role, where the local ADB server speaks the device protocol.
pub async fn relay_packets(
    mut reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    sink: &mut TransporterSink,
    mut payloads: Receiver<Bytes>,
) -> Result<(Receiver<Bytes>, PipeEnd)> {
    // leftovers addressed to a previous pipe
    while payloads.try_recv().is_ok() {}

    let guard = CancellationToken::new();
    let writer_task = tokio::spawn(write_payloads(writer, payloads, guard.clone()));

    // one reusable packet buffer per connection
    let mut packet = AdbPacket::new();
    let mut end = PipeEnd::LocalClosed;
    loop {
        tokio::select! {
            _ = guard.cancelled() => {
                end = PipeEnd::RelayClosed;
                break;
            }
            read = packet.read_from(&mut reader) => {
                if let Err(err) = read {
                    if !err.is_eof() {
                        log::error!("local ADB read failed: {}", err);
                    }
                    break;
                }
                log::trace!(
                    "forwarding {}: size={}",
                    packet.command_str(),
                    packet.data_length()
                );
                if sink.send_adb(packet.as_bytes()).await.is_err() {
                    end = PipeEnd::RelayClosed;
                    break;
                }
            }
        }
    }

    guard.cancel();
    let payloads = writer_task.await.context("payload writer task failed")?;
    Ok((payloads, end))
}

/// Relay unframed bytes: whatever the pipe yields goes out as an opaque
/// chunk. Used by the owner role, where the smart socket transport is a
/// raw pipe to the device.
pub async fn relay_raw(
    mut reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    sink: &mut TransporterSink,
    mut payloads: Receiver<Bytes>,
) -> Result<(Receiver<Bytes>, PipeEnd)> {
    while payloads.try_recv().is_ok() {}

    let guard = CancellationToken::new();
    let writer_task = tokio::spawn(write_payloads(writer, payloads, guard.clone()));

    let mut buf = vec![0u8; codec::adb::MAX_ADB_PAYLOAD];
    let mut end = PipeEnd::LocalClosed;
    loop {
        tokio::select! {
            _ = guard.cancelled() => {
                end = PipeEnd::RelayClosed;
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(size) => {
                    if sink.send_adb(&buf[..size]).await.is_err() {
                        end = PipeEnd::RelayClosed;
                        break;
                    }
                }
                Err(err) => {
                    log::error!("device pipe read failed: {}", err);
                    break;
                }
            }
        }
    }

    guard.cancel();
    let payloads = writer_task.await.context("payload writer task failed")?;
    Ok((payloads, end))
}

/// Drain the payload queue into the pipe's write half until cancelled.
/// Returns the receiver so the next pipe can take over.
async fn write_payloads(
    mut writer: OwnedWriteHalf,
    mut payloads: Receiver<Bytes>,
    token: CancellationToken,
) -> Receiver<Bytes> {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            payload = payloads.recv() => match payload {
                Some(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                None => {
                    // the frame pump is gone, take the read loop with us
                    token.cancel();
                    break;
                }
            }
        }
    }
    payloads
}
