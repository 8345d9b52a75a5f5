//! Owner role: create a room, approve a guest, then bridge the shared
//! device's transport pipe to the transporter.

use anyhow::{Result, bail};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::channel,
};

use crate::{
    bridge::{self, PAYLOAD_QUEUE_SIZE, PipeEnd},
    config::Config,
    smart_socket::SmartSocket,
    transporter::Transporter,
};

pub async fn run(config: &Config, serial: &str, auto_accept: bool) -> Result<()> {
    let smart_socket = SmartSocket::new(&config.adb_server_address);
    ensure_device_present(&smart_socket, serial).await?;

    let mut transporter = Transporter::connect(&config.transporter_address).await?;
    let room_id = transporter.create_room().await?;
    println!("Your room id: {room_id}");
    println!("Share it with the operator over a separate channel.");

    // serve join requests until one is accepted
    loop {
        let request = transporter.next_join_request().await?;
        let accepted = if auto_accept {
            true
        } else {
            prompt_join(&request.client_id).await?
        };
        transporter.send_join_room_response(accepted).await?;
        if accepted {
            log::info!("guest accepted: client={}", request.client_id);
            break;
        }
        log::info!("guest rejected: client={}", request.client_id);
    }

    forward(transporter, &smart_socket, serial).await
}

async fn ensure_device_present(smart_socket: &SmartSocket, serial: &str) -> Result<()> {
    let devices = smart_socket.devices().await?;
    if devices.iter().any(|device| device.serial == serial) {
        return Ok(());
    }
    let known: Vec<&str> = devices.iter().map(|device| device.serial.as_str()).collect();
    bail!(
        "device {} is not known to the local ADB server (known: {})",
        serial,
        known.join(", ")
    );
}

async fn prompt_join(client_id: &str) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Accept the join request from {client_id}? (y/n)");
        let Some(line) = lines.next_line().await? else {
            return Ok(false);
        };
        match line.trim() {
            "y" | "Y" => return Ok(true),
            "n" | "N" => return Ok(false),
            _ => println!("Only y or n are accepted."),
        }
    }
}

/// Bridge the device transport pipe and the transporter session. A
/// dropped pipe is reopened against the same device; a dead transporter
/// session ends the share.
async fn forward(transporter: Transporter, smart_socket: &SmartSocket, serial: &str) -> Result<()> {
    let (mut sink, frames) = transporter.split();
    let (payloads, mut payload_rx) = channel(PAYLOAD_QUEUE_SIZE);
    tokio::spawn(bridge::pump_frames(frames, payloads));

    let mut pipe = smart_socket.transport(serial).await?;
    log::info!("device transport open: serial={}", serial);
    loop {
        let (reader, writer) = pipe.into_split();
        let (rx, end) = bridge::relay_raw(reader, writer, &mut sink, payload_rx).await?;
        payload_rx = rx;
        match end {
            PipeEnd::RelayClosed => bail!("transporter connection closed"),
            PipeEnd::LocalClosed => {
                log::warn!("device transport dropped, reopening: serial={}", serial);
                pipe = smart_socket.transport(serial).await?;
            }
        }
    }
}
