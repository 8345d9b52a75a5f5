//! Client for the host ADB server's smart socket, by default on
//! `127.0.0.1:5037`.

use anyhow::{Context, Result, bail};
use codec::smart_socket::{
    Device, HostStatus, encode_request, parse_device_list, parse_hex_length, parse_status,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub struct SmartSocket {
    address: String,
}

impl SmartSocket {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }

    /// List the devices known to the local ADB server.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        let mut stream = self.dial("host:devices").await?;
        let body = read_block(&mut stream).await?;
        Ok(parse_device_list(&body))
    }

    /// Open a byte pipe to the device behind `serial`. After the `OKAY`
    /// the same connection talks straight to the device, so the stream is
    /// handed to the caller.
    pub async fn transport(&self, serial: &str) -> Result<TcpStream> {
        self.dial(&format!("host:transport:{serial}")).await
    }

    async fn dial(&self, command: &str) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("failed to reach the ADB server at {}", self.address))?;
        stream.write_all(&encode_request(command)?).await?;

        match read_status(&mut stream).await? {
            HostStatus::Okay => Ok(stream),
            HostStatus::Fail => {
                let reason = read_block(&mut stream).await?;
                bail!(
                    "ADB server rejected `{}`: {}",
                    command,
                    String::from_utf8_lossy(&reason)
                );
            }
        }
    }
}

async fn read_status(stream: &mut TcpStream) -> Result<HostStatus> {
    let mut raw = [0u8; 4];
    stream.read_exact(&mut raw).await?;
    Ok(parse_status(&raw)?)
}

/// Read one hex-length-prefixed block.
async fn read_block(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut raw = [0u8; 4];
    stream.read_exact(&mut raw).await?;
    let length = parse_hex_length(&raw)?;
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;
    Ok(body)
}
