//! The host ADB server's "smart socket" text protocol.
//!
//! Requests are four ASCII hex digits of length followed by the command
//! text; replies lead with `OKAY` or `FAIL`. Only the byte-level framing
//! lives here, so it can be exercised on literal buffers; connection
//! handling belongs to the caller.

use crate::Error;

pub const STATUS_OKAY: &[u8; 4] = b"OKAY";
pub const STATUS_FAIL: &[u8; 4] = b"FAIL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Okay,
    Fail,
}

/// One row of the `host:devices` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    pub state: String,
}

/// Frame a smart socket request, e.g. `0012host:transport:SERIAL`.
pub fn encode_request(command: &str) -> Result<Vec<u8>, Error> {
    if command.len() > 0xFFFF {
        return Err(Error::PayloadOverflow {
            length: command.len() as u32,
        });
    }
    let mut request = Vec::with_capacity(command.len() + 4);
    request.extend_from_slice(format!("{:04X}", command.len()).as_bytes());
    request.extend_from_slice(command.as_bytes());
    Ok(request)
}

pub fn parse_status(raw: &[u8; 4]) -> Result<HostStatus, Error> {
    match raw {
        STATUS_OKAY => Ok(HostStatus::Okay),
        STATUS_FAIL => Ok(HostStatus::Fail),
        other => Err(Error::InvalidStatus(*other)),
    }
}

pub fn parse_hex_length(raw: &[u8; 4]) -> Result<usize, Error> {
    let text = std::str::from_utf8(raw)?;
    usize::from_str_radix(text, 16).map_err(|_| Error::InvalidHexLength(*raw))
}

/// Parse the body of a `host:devices` reply: one `<serial>\t<state>` line
/// per device.
pub fn parse_device_list(body: &[u8]) -> Vec<Device> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| {
            let (serial, state) = line.split_once('\t')?;
            if serial.is_empty() {
                return None;
            }
            Some(Device {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}
