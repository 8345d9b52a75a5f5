//! ## ADB remote wire formats
//!
//! Everything that crosses a socket in this system is defined here:
//!
//! - the relay protocol spoken between clients and the transporter, a
//!   12-byte little-endian header (`command | payload_length |
//!   payload_crc32`) followed by up to [`MAX_PAYLOAD_SIZE`] payload bytes;
//! - the Android Debug Bridge packet format, a fixed 24-byte header plus
//!   up to 4 KiB of payload;
//! - the host ADB server's "smart socket" text protocol, four ASCII hex
//!   digits of length followed by the command text.
//!
//! The relay treats ADB traffic as opaque: an `AdbTransport` frame carries
//! raw ADB bytes in its payload and only the outer frame checksum is
//! verified at each hop.

pub mod adb;
pub mod frame;
pub mod payload;
pub mod pool;
pub mod smart_socket;

use std::str::Utf8Error;

/// Version of the transporter protocol carried in the `Connect` payload.
pub const PROTOCOL_VERSION: u32 = 0x0001;

/// Largest legal frame payload.
pub const MAX_PAYLOAD_SIZE: u32 = 0xF000;

/// Three u32 fields.
pub const HEADER_SIZE: usize = 0x000C;

pub const COMMAND_CONNECT: u32 = 0x0001;
pub const COMMAND_RECONNECT: u32 = 0x0002;
pub const COMMAND_CREATE_ROOM: u32 = 0x0003;
pub const COMMAND_JOIN_ROOM: u32 = 0x0004;
pub const COMMAND_ADB_TRANSPORT: u32 = 0x0006;

/// OR'd into a command word when answering it.
pub const COMMAND_RESPONSE_MASK: u32 = 0x1000;

/// OR'd into a command word when answering it with an [`payload::ErrorPayload`].
pub const COMMAND_ERROR_RESPONSE_MASK: u32 = 0x2000;

pub const ERROR_UNKNOWN: u32 = 0x0001;
pub const ERROR_PROTOCOL_NOT_SUPPORTED: u32 = 0x0001;
pub const ERROR_ALREADY_IN_ROOM: u32 = 0x0002;
pub const ERROR_ROOM_NOT_FOUND: u32 = 0x0003;
pub const ERROR_FULL: u32 = 0x0004;
pub const ERROR_NO_PARTICIPANT: u32 = 0x0005;
pub const ERROR_INVALID_PAYLOAD: u32 = 0x0006;

#[derive(Debug)]
pub enum Error {
    /// A length field exceeds the buffer that has to hold it.
    PayloadOverflow { length: u32 },
    /// A typed payload field runs past the received payload length.
    InvalidPayload { size: usize, offset: usize },
    /// `expect_command` found no overlap between the received and the
    /// expected command bits.
    UnexpectedCommand { expected: u32, actual: u32 },
    UnknownCommand(u32),
    BadMagic { expected: u32, actual: u32 },
    ChecksumMismatch { expected: u32, actual: u32 },
    InvalidStatus([u8; 4]),
    InvalidHexLength([u8; 4]),
    Utf8Error(Utf8Error),
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl Error {
    /// Whether this error marks the clean end of the peer's stream, as
    /// opposed to a malformed message.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(inner) if inner.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
