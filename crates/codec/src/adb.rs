//! The Android Debug Bridge packet format.
//!
//! Fixed 24-byte little-endian header: `command | arg1 | arg2 |
//! data_length | data_crc32 | magic`, where `magic` is the command word
//! XOR `0xFFFFFFFF` and the CRC covers the payload bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Error;

pub const ADB_HEADER_SIZE: usize = 0x0018;
pub const MAX_ADB_PAYLOAD: usize = 0x1000;

const MAGIC_MASK: u32 = 0xFFFF_FFFF;

pub const ADB_COMMAND_CONNECT: u32 = 0x4E58_4E43; // CNXN
pub const ADB_COMMAND_SYNC: u32 = 0x434E_5953; // SYNC
pub const ADB_COMMAND_OPEN: u32 = 0x4E45_504F; // OPEN
pub const ADB_COMMAND_OKAY: u32 = 0x5941_4B4F; // OKAY
pub const ADB_COMMAND_CLOSE: u32 = 0x4553_4C43; // CLSE
pub const ADB_COMMAND_WRITE: u32 = 0x4554_5257; // WRTE

fn validate_command(command: u32) -> Result<(), Error> {
    match command {
        ADB_COMMAND_CONNECT
        | ADB_COMMAND_SYNC
        | ADB_COMMAND_OPEN
        | ADB_COMMAND_OKAY
        | ADB_COMMAND_CLOSE
        | ADB_COMMAND_WRITE => Ok(()),
        other => Err(Error::UnknownCommand(other)),
    }
}

/// One ADB packet backed by a single preallocated buffer.
///
/// The buffer holds header and payload contiguously, so a packet can be
/// relayed with [`AdbPacket::as_bytes`] without copying, and readers can
/// overwrite it in place connection after connection.
pub struct AdbPacket {
    buf: Box<[u8]>,
}

impl Default for AdbPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbPacket {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; ADB_HEADER_SIZE + MAX_ADB_PAYLOAD].into_boxed_slice(),
        }
    }

    fn get_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes([
            self.buf[at],
            self.buf[at + 1],
            self.buf[at + 2],
            self.buf[at + 3],
        ])
    }

    fn put_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn command(&self) -> u32 {
        self.get_u32(0)
    }

    pub fn arg1(&self) -> u32 {
        self.get_u32(4)
    }

    pub fn arg2(&self) -> u32 {
        self.get_u32(8)
    }

    pub fn data_length(&self) -> u32 {
        self.get_u32(12)
    }

    pub fn data_crc32(&self) -> u32 {
        self.get_u32(16)
    }

    pub fn magic(&self) -> u32 {
        self.get_u32(20)
    }

    pub fn data(&self) -> &[u8] {
        let length = (self.data_length() as usize).min(MAX_ADB_PAYLOAD);
        &self.buf[ADB_HEADER_SIZE..ADB_HEADER_SIZE + length]
    }

    /// The command word as its four ASCII letters, e.g. `CNXN`.
    pub fn command_str(&self) -> String {
        String::from_utf8_lossy(&self.buf[0..4]).into_owned()
    }

    /// Header plus payload, ready to be wrapped into a relay frame.
    pub fn as_bytes(&self) -> &[u8] {
        let length = (self.data_length() as usize).min(MAX_ADB_PAYLOAD);
        &self.buf[..ADB_HEADER_SIZE + length]
    }

    /// Fill in every header field and the payload. The CRC and the magic
    /// word are derived, never supplied.
    pub fn set(&mut self, command: u32, arg1: u32, arg2: u32, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_ADB_PAYLOAD {
            return Err(Error::PayloadOverflow {
                length: data.len() as u32,
            });
        }
        self.put_u32(0, command);
        self.put_u32(4, arg1);
        self.put_u32(8, arg2);
        self.put_u32(12, data.len() as u32);
        self.put_u32(16, crc32fast::hash(data));
        self.put_u32(20, command ^ MAGIC_MASK);
        self.buf[ADB_HEADER_SIZE..ADB_HEADER_SIZE + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read one packet, rejecting unknown commands, bad magic and
    /// checksum mismatches.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        reader.read_exact(&mut self.buf[..ADB_HEADER_SIZE]).await?;
        let command = self.command();
        validate_command(command)?;
        let expected_magic = command ^ MAGIC_MASK;
        if self.magic() != expected_magic {
            return Err(Error::BadMagic {
                expected: expected_magic,
                actual: self.magic(),
            });
        }
        let length = self.data_length();
        if length as usize > MAX_ADB_PAYLOAD {
            return Err(Error::PayloadOverflow { length });
        }
        if length > 0 {
            reader
                .read_exact(&mut self.buf[ADB_HEADER_SIZE..ADB_HEADER_SIZE + length as usize])
                .await?;
        }
        let crc = crc32fast::hash(self.data());
        if crc != self.data_crc32() {
            return Err(Error::ChecksumMismatch {
                expected: self.data_crc32(),
                actual: crc,
            });
        }
        Ok(())
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(self.as_bytes()).await?;
        Ok(())
    }
}
