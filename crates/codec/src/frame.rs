use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    COMMAND_ERROR_RESPONSE_MASK, COMMAND_RESPONSE_MASK, Error, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

/// One relay frame between a client and the transporter.
///
/// A frame owns a single buffer sized for the largest legal message; the
/// first [`HEADER_SIZE`] bytes are the header window, the rest is the
/// payload window. Readers overwrite the buffer in place, which is what
/// makes pooling these worthwhile.
pub struct TransportFrame {
    buf: Box<[u8]>,
}

impl Default for TransportFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFrame {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; HEADER_SIZE + MAX_PAYLOAD_SIZE as usize].into_boxed_slice(),
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

    pub fn payload_length(&self) -> u32 {
        self.get_u32(4)
    }

    pub fn payload_crc32(&self) -> u32 {
        self.get_u32(8)
    }

    pub fn payload(&self) -> &[u8] {
        let length = (self.payload_length() as usize).min(MAX_PAYLOAD_SIZE as usize);
        &self.buf[HEADER_SIZE..HEADER_SIZE + length]
    }

    pub(crate) fn payload_buf(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..]
    }

    pub(crate) fn payload_buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_SIZE..]
    }

    /// Store the command word unmodified.
    pub fn set_direct_command(&mut self, command: u32) {
        self.put_u32(0, command);
    }

    pub fn set_response_command(&mut self, command: u32) {
        self.set_direct_command(command | COMMAND_RESPONSE_MASK);
    }

    pub fn set_error_response_command(&mut self, command: u32) {
        self.set_direct_command(command | COMMAND_ERROR_RESPONSE_MASK);
    }

    pub fn is_error(&self) -> bool {
        self.command() & COMMAND_ERROR_RESPONSE_MASK != 0
    }

    /// Succeeds when the frame command shares at least one bit with
    /// `expected`. The bitmask semantics are deliberate: passing e.g.
    /// `COMMAND_CREATE_ROOM | COMMAND_RESPONSE_MASK` matches any form of a
    /// CreateRoom response, error or not.
    pub fn expect_command(&self, expected: u32) -> Result<(), Error> {
        let actual = self.command();
        if actual & expected == 0 {
            return Err(Error::UnexpectedCommand { expected, actual });
        }
        Ok(())
    }

    /// Replace the payload with raw bytes, then refresh length and CRC.
    pub fn set_payload(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(Error::PayloadOverflow {
                length: data.len() as u32,
            });
        }
        self.buf[HEADER_SIZE..HEADER_SIZE + data.len()].copy_from_slice(data);
        self.finish_payload(data.len());
        Ok(())
    }

    /// Every payload setter ends here: the length field and the CRC are
    /// always derived from the final payload bytes.
    pub(crate) fn finish_payload(&mut self, length: usize) {
        let crc = crc32fast::hash(&self.buf[HEADER_SIZE..HEADER_SIZE + length]);
        self.put_u32(4, length as u32);
        self.put_u32(8, crc);
    }

    /// Check the frame CRC against the payload bytes. Called once per hop
    /// by whoever received the frame; the typed payload decoders only
    /// bounds-check, so an opaque relay never touches the payload twice.
    pub fn verify_payload_crc(&self) -> Result<(), Error> {
        let expected = self.payload_crc32();
        let actual = crc32fast::hash(self.payload());
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }

    /// Read exactly one frame, looping until every byte arrived or the
    /// stream ended.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        reader.read_exact(&mut self.buf[..HEADER_SIZE]).await?;
        let length = self.payload_length();
        if length > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadOverflow { length });
        }
        if length > 0 {
            reader
                .read_exact(&mut self.buf[HEADER_SIZE..HEADER_SIZE + length as usize])
                .await?;
        }
        Ok(())
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let end = HEADER_SIZE + (self.payload_length() as usize).min(MAX_PAYLOAD_SIZE as usize);
        writer.write_all(&self.buf[..end]).await?;
        Ok(())
    }
}
