//! Typed payload catalog for the relay protocol.
//!
//! Integers are little-endian u32, strings are u32-length-prefixed raw
//! bytes. Every decoder bounds-checks its offsets against the received
//! payload length; every encoder finishes by refreshing the frame's
//! payload length and CRC.

use crate::{Error, frame::TransportFrame};

const INT_SIZE: usize = 4;

/// Carried by any frame whose command has the error response mask set.
pub struct ErrorPayload {
    pub error_code: u32,
    pub error_message: String,
}

pub struct ConnectPayload {
    pub protocol_version: u32,
}

pub struct ConnectResponsePayload {
    pub client_id: String,
}

pub struct CreateRoomResponsePayload {
    pub room_id: String,
}

/// Both the guest's join request and the direct join notification the
/// transporter forwards to the room owner. The guest leaves `client_id`
/// empty; the transporter fills it in before notifying the owner.
pub struct ConnectRoomPayload {
    pub room_id: String,
    pub client_id: String,
}

/// `accepted` is a flag: 0 means rejected, anything else accepted.
pub struct ConnectRoomResultPayload {
    pub accepted: u32,
}

impl TransportFrame {
    pub fn get_error(&self) -> Result<ErrorPayload, Error> {
        let (offset, error_code) = self.read_u32_at(0)?;
        let (_, error_message) = self.read_string_at(offset)?;
        Ok(ErrorPayload {
            error_code,
            error_message,
        })
    }

    pub fn set_error(&mut self, payload: &ErrorPayload) -> Result<(), Error> {
        let offset = self.write_u32_at(0, payload.error_code)?;
        let end = self.write_string_at(offset, &payload.error_message)?;
        self.finish_payload(end);
        Ok(())
    }

    pub fn get_connect(&self) -> Result<ConnectPayload, Error> {
        let (_, protocol_version) = self.read_u32_at(0)?;
        Ok(ConnectPayload { protocol_version })
    }

    pub fn set_connect(&mut self, payload: &ConnectPayload) -> Result<(), Error> {
        let end = self.write_u32_at(0, payload.protocol_version)?;
        self.finish_payload(end);
        Ok(())
    }

    pub fn get_connect_response(&self) -> Result<ConnectResponsePayload, Error> {
        let (_, client_id) = self.read_string_at(0)?;
        Ok(ConnectResponsePayload { client_id })
    }

    pub fn set_connect_response(&mut self, payload: &ConnectResponsePayload) -> Result<(), Error> {
        let end = self.write_string_at(0, &payload.client_id)?;
        self.finish_payload(end);
        Ok(())
    }

    pub fn get_create_room_response(&self) -> Result<CreateRoomResponsePayload, Error> {
        let (_, room_id) = self.read_string_at(0)?;
        Ok(CreateRoomResponsePayload { room_id })
    }

    pub fn set_create_room_response(
        &mut self,
        payload: &CreateRoomResponsePayload,
    ) -> Result<(), Error> {
        let end = self.write_string_at(0, &payload.room_id)?;
        self.finish_payload(end);
        Ok(())
    }

    pub fn get_connect_room(&self) -> Result<ConnectRoomPayload, Error> {
        let (offset, room_id) = self.read_string_at(0)?;
        let (_, client_id) = self.read_string_at(offset)?;
        Ok(ConnectRoomPayload { room_id, client_id })
    }

    pub fn set_connect_room(&mut self, payload: &ConnectRoomPayload) -> Result<(), Error> {
        let offset = self.write_string_at(0, &payload.room_id)?;
        let end = self.write_string_at(offset, &payload.client_id)?;
        self.finish_payload(end);
        Ok(())
    }

    pub fn get_connect_room_result(&self) -> Result<ConnectRoomResultPayload, Error> {
        let (_, accepted) = self.read_u32_at(0)?;
        Ok(ConnectRoomResultPayload { accepted })
    }

    pub fn set_connect_room_result(
        &mut self,
        payload: &ConnectRoomResultPayload,
    ) -> Result<(), Error> {
        let end = self.write_u32_at(0, payload.accepted)?;
        self.finish_payload(end);
        Ok(())
    }

    fn read_u32_at(&self, offset: usize) -> Result<(usize, u32), Error> {
        let end = offset + INT_SIZE;
        if (self.payload_length() as usize) < end {
            return Err(Error::InvalidPayload {
                size: self.payload_length() as usize,
                offset: end,
            });
        }
        let window = self.payload_buf();
        let value = u32::from_le_bytes([
            window[offset],
            window[offset + 1],
            window[offset + 2],
            window[offset + 3],
        ]);
        Ok((end, value))
    }

    fn read_string_at(&self, offset: usize) -> Result<(usize, String), Error> {
        let (offset, length) = self.read_u32_at(offset)?;
        let end = offset + length as usize;
        if (self.payload_length() as usize) < end {
            return Err(Error::InvalidPayload {
                size: self.payload_length() as usize,
                offset: end,
            });
        }
        let value = std::str::from_utf8(&self.payload_buf()[offset..end])?.to_owned();
        Ok((end, value))
    }

    fn write_u32_at(&mut self, offset: usize, value: u32) -> Result<usize, Error> {
        let end = offset + INT_SIZE;
        if self.payload_buf().len() < end {
            return Err(Error::PayloadOverflow { length: end as u32 });
        }
        self.payload_buf_mut()[offset..end].copy_from_slice(&value.to_le_bytes());
        Ok(end)
    }

    fn write_string_at(&mut self, offset: usize, value: &str) -> Result<usize, Error> {
        let bytes = value.as_bytes();
        let offset = self.write_u32_at(offset, bytes.len() as u32)?;
        let end = offset + bytes.len();
        if self.payload_buf().len() < end {
            return Err(Error::PayloadOverflow { length: end as u32 });
        }
        self.payload_buf_mut()[offset..end].copy_from_slice(bytes);
        Ok(end)
    }
}
