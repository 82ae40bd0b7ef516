//! Typed PDU bodies and their codecs.
//!
//! All variable-length strings on the wire are NUL-terminated C-strings and
//! are decoded by scanning for the terminator, never by assuming a fixed
//! field width. The submit and deliver bodies share one layout:
//!
//! ```text
//! service_type:        u8   (placeholder, 0)
//! source_addr_ton:     u8
//! source_addr_npi:     u8
//! source_addr:         C-string
//! dest_addr_ton:       u8
//! dest_addr_npi:       u8
//! destination_addr:    C-string
//! esm_class:           u8   (placeholder, 0)
//! protocol_id:         u8   (placeholder, 0)
//! data_coding:         u8   (0x04 on outbound deliveries)
//! registered_delivery: u32  (0, no delivery receipt requested)
//! short_message:       C-string
//! ```

use crate::error::ProtocolError;
use crate::frame::PduHeader;
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;

/// Source address carried by every outbound delivery.
pub const SERVER_ADDR: &str = "SERVER";

/// Destination address carried by every outbound delivery.
pub const CLIENT_ADDR: &str = "CLIENT";

/// Data coding octet for outbound deliveries (ASCII text).
const DATA_CODING_TEXT: u8 = 0x04;

/// Command identifiers understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandId {
    SubmitSm = 0x0000_0004,
    DeliverSm = 0x0000_0005,
    Unbind = 0x0000_0006,
    BindTransmitter = 0x0000_0009,
    UnbindResp = 0x8000_0006,
    BindTransmitterResp = 0x8000_0009,
}

impl CommandId {
    /// Maps a raw identifier to a known command, or `None` for anything
    /// this gateway does not speak.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x0000_0004 => Some(Self::SubmitSm),
            0x0000_0005 => Some(Self::DeliverSm),
            0x0000_0006 => Some(Self::Unbind),
            0x0000_0009 => Some(Self::BindTransmitter),
            0x8000_0006 => Some(Self::UnbindResp),
            0x8000_0009 => Some(Self::BindTransmitterResp),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Response PDUs carry the high bit of their request's identifier.
    pub fn is_response(self) -> bool {
        self.raw() & 0x8000_0000 != 0
    }
}

/// bind_transmitter request: the initial credential handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTransmitter {
    pub system_id: String,
    pub password: String,
}

impl BindTransmitter {
    /// Decodes a bind body. Any trailing fields after the password (a full
    /// SMPP bind also carries system_type, interface version and an address
    /// range) are ignored.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cur = Cursor::new(body);
        let system_id = read_cstring(&mut cur, "system_id")?;
        let password = read_cstring(&mut cur, "password")?;
        Ok(Self { system_id, password })
    }

    /// Encodes a complete bind frame (client side).
    pub fn encode(&self, sequence_number: u32) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.system_id);
        put_cstring(&mut body, &self.password);
        finish_frame(CommandId::BindTransmitter, 0, sequence_number, body)
    }
}

/// bind_transmitter_resp: acknowledges a successful bind with the server's
/// system identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTransmitterResp {
    pub system_id: String,
}

impl BindTransmitterResp {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cur = Cursor::new(body);
        let system_id = read_cstring(&mut cur, "system_id")?;
        Ok(Self { system_id })
    }

    pub fn encode(&self, sequence_number: u32) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.system_id);
        finish_frame(CommandId::BindTransmitterResp, 0, sequence_number, body)
    }
}

/// submit_sm: an inbound user message to route to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSm {
    /// Originating address (the routing key for the application call).
    pub source_addr: String,
    pub destination_addr: String,
    pub short_message: String,
}

impl SubmitSm {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut cur = Cursor::new(body);
        read_u8(&mut cur, "service_type")?;
        read_u8(&mut cur, "source_addr_ton")?;
        read_u8(&mut cur, "source_addr_npi")?;
        let source_addr = read_cstring(&mut cur, "source_addr")?;
        read_u8(&mut cur, "dest_addr_ton")?;
        read_u8(&mut cur, "dest_addr_npi")?;
        let destination_addr = read_cstring(&mut cur, "destination_addr")?;
        read_u8(&mut cur, "esm_class")?;
        read_u8(&mut cur, "protocol_id")?;
        read_u8(&mut cur, "data_coding")?;
        read_u32(&mut cur, "registered_delivery")?;
        let short_message = read_cstring(&mut cur, "short_message")?;
        Ok(Self {
            source_addr,
            destination_addr,
            short_message,
        })
    }

    /// Encodes a complete submit frame (client side).
    pub fn encode(&self, sequence_number: u32) -> BytesMut {
        let body = message_body(&self.source_addr, &self.destination_addr, 0, &self.short_message);
        finish_frame(CommandId::SubmitSm, 0, sequence_number, body)
    }
}

/// deliver_sm: an outbound application reply. Source and destination are
/// fixed role identifiers; only the message text varies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverSm {
    pub short_message: String,
}

impl DeliverSm {
    pub fn encode(&self, sequence_number: u32) -> BytesMut {
        let body = message_body(SERVER_ADDR, CLIENT_ADDR, DATA_CODING_TEXT, &self.short_message);
        finish_frame(CommandId::DeliverSm, 0, sequence_number, body)
    }

    /// Decodes a delivery body (client side); address fields are parsed for
    /// layout validation and discarded.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let parsed = SubmitSm::decode(body)?;
        Ok(Self {
            short_message: parsed.short_message,
        })
    }
}

/// Encodes an unbind request frame (header only).
pub fn encode_unbind(sequence_number: u32) -> BytesMut {
    finish_frame(CommandId::Unbind, 0, sequence_number, BytesMut::new())
}

/// Encodes an unbind_resp frame (header only, client side).
pub fn encode_unbind_resp(sequence_number: u32) -> BytesMut {
    finish_frame(CommandId::UnbindResp, 0, sequence_number, BytesMut::new())
}

/// Shared submit/deliver body layout (module doc above).
fn message_body(source: &str, dest: &str, data_coding: u8, message: &str) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(0); // service_type
    body.put_u8(0); // source_addr_ton
    body.put_u8(0); // source_addr_npi
    put_cstring(&mut body, source);
    body.put_u8(0); // dest_addr_ton
    body.put_u8(0); // dest_addr_npi
    put_cstring(&mut body, dest);
    body.put_u8(0); // esm_class
    body.put_u8(0); // protocol_id
    body.put_u8(data_coding);
    body.put_u32(0); // registered_delivery
    put_cstring(&mut body, message);
    body
}

/// Prepends the header to a finished body, yielding a complete frame.
fn finish_frame(command_id: CommandId, status: u32, sequence_number: u32, body: BytesMut) -> BytesMut {
    let mut frame = BytesMut::with_capacity(crate::PDU_HEADER_SIZE + body.len());
    PduHeader::for_body(command_id.raw(), status, sequence_number, body.len()).encode(&mut frame);
    frame.put_slice(&body);
    frame
}

fn read_cstring(cur: &mut Cursor<&[u8]>, field: &'static str) -> Result<String, ProtocolError> {
    let start = cur.position() as usize;
    let data = *cur.get_ref();
    let len = data[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::Truncated { field })?;
    let value = std::str::from_utf8(&data[start..start + len])
        .map_err(|_| ProtocolError::InvalidUtf8 { field })?
        .to_owned();
    cur.set_position((start + len + 1) as u64);
    Ok(value)
}

fn read_u8(cur: &mut Cursor<&[u8]>, field: &'static str) -> Result<u8, ProtocolError> {
    if cur.remaining() < 1 {
        return Err(ProtocolError::Truncated { field });
    }
    Ok(cur.get_u8())
}

fn read_u32(cur: &mut Cursor<&[u8]>, field: &'static str) -> Result<u32, ProtocolError> {
    if cur.remaining() < 4 {
        return Err(ProtocolError::Truncated { field });
    }
    Ok(cur.get_u32())
}

fn put_cstring(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}
