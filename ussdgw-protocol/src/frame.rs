//! Binary frame format for the gateway wire protocol.
//!
//! Frame layout (16-byte header + body, all integers big-endian):
//!
//! ```text
//! +----------------+------------+----------------+-----------------+
//! | command_length | command_id | command_status | sequence_number |
//! |    4 bytes     |  4 bytes   |    4 bytes     |     4 bytes     |
//! +----------------+------------+----------------+-----------------+
//! | body (command_length - 16 bytes)                               |
//! +----------------------------------------------------------------+
//! ```
//!
//! `command_length` counts the header itself, so a well-formed frame always
//! carries a value of at least 16.

use crate::error::ProtocolError;
use crate::{DEFAULT_MAX_BUFFER, MAX_PDU_SIZE, PDU_HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A parsed PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    /// Total frame length including the header.
    pub command_length: u32,
    /// Raw command identifier. Kept raw so unknown commands stay
    /// representable and can be logged and skipped downstream.
    pub command_id: u32,
    /// Command status (0 on requests and successful responses).
    pub command_status: u32,
    /// Sequence number, echoed verbatim in any response to this frame.
    pub sequence_number: u32,
}

impl PduHeader {
    /// Builds a header for a body of the given length.
    pub fn for_body(command_id: u32, command_status: u32, sequence_number: u32, body_len: usize) -> Self {
        Self {
            command_length: (PDU_HEADER_SIZE + body_len) as u32,
            command_id,
            command_status,
            sequence_number,
        }
    }

    /// Appends the 16 header bytes to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.command_length);
        buf.put_u32(self.command_id);
        buf.put_u32(self.command_status);
        buf.put_u32(self.sequence_number);
    }

    /// Reads a header from the front of `buf`, or `None` if fewer than
    /// 16 bytes remain. Performs no length validation; the frame reader
    /// validates `command_length` before slicing a frame.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < PDU_HEADER_SIZE {
            return None;
        }
        Some(Self {
            command_length: buf.get_u32(),
            command_id: buf.get_u32(),
            command_status: buf.get_u32(),
            sequence_number: buf.get_u32(),
        })
    }

    /// Body length implied by `command_length`.
    pub fn body_len(&self) -> usize {
        (self.command_length as usize).saturating_sub(PDU_HEADER_SIZE)
    }
}

/// A complete inbound frame.
///
/// Transient: owned by a single decode/dispatch/encode cycle.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: PduHeader,
    pub body: Bytes,
}

/// Accumulates raw bytes from a connection and slices complete frames off
/// the front, leaving any partial trailing frame buffered for later.
///
/// Frames come out in strict arrival order. Both the single-PDU size and the
/// total buffered byte count are capped so a hostile or buggy peer cannot
/// grow memory without bound.
pub struct FrameReader {
    buffer: BytesMut,
    max_pdu: u32,
    max_buffer: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_limits(MAX_PDU_SIZE, DEFAULT_MAX_BUFFER)
    }

    pub fn with_limits(max_pdu: u32, max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_pdu,
            max_buffer,
        }
    }

    /// Appends newly received bytes to the buffer.
    pub fn append(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let size = self.buffer.len() + data.len();
        if size > self.max_buffer {
            return Err(ProtocolError::BufferOverflow {
                size,
                max: self.max_buffer,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Attempts to slice the next complete frame off the buffer front.
    ///
    /// Returns `Ok(Some(frame))` if one is complete, `Ok(None)` if more
    /// bytes are needed, or `Err` on a malformed or oversized length prefix.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        let command_length =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]]);
        if command_length < PDU_HEADER_SIZE as u32 {
            return Err(ProtocolError::InvalidLength {
                length: command_length,
                min: PDU_HEADER_SIZE as u32,
            });
        }
        if command_length > self.max_pdu {
            return Err(ProtocolError::PduTooLarge {
                size: command_length,
                max: self.max_pdu,
            });
        }

        if self.buffer.len() < command_length as usize {
            return Ok(None);
        }

        let mut pdu = self.buffer.split_to(command_length as usize).freeze();
        let header = PduHeader {
            command_length: pdu.get_u32(),
            command_id: pdu.get_u32(),
            command_status: pdu.get_u32(),
            sequence_number: pdu.get_u32(),
        };

        Ok(Some(Frame { header, body: pdu }))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
