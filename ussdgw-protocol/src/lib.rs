//! # ussdgw-protocol
//!
//! Wire protocol implementation for the USSD gateway.
//!
//! This crate provides:
//! - Binary framing with a 16-byte length-prefixed PDU header
//! - Typed PDU bodies and their codecs (bind, submit, deliver, unbind)
//! - A buffering frame reader that slices a byte stream into whole PDUs
//! - Protocol error types

pub mod error;
pub mod frame;
pub mod pdu;

pub use error::ProtocolError;
pub use frame::{Frame, FrameReader, PduHeader};
pub use pdu::{BindTransmitter, BindTransmitterResp, CommandId, DeliverSm, SubmitSm};

/// Default port for the gateway listener (IANA-registered SMPP port).
pub const DEFAULT_PORT: u16 = 2775;

/// Size of the fixed PDU header in bytes.
pub const PDU_HEADER_SIZE: usize = 16;

/// Maximum accepted PDU size (64 KiB). A larger length prefix is treated as
/// a framing error rather than a buffering target.
pub const MAX_PDU_SIZE: u32 = 64 * 1024;

/// Default cap on a connection's receive buffer (256 KiB).
pub const DEFAULT_MAX_BUFFER: usize = 256 * 1024;
