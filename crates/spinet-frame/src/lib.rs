//! Fixed-envelope framing for the spinet link.
//!
//! Every exchange moves exactly one envelope of a configured size:
//! - a 1-byte start marker (`0xA5`)
//! - a 2-byte little-endian payload length
//! - a CRC-8 over marker and length
//! - a CRC-8 over the payload
//! - the payload, zero-padded to the envelope size
//!
//! Encoding writes straight into a caller-owned buffer, so the transmit path
//! never allocates.

pub mod codec;
pub mod crc;
pub mod error;

pub use codec::{
    decode_and_validate, encode, encode_envelope, FrameConfig, FrameHeader, FrameView,
    DEFAULT_ENVELOPE_LEN, DEFAULT_MAX_PAYLOAD, HEADER_CRC_SPAN, OVERHEAD, START_MARKER,
};
pub use crc::crc8;
pub use error::{FrameError, Result};
