use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::crc::crc8;
use crate::error::{FrameError, Result};

/// Sentinel byte opening every valid frame.
pub const START_MARKER: u8 = 0xA5;

/// Bytes covered by the header checksum: marker (1) + length (2).
pub const HEADER_CRC_SPAN: usize = 3;

/// Envelope overhead: marker (1) + length (2) + header CRC (1) + payload CRC (1).
pub const OVERHEAD: usize = 5;

/// Default envelope size shared by both endpoints.
pub const DEFAULT_ENVELOPE_LEN: usize = 1524;

/// Largest payload that fits in a default envelope.
pub const DEFAULT_MAX_PAYLOAD: usize = DEFAULT_ENVELOPE_LEN - OVERHEAD;

const PAYLOAD_OFFSET: usize = OVERHEAD;

/// Envelope geometry. Both ends of a link must use the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    envelope_len: usize,
}

impl FrameConfig {
    /// Smallest usable envelope: header plus an empty payload.
    pub const MIN_ENVELOPE_LEN: usize = OVERHEAD;
    /// Largest usable envelope: the length field is 16 bits.
    pub const MAX_ENVELOPE_LEN: usize = OVERHEAD + u16::MAX as usize;

    /// Create a configuration for `envelope_len` bytes per exchange.
    pub fn new(envelope_len: usize) -> Result<Self> {
        if !(Self::MIN_ENVELOPE_LEN..=Self::MAX_ENVELOPE_LEN).contains(&envelope_len) {
            return Err(FrameError::InvalidEnvelopeSize {
                size: envelope_len,
                min: Self::MIN_ENVELOPE_LEN,
                max: Self::MAX_ENVELOPE_LEN,
            });
        }
        Ok(Self { envelope_len })
    }

    /// Bytes moved by every exchange.
    pub fn envelope_len(&self) -> usize {
        self.envelope_len
    }

    /// Largest payload one frame can carry.
    pub fn max_payload(&self) -> usize {
        self.envelope_len - OVERHEAD
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            envelope_len: DEFAULT_ENVELOPE_LEN,
        }
    }
}

/// The fixed fields at the start of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub start_marker: u8,
    pub payload_len: u16,
    pub header_checksum: u8,
    pub payload_checksum: u8,
}

impl FrameHeader {
    /// Read the header fields without validating them.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < OVERHEAD {
            return Err(FrameError::Truncated { len: raw.len() });
        }
        let mut src = raw;
        Ok(Self {
            start_marker: src.get_u8(),
            payload_len: src.get_u16_le(),
            header_checksum: src.get_u8(),
            payload_checksum: src.get_u8(),
        })
    }

    /// Check the start marker and header checksum only.
    pub fn validate(&self) -> Result<()> {
        if self.start_marker != START_MARKER {
            return Err(FrameError::InvalidMarker {
                found: self.start_marker,
            });
        }
        let computed = self.compute_header_checksum();
        if computed != self.header_checksum {
            return Err(FrameError::HeaderChecksum {
                computed,
                found: self.header_checksum,
            });
        }
        Ok(())
    }

    fn compute_header_checksum(&self) -> u8 {
        let len = self.payload_len.to_le_bytes();
        crc8(&[self.start_marker, len[0], len[1]])
    }
}

/// A validated frame borrowed from an envelope buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    header: FrameHeader,
    payload: &'a [u8],
}

impl<'a> FrameView<'a> {
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The significant payload bytes (padding excluded).
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Encode `payload` into the envelope buffer `dst`.
///
/// Wire format:
/// ```text
/// ┌────────┬──────────┬──────────┬──────────┬─────────────────┬──────────────┐
/// │ Marker │ Length   │ Hdr CRC8 │ Pay CRC8 │ Payload         │ Zero padding │
/// │ 0xA5   │ (2B LE)  │ (1B)     │ (1B)     │ (Length bytes)  │              │
/// └────────┴──────────┴──────────┴──────────┴─────────────────┴──────────────┘
/// │◄──────────────────────────── envelope_len ───────────────────────────────►│
/// ```
///
/// Rejects the payload before touching `dst` if it does not fit.
pub fn encode(payload: &[u8], dst: &mut [u8], config: &FrameConfig) -> Result<FrameHeader> {
    if payload.len() > config.max_payload() {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: config.max_payload(),
        });
    }
    if dst.len() != config.envelope_len() {
        return Err(FrameError::InvalidEnvelope {
            expected: config.envelope_len(),
            actual: dst.len(),
        });
    }

    let mut header = FrameHeader {
        start_marker: START_MARKER,
        // Bounded by max_payload(), which never exceeds u16::MAX.
        payload_len: payload.len() as u16,
        header_checksum: 0,
        payload_checksum: crc8(payload),
    };
    header.header_checksum = header.compute_header_checksum();

    let mut out = &mut dst[..];
    out.put_u8(header.start_marker);
    out.put_u16_le(header.payload_len);
    out.put_u8(header.header_checksum);
    out.put_u8(header.payload_checksum);
    out.put_slice(payload);
    let padding = out.remaining_mut();
    out.put_bytes(0, padding);

    Ok(header)
}

/// Encode `payload` into a freshly allocated envelope.
pub fn encode_envelope(payload: &[u8], config: &FrameConfig) -> Result<BytesMut> {
    let mut buf = BytesMut::zeroed(config.envelope_len());
    encode(payload, &mut buf, config)?;
    Ok(buf)
}

/// Validate an envelope and borrow its payload.
///
/// Any structural or checksum mismatch yields an error. On the receive path
/// this is routine (an idle peer clocks out zeros) and is traced, not logged.
pub fn decode_and_validate<'a>(raw: &'a [u8], config: &FrameConfig) -> Result<FrameView<'a>> {
    let result = validate(raw, config);
    if let Err(err) = &result {
        trace!(error = %err, "rejected envelope");
    }
    result
}

fn validate<'a>(raw: &'a [u8], config: &FrameConfig) -> Result<FrameView<'a>> {
    let header = FrameHeader::parse(raw)?;
    header.validate()?;

    let len = usize::from(header.payload_len);
    let max = config.max_payload().min(raw.len() - PAYLOAD_OFFSET);
    if len > max {
        return Err(FrameError::LengthOutOfRange { len, max });
    }

    let payload = &raw[PAYLOAD_OFFSET..PAYLOAD_OFFSET + len];
    let computed = crc8(payload);
    if computed != header.payload_checksum {
        return Err(FrameError::PayloadChecksum {
            computed,
            found: header.payload_checksum,
        });
    }

    Ok(FrameView { header, payload })
}
