/// Errors that can occur during frame encoding/decoding.
///
/// Decode errors describe why an envelope was rejected. On the receive path
/// they are expected (an idle or absent peer clocks out zeros) and are never
/// surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds what fits in one envelope.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The buffer handed to the codec is not one envelope long.
    #[error("buffer is {actual} bytes, envelope is {expected}")]
    InvalidEnvelope { expected: usize, actual: usize },

    /// The envelope size cannot carry a frame.
    #[error("invalid envelope size {size} (must be {min}..={max})")]
    InvalidEnvelopeSize { size: usize, min: usize, max: usize },

    /// Fewer bytes than a frame header.
    #[error("truncated frame ({len} bytes)")]
    Truncated { len: usize },

    /// The first byte is not the start marker.
    #[error("invalid start marker 0x{found:02X}")]
    InvalidMarker { found: u8 },

    /// Header CRC mismatch.
    #[error("header checksum mismatch (computed 0x{computed:02X}, found 0x{found:02X})")]
    HeaderChecksum { computed: u8, found: u8 },

    /// The header announces more payload than the envelope carries.
    #[error("payload length {len} out of range (max {max})")]
    LengthOutOfRange { len: usize, max: usize },

    /// Payload CRC mismatch.
    #[error("payload checksum mismatch (computed 0x{computed:02X}, found 0x{found:02X})")]
    PayloadChecksum { computed: u8, found: u8 },
}

impl FrameError {
    /// True for errors that mean "the bytes on the wire were not a valid frame".
    pub fn is_invalid_frame(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::InvalidMarker { .. }
                | Self::HeaderChecksum { .. }
                | Self::LengthOutOfRange { .. }
                | Self::PayloadChecksum { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
