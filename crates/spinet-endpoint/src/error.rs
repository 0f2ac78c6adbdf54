use spinet_frame::FrameError;
use spinet_link::LinkError;

/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The payload does not fit in one envelope. Rejected before any I/O.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The link is mid-transfer or the peer is busy. Try again later.
    #[error("link busy")]
    Busy,

    /// Link backend error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} worker: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested adapter mode is not supported by this link.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<FrameError> for EndpointError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            other => Self::Frame(other),
        }
    }
}

impl EndpointError {
    /// True when the caller should simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_error_maps_to_payload_too_large() {
        let err: EndpointError = FrameError::PayloadTooLarge { size: 9, max: 4 }.into();
        assert!(matches!(err, EndpointError::PayloadTooLarge { size: 9, max: 4 }));
    }

    #[test]
    fn other_frame_errors_are_wrapped() {
        let err: EndpointError = FrameError::Truncated { len: 1 }.into();
        assert!(matches!(err, EndpointError::Frame(FrameError::Truncated { len: 1 })));
    }

    #[test]
    fn only_busy_is_transient() {
        assert!(EndpointError::Busy.is_transient());
        assert!(!EndpointError::Config("x".to_string()).is_transient());
    }
}
