/// Errors raised by a link backend.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The transmit buffer does not match the configured envelope size.
    #[error("envelope size mismatch ({actual} bytes, expected {expected})")]
    EnvelopeMismatch { expected: usize, actual: usize },

    /// An exchange is already queued on the peripheral.
    #[error("exchange already queued")]
    AlreadyQueued,

    /// An interrupt handler is already attached to this port.
    #[error("interrupt handler already attached")]
    AlreadyAttached,

    /// The far side of the link is gone.
    #[error("link disconnected")]
    Disconnected,

    /// The peripheral driver reported a failure.
    #[error("peripheral error: {0}")]
    Peripheral(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
