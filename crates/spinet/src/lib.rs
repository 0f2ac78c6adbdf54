//! Ethernet frames over a handshaked SPI link between two microcontrollers.
//!
//! spinet moves one fixed-size envelope per full-duplex exchange, with two
//! status lines and a request pulse deciding who may start the next one.
//!
//! # Crate Structure
//!
//! - [`link`] - physical-layer boundary and the simulated wire
//! - [`frame`] - CRC-8 envelope codec
//! - [`endpoint`] - handshake, transfer engine, dispatcher and adapters

/// Re-export link types.
pub mod link {
    pub use spinet_link::*;
}

/// Re-export frame types.
pub mod frame {
    pub use spinet_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use spinet_endpoint::*;
}

pub use spinet_endpoint::{Adapter, Endpoint, EndpointConfig, EndpointError, Transport};
