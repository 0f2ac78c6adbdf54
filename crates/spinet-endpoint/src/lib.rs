//! One endpoint of a spinet link.
//!
//! Turns a raw [`LinkPort`](spinet_link::LinkPort) into a frame transport:
//! the handshake decides who may start an exchange, the transfer engine
//! queues envelopes, and the dispatcher validates what arrives and hands
//! payloads to an [`Adapter`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use spinet_endpoint::{ChannelAdapter, Endpoint, EndpointConfig};
//! use spinet_link::sim;
//!
//! # fn main() -> spinet_endpoint::Result<()> {
//! let config = EndpointConfig::default();
//! let (left, right) = sim::pair(config.envelope_len)?;
//! let (adapter, _left_rx) = ChannelAdapter::new(16);
//! let (peer_adapter, right_rx) = ChannelAdapter::new(16);
//!
//! let left = Endpoint::start(&config, Arc::new(left), Arc::new(adapter))?;
//! let _right = Endpoint::start(&config, Arc::new(right), Arc::new(peer_adapter))?;
//!
//! left.send(b"hello")?;
//! let frame = right_rx.recv().expect("frame");
//! assert_eq!(&frame[..], b"hello");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
#[cfg(feature = "async")]
pub mod delivery;
pub mod dispatcher;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod netif;
pub mod notify;
pub mod receive;
pub mod responder;
pub mod stats;

pub use adapter::{Adapter, ChannelAdapter, Transport};
pub use config::EndpointConfig;
#[cfg(feature = "async")]
pub use delivery::{AsyncAdapter, DeliveryStream};
pub use dispatcher::{Dispatch, Dispatcher};
pub use endpoint::Endpoint;
pub use engine::TransferEngine;
pub use error::{EndpointError, Result};
pub use handshake::{EdgeAction, Handshake, HandshakeState};
pub use netif::{Duplex, LinkState, MacAddr, NetInterface, Speed};
pub use receive::ReceiveSlot;
pub use responder::{LoopbackTransport, Responder};
pub use stats::{LinkStats, StatsSnapshot};
