//! Physical-layer boundary for a spinet link.
//!
//! A spinet link joins two endpoints with:
//! - a synchronous full-duplex serial channel moving one fixed-size envelope per exchange
//! - a pair of level-signaled status lines (`status_out` / `status_in`)
//! - a request line pulsed by the sender and seen by the receiver as a falling edge
//!
//! This is the lowest layer of spinet. Hardware backends implement [`LinkPort`];
//! the [`sim`] module provides an in-process wire for tests and demos.

pub mod error;
pub mod sim;
pub mod traits;

pub use error::{LinkError, Result};
pub use traits::{LinkEvents, LinkPort, Peripheral, Signals, Status};
