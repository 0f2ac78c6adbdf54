//! Two endpoints joined by the simulated wire, trading a few frames.
//!
//! Run with:
//!   cargo run --example loopback-pair

use std::sync::Arc;
use std::time::Duration;

use spinet::endpoint::ChannelAdapter;
use spinet::link::sim;
use spinet::{Endpoint, EndpointConfig, EndpointError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EndpointConfig::default();
    let (a, b) = sim::pair(config.envelope_len)?;
    let (a, b) = (Arc::new(a), Arc::new(b));

    let (left_adapter, left_rx) = ChannelAdapter::new(8);
    let (right_adapter, right_rx) = ChannelAdapter::new(8);
    let left = Endpoint::start(
        &EndpointConfig { name: "left".into(), ..config.clone() },
        Arc::clone(&a),
        Arc::new(left_adapter),
    )?;
    let right = Endpoint::start(
        &EndpointConfig { name: "right".into(), ..config },
        Arc::clone(&b),
        Arc::new(right_adapter),
    )?;
    a.wait_quiet(Duration::from_secs(1));
    b.wait_quiet(Duration::from_secs(1));

    for i in 0..4u8 {
        let (from, to, to_name) = if i % 2 == 0 {
            (&left, &right_rx, "right")
        } else {
            (&right, &left_rx, "left")
        };
        let payload = format!("hello #{i}");

        // The link carries one frame at a time; retry while it settles.
        loop {
            match from.send(payload.as_bytes()) {
                Ok(()) => break,
                Err(EndpointError::Busy) => std::thread::sleep(Duration::from_micros(200)),
                Err(e) => return Err(e.into()),
            }
        }

        let frame = to.recv_timeout(Duration::from_secs(2))?;
        eprintln!("{to_name} received {:?}", String::from_utf8_lossy(&frame));
    }

    eprintln!("left stats: {:?}", left.stats());
    eprintln!("right stats: {:?}", right.stats());
    Ok(())
}
