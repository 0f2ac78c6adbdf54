//! Answer an ARP request and an ICMP echo without a network stack.
//!
//! Run with:
//!   cargo run --example ping-responder

use std::net::Ipv4Addr;
use std::sync::Arc;

use spinet::endpoint::responder::{arp_request, echo_request};
use spinet::endpoint::{ChannelAdapter, LoopbackTransport, MacAddr, NetInterface, Responder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host_ip = Ipv4Addr::new(192, 168, 2, 2);
    let peer_ip = Ipv4Addr::new(192, 168, 2, 1);
    let peer_mac: MacAddr = "a6:99:91:ad:9d:6f".parse()?;

    let (adapter, replies) = ChannelAdapter::new(4);
    let transport = LoopbackTransport::new(
        Responder::new(MacAddr::default(), host_ip),
        Arc::new(adapter),
    );
    let netif = NetInterface::new(transport, MacAddr::default());

    netif.transmit(&arp_request(peer_mac, peer_ip, host_ip))?;
    let reply = replies.try_recv()?;
    eprintln!("ARP reply: {} bytes from {}", reply.len(), netif.mac_addr());

    let request = echo_request(peer_mac, netif.mac_addr(), peer_ip, host_ip, 1, 1, b"ping");
    netif.transmit(&request)?;
    let reply = replies.try_recv()?;
    eprintln!("echo reply: {} bytes", reply.len());

    Ok(())
}
