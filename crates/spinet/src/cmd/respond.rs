use std::net::Ipv4Addr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use spinet_endpoint::responder::{
    arp_request, echo_request, internet_checksum, ETHERTYPE_ARP, ETHERTYPE_IPV4,
};
use spinet_endpoint::{ChannelAdapter, LinkState, LoopbackTransport, NetInterface, Responder};
use tracing::{debug, warn};

use crate::cmd::{Context, RespondArgs};
use crate::exit::{endpoint_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_reports, Report};

const ECHO_IDENT: u16 = 0x5350;

#[derive(Debug, Serialize)]
struct ReplyReport {
    kind: &'static str,
    seq: u16,
    request_len: usize,
    reply_len: Option<usize>,
    valid: bool,
}

impl Report for ReplyReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("kind", self.kind.to_string()),
            ("seq", self.seq.to_string()),
            ("request_len", self.request_len.to_string()),
            (
                "reply_len",
                self.reply_len.map_or_else(|| "-".to_string(), |len| len.to_string()),
            ),
            ("valid", self.valid.to_string()),
        ]
    }
}

pub fn run(args: RespondArgs, ctx: &Context) -> CliResult<i32> {
    let mac = ctx.config.mac_addr;
    let (adapter, replies) = ChannelAdapter::new(usize::from(args.count) + 1);
    let transport = LoopbackTransport::new(Responder::new(mac, args.ip), Arc::new(adapter));
    let netif = NetInterface::new(transport, mac);
    netif.set_link(LinkState::Up);

    let mut reports = Vec::with_capacity(usize::from(args.count) + 1);

    let request = arp_request(args.peer_mac, args.peer_ip, args.ip);
    netif
        .transmit(&request)
        .map_err(|err| endpoint_error("ARP request failed", err))?;
    let reply = replies.try_recv().ok();
    reports.push(ReplyReport {
        kind: "arp",
        seq: 0,
        request_len: request.len(),
        reply_len: reply.as_ref().map(Bytes::len),
        valid: reply.as_deref().is_some_and(|r| is_arp_reply(r, args.ip)),
    });

    for seq in 1..=args.count {
        let request = echo_request(
            args.peer_mac,
            netif.mac_addr(),
            args.peer_ip,
            args.ip,
            ECHO_IDENT,
            seq,
            args.data.as_bytes(),
        );
        netif
            .transmit(&request)
            .map_err(|err| endpoint_error("echo request failed", err))?;
        let reply = replies.try_recv().ok();
        reports.push(ReplyReport {
            kind: "icmp",
            seq,
            request_len: request.len(),
            reply_len: reply.as_ref().map(Bytes::len),
            valid: reply
                .as_deref()
                .is_some_and(|r| is_echo_reply(r, args.ip, args.peer_ip, seq)),
        });
    }

    debug!(replies = netif.transport().replies(), "responder finished");
    print_reports(&reports, ctx.format);

    if reports.iter().all(|report| report.valid) {
        Ok(SUCCESS)
    } else {
        warn!("some requests went unanswered");
        Ok(FAILURE)
    }
}

fn is_arp_reply(frame: &[u8], ip: Ipv4Addr) -> bool {
    frame.len() >= 42
        && frame[12..14] == ETHERTYPE_ARP.to_be_bytes()
        && frame[20..22] == [0, 2]
        && frame[28..32] == ip.octets()
}

fn is_echo_reply(frame: &[u8], src: Ipv4Addr, dst: Ipv4Addr, seq: u16) -> bool {
    if frame.len() < 42 || frame[12..14] != ETHERTYPE_IPV4.to_be_bytes() {
        return false;
    }
    let ip = &frame[14..];
    let ihl = usize::from(ip[0] & 0x0f) * 4;
    if ihl < 20 || ip.len() < ihl + 8 {
        return false;
    }
    let icmp = &ip[ihl..];
    internet_checksum(&ip[..ihl]) == 0
        && ip[12..16] == src.octets()
        && ip[16..20] == dst.octets()
        && icmp[0] == 0
        && internet_checksum(icmp) == 0
        && icmp[6..8] == seq.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinet_endpoint::MacAddr;

    const HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 2);
    const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 1);

    #[test]
    fn responder_replies_pass_validation() {
        let responder = Responder::new(MacAddr::default(), HOST);
        let peer_mac: MacAddr = "a6:99:91:ad:9d:6f".parse().unwrap();

        let arp = responder.respond(&arp_request(peer_mac, PEER, HOST)).unwrap();
        assert!(is_arp_reply(&arp, HOST));

        let echo = echo_request(peer_mac, MacAddr::default(), PEER, HOST, ECHO_IDENT, 4, b"hi");
        let reply = responder.respond(&echo).unwrap();
        assert!(is_echo_reply(&reply, HOST, PEER, 4));
        assert!(!is_echo_reply(&reply, HOST, PEER, 5));
    }

    #[test]
    fn requests_are_not_mistaken_for_replies() {
        let peer_mac = MacAddr::default();
        assert!(!is_arp_reply(&arp_request(peer_mac, PEER, HOST), PEER));
        let echo = echo_request(peer_mac, peer_mac, PEER, HOST, ECHO_IDENT, 1, b"x");
        assert!(!is_echo_reply(&echo, PEER, HOST, 1));
        assert!(!is_echo_reply(&[0u8; 10], HOST, PEER, 1));
    }
}
