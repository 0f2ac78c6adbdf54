//! Minimal ARP / ICMP echo responder.
//!
//! Lets one side of a link be exercised without a network stack: frames sent
//! through a [`LoopbackTransport`] are answered locally and the replies are
//! delivered to the adapter as if they had come from the wire.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::adapter::{Adapter, Transport};
use crate::error::Result;
use crate::netif::MacAddr;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

const ETH_HEADER_LEN: usize = 14;
const ARP_LEN: usize = 28;
const IPV4_MIN_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;

const IP_PROTO_ICMP: u8 = 1;
const IP_FLAG_DF: u16 = 0x4000;
const IP_TTL: u8 = 64;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;

/// RFC 1071 ones' complement checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair[1]])))
        .sum();
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_ipv4(data: &[u8], offset: usize) -> Option<Ipv4Addr> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(Ipv4Addr::from(bytes))
}

/// Answers ARP requests and ICMP echo requests addressed to one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Responder {
    mac: MacAddr,
    ip: Ipv4Addr,
}

impl Responder {
    pub fn new(mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self { mac, ip }
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Build the reply to `frame`, if it calls for one.
    pub fn respond(&self, frame: &[u8]) -> Option<Bytes> {
        match read_u16(frame, 12)? {
            ETHERTYPE_ARP => self.arp_reply(frame),
            ETHERTYPE_IPV4 => self.echo_reply(frame),
            other => {
                trace!(ethertype = other, "ignoring frame");
                None
            }
        }
    }

    fn arp_reply(&self, frame: &[u8]) -> Option<Bytes> {
        let arp = frame.get(ETH_HEADER_LEN..ETH_HEADER_LEN + ARP_LEN)?;
        if read_u16(arp, 0)? != ARP_HTYPE_ETHERNET
            || read_u16(arp, 2)? != ETHERTYPE_IPV4
            || arp[4] != 6
            || arp[5] != 4
        {
            return None;
        }
        if read_u16(arp, 6)? != ARP_OP_REQUEST {
            trace!("ignoring non-request ARP");
            return None;
        }
        let sender_mac = &arp[8..14];
        let sender_ip = &arp[14..18];
        if read_ipv4(arp, 24)? != self.ip {
            return None;
        }

        let mut reply = BytesMut::with_capacity(ETH_HEADER_LEN + ARP_LEN);
        reply.put_slice(sender_mac);
        reply.put_slice(&self.mac.octets());
        reply.put_u16(ETHERTYPE_ARP);
        reply.put_u16(ARP_HTYPE_ETHERNET);
        reply.put_u16(ETHERTYPE_IPV4);
        reply.put_u8(6);
        reply.put_u8(4);
        reply.put_u16(ARP_OP_REPLY);
        reply.put_slice(&self.mac.octets());
        reply.put_slice(&self.ip.octets());
        reply.put_slice(sender_mac);
        reply.put_slice(sender_ip);

        debug!(ip = %self.ip, "answering ARP request");
        Some(reply.freeze())
    }

    fn echo_reply(&self, frame: &[u8]) -> Option<Bytes> {
        let ip = frame.get(ETH_HEADER_LEN..)?;
        let version_ihl = *ip.first()?;
        let ihl = usize::from(version_ihl & 0x0f) * 4;
        if version_ihl >> 4 != 4 || ihl < IPV4_MIN_HEADER_LEN {
            return None;
        }
        let total_len = usize::from(read_u16(ip, 2)?);
        if total_len < ihl + ICMP_HEADER_LEN || total_len > ip.len() {
            return None;
        }
        if ip[9] != IP_PROTO_ICMP || read_ipv4(ip, 16)? != self.ip {
            return None;
        }
        let icmp = &ip[ihl..total_len];
        if icmp[0] != ICMP_ECHO_REQUEST {
            return None;
        }

        let ip_id = read_u16(ip, 4)?;
        let source = read_ipv4(ip, 12)?;
        let reply_ip_len = IPV4_MIN_HEADER_LEN + icmp.len();
        let total = u16::try_from(reply_ip_len).ok()?;

        let mut reply = BytesMut::with_capacity(ETH_HEADER_LEN + reply_ip_len);
        reply.put_slice(&frame[6..12]);
        reply.put_slice(&self.mac.octets());
        reply.put_u16(ETHERTYPE_IPV4);

        let ip_start = reply.len();
        reply.put_u8(0x45);
        reply.put_u8(0);
        reply.put_u16(total);
        reply.put_u16(ip_id);
        reply.put_u16(IP_FLAG_DF);
        reply.put_u8(IP_TTL);
        reply.put_u8(IP_PROTO_ICMP);
        reply.put_u16(0);
        reply.put_slice(&self.ip.octets());
        reply.put_slice(&source.octets());
        let ip_checksum = internet_checksum(&reply[ip_start..]);
        reply[ip_start + 10..ip_start + 12].copy_from_slice(&ip_checksum.to_be_bytes());

        let icmp_start = reply.len();
        reply.put_u8(ICMP_ECHO_REPLY);
        reply.put_u8(icmp[1]);
        reply.put_u16(0);
        reply.put_slice(&icmp[4..]);
        let icmp_checksum = internet_checksum(&reply[icmp_start..]);
        reply[icmp_start + 2..icmp_start + 4].copy_from_slice(&icmp_checksum.to_be_bytes());

        debug!(%source, len = icmp.len() - ICMP_HEADER_LEN, "answering echo request");
        Some(reply.freeze())
    }
}

/// A [`Transport`] that never touches a wire: outgoing frames are answered by
/// a [`Responder`] and the replies delivered straight to the adapter.
pub struct LoopbackTransport {
    responder: Responder,
    adapter: Arc<dyn Adapter>,
    replies: AtomicU64,
}

impl LoopbackTransport {
    pub fn new(responder: Responder, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            responder,
            adapter,
            replies: AtomicU64::new(0),
        }
    }

    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, payload: &[u8]) -> Result<()> {
        if let Some(reply) = self.responder.respond(payload) {
            self.replies.fetch_add(1, Ordering::Relaxed);
            self.adapter.deliver_frame(reply);
        }
        Ok(())
    }

    fn can_send(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("responder", &self.responder)
            .field("replies", &self.replies())
            .finish()
    }
}

/// Build an Ethernet/IPv4 ICMP echo request. Used by the CLI and tests to
/// drive a responder.
pub fn echo_request(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    ident: u16,
    sequence: u16,
    data: &[u8],
) -> Bytes {
    let ip_len = IPV4_MIN_HEADER_LEN + ICMP_HEADER_LEN + data.len();
    let mut frame = BytesMut::with_capacity(ETH_HEADER_LEN + ip_len);
    frame.put_slice(&dst_mac.octets());
    frame.put_slice(&src_mac.octets());
    frame.put_u16(ETHERTYPE_IPV4);

    let ip_start = frame.len();
    frame.put_u8(0x45);
    frame.put_u8(0);
    frame.put_u16(ip_len as u16);
    frame.put_u16(sequence);
    frame.put_u16(IP_FLAG_DF);
    frame.put_u8(IP_TTL);
    frame.put_u8(IP_PROTO_ICMP);
    frame.put_u16(0);
    frame.put_slice(&src_ip.octets());
    frame.put_slice(&dst_ip.octets());
    let checksum = internet_checksum(&frame[ip_start..]);
    frame[ip_start + 10..ip_start + 12].copy_from_slice(&checksum.to_be_bytes());

    let icmp_start = frame.len();
    frame.put_u8(ICMP_ECHO_REQUEST);
    frame.put_u8(0);
    frame.put_u16(0);
    frame.put_u16(ident);
    frame.put_u16(sequence);
    frame.put_slice(data);
    let checksum = internet_checksum(&frame[icmp_start..]);
    frame[icmp_start + 2..icmp_start + 4].copy_from_slice(&checksum.to_be_bytes());

    frame.freeze()
}

/// Build an Ethernet ARP request asking for `target_ip`.
pub fn arp_request(src_mac: MacAddr, src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Bytes {
    let mut frame = BytesMut::with_capacity(ETH_HEADER_LEN + ARP_LEN);
    frame.put_slice(&MacAddr::BROADCAST.octets());
    frame.put_slice(&src_mac.octets());
    frame.put_u16(ETHERTYPE_ARP);
    frame.put_u16(ARP_HTYPE_ETHERNET);
    frame.put_u16(ETHERTYPE_IPV4);
    frame.put_u8(6);
    frame.put_u8(4);
    frame.put_u16(ARP_OP_REQUEST);
    frame.put_slice(&src_mac.octets());
    frame.put_slice(&src_ip.octets());
    frame.put_bytes(0, 6);
    frame.put_slice(&target_ip.octets());
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ChannelAdapter;

    const HOST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 1);
    const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 2);

    fn host_mac() -> MacAddr {
        MacAddr([0xa6, 0x99, 0x91, 0xad, 0x9d, 0x6f])
    }

    fn responder() -> Responder {
        Responder::new(MacAddr::default(), LOCAL_IP)
    }

    #[test]
    fn checksum_known_header() {
        // Classic example header from RFC 1071 discussions.
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(internet_checksum(&header), 0xb861);
    }

    #[test]
    fn checksum_odd_length() {
        assert_eq!(internet_checksum(&[0x01]), !0x0100);
        assert_eq!(internet_checksum(&[]), 0xffff);
    }

    #[test]
    fn answers_arp_for_own_address() {
        let request = arp_request(host_mac(), HOST_IP, LOCAL_IP);
        let reply = responder().respond(&request).unwrap();

        assert_eq!(reply.len(), 42);
        assert_eq!(&reply[0..6], &host_mac().octets());
        assert_eq!(&reply[6..12], &MacAddr::default().octets());
        assert_eq!(read_u16(&reply, 12), Some(ETHERTYPE_ARP));
        assert_eq!(read_u16(&reply, 20), Some(ARP_OP_REPLY));
        assert_eq!(&reply[22..28], &MacAddr::default().octets());
        assert_eq!(read_ipv4(&reply, 28), Some(LOCAL_IP));
        assert_eq!(&reply[32..38], &host_mac().octets());
        assert_eq!(read_ipv4(&reply, 38), Some(HOST_IP));
    }

    #[test]
    fn ignores_arp_for_other_address() {
        let request = arp_request(host_mac(), HOST_IP, Ipv4Addr::new(192, 168, 2, 9));
        assert!(responder().respond(&request).is_none());
    }

    #[test]
    fn answers_echo_request() {
        let request = echo_request(host_mac(), MacAddr::default(), HOST_IP, LOCAL_IP, 0x1234, 7, b"abcdefgh");
        let reply = responder().respond(&request).unwrap();

        assert_eq!(reply.len(), request.len());
        assert_eq!(&reply[0..6], &host_mac().octets());
        assert_eq!(read_u16(&reply, 12), Some(ETHERTYPE_IPV4));

        let ip = &reply[ETH_HEADER_LEN..];
        assert_eq!(internet_checksum(&ip[..20]), 0);
        assert_eq!(ip[8], IP_TTL);
        assert_eq!(read_ipv4(ip, 12), Some(LOCAL_IP));
        assert_eq!(read_ipv4(ip, 16), Some(HOST_IP));

        let icmp = &ip[20..];
        assert_eq!(internet_checksum(icmp), 0);
        assert_eq!(icmp[0], ICMP_ECHO_REPLY);
        assert_eq!(read_u16(icmp, 4), Some(0x1234));
        assert_eq!(read_u16(icmp, 6), Some(7));
        assert_eq!(&icmp[8..], b"abcdefgh");
    }

    #[test]
    fn echo_request_builder_checksums() {
        let request = echo_request(host_mac(), MacAddr::default(), HOST_IP, LOCAL_IP, 1, 1, b"odd");
        let ip = &request[ETH_HEADER_LEN..];
        assert_eq!(internet_checksum(&ip[..20]), 0);
        assert_eq!(internet_checksum(&ip[20..]), 0);
    }

    #[test]
    fn ignores_echo_for_other_host_and_garbage() {
        let request = echo_request(host_mac(), MacAddr::default(), HOST_IP, Ipv4Addr::new(10, 0, 0, 1), 1, 1, b"");
        assert!(responder().respond(&request).is_none());

        assert!(responder().respond(&[]).is_none());
        assert!(responder().respond(&[0u8; 13]).is_none());
        let mut truncated = echo_request(host_mac(), MacAddr::default(), HOST_IP, LOCAL_IP, 1, 1, b"x").to_vec();
        truncated.truncate(30);
        assert!(responder().respond(&truncated).is_none());
    }

    #[test]
    fn ignores_echo_reply() {
        let request = echo_request(host_mac(), MacAddr::default(), HOST_IP, LOCAL_IP, 1, 1, b"x");
        let reply = responder().respond(&request).unwrap();
        // Aim the reply back at the responder itself.
        let mirrored = Responder::new(host_mac(), HOST_IP);
        assert!(mirrored.respond(&reply).is_none());
    }

    #[test]
    fn loopback_transport_delivers_replies() {
        let (adapter, rx) = ChannelAdapter::new(4);
        let transport = LoopbackTransport::new(responder(), Arc::new(adapter));

        assert!(transport.can_send());
        transport.send(&arp_request(host_mac(), HOST_IP, LOCAL_IP)).unwrap();
        transport.send(b"not an ethernet frame").unwrap();

        assert_eq!(transport.replies(), 1);
        assert_eq!(rx.try_recv().unwrap().len(), 42);
        assert!(rx.try_recv().is_err());
    }
}
