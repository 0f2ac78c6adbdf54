//! Network-interface surface over a [`Transport`].
//!
//! The link is a fixed point-to-point wire: always up, always full duplex at a
//! nominal 10 Mbps. Mode setters accept what the wire can do and refuse the
//! rest.

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::adapter::Transport;
use crate::error::{EndpointError, Result};

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; 6]);

    pub const fn octets(self) -> [u8; 6] {
        self.0
    }
}

impl Default for MacAddr {
    fn default() -> Self {
        Self([0x51, 0x80, 0x21, 0xfe, 0xad, 0xd2])
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EndpointError::Config(format!("invalid MAC address '{s}'"));
        let mut octets = [0u8; 6];
        let mut parts = s.split(|c: char| c == ':' || c == '-');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(value: MacAddr) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Speed {
    #[serde(rename = "10M")]
    Mbps10,
    #[serde(rename = "100M")]
    Mbps100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    Half,
    Full,
}

/// A network interface bound to one transport.
pub struct NetInterface<T> {
    transport: T,
    mac: Mutex<MacAddr>,
}

impl<T: Transport> NetInterface<T> {
    pub fn new(transport: T, mac: MacAddr) -> Self {
        Self {
            transport,
            mac: Mutex::new(mac),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn mac_addr(&self) -> MacAddr {
        *self.mac.lock()
    }

    pub fn set_mac_addr(&self, mac: MacAddr) {
        *self.mac.lock() = mac;
        tracing::debug!(%mac, "hardware address updated");
    }

    pub fn link_state(&self) -> LinkState {
        LinkState::Up
    }

    pub fn speed(&self) -> Speed {
        Speed::Mbps10
    }

    pub fn duplex(&self) -> Duplex {
        Duplex::Full
    }

    pub fn set_speed(&self, speed: Speed) -> Result<()> {
        match speed {
            Speed::Mbps10 => {
                tracing::info!("link speed 10Mbps");
                Ok(())
            }
            Speed::Mbps100 => Err(EndpointError::Unsupported(format!(
                "link speed {speed:?}"
            ))),
        }
    }

    /// Accepted and ignored.
    pub fn set_duplex(&self, duplex: Duplex) -> Result<()> {
        tracing::debug!(?duplex, "duplex request ignored");
        Ok(())
    }

    /// Accepted and ignored.
    pub fn set_promiscuous(&self, enable: bool) -> Result<()> {
        tracing::debug!(enable, "promiscuous request ignored");
        Ok(())
    }

    /// The wire has no carrier to toggle; the request is only logged.
    pub fn set_link(&self, state: LinkState) {
        match state {
            LinkState::Up => tracing::info!("link up"),
            LinkState::Down => tracing::info!("link down"),
        }
    }

    /// Transmit one Ethernet frame.
    pub fn transmit(&self, frame: &[u8]) -> Result<()> {
        if !self.transport.can_send() {
            return Err(EndpointError::Busy);
        }
        self.transport.send(frame)
    }
}

impl<T> fmt::Debug for NetInterface<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetInterface")
            .field("mac", &*self.mac.lock())
            .finish_non_exhaustive()
    }
}
