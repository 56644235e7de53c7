//! Address value types shared by the topology, the address plan and the
//! controller protocol.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// An Ethernet MAC address.
///
/// Parses case-insensitively (`00:00:00:00:00:B1`) and always renders in
/// lowercase, which is the form the controller reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The Mininet-style default MAC for the host at `index` (0-based).
    pub fn sequential(index: usize) -> Self {
        let n = (index as u64 + 1).to_be_bytes();
        Self([n[2], n[3], n[4], n[5], n[6], n[7]])
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidConfig(format!("invalid MAC address '{s}'"));
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl TryFrom<String> for MacAddr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// An IPv4 address with its prefix length, e.g. `10.0.0.1/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> crate::Result<Self> {
        if prefix > 32 {
            return Err(Error::InvalidConfig(format!(
                "prefix length {prefix} is out of range"
            )));
        }
        Ok(Self { addr, prefix })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    /// The network this address belongs to, with host bits cleared.
    pub fn network(&self) -> Ipv4Cidr {
        Ipv4Cidr {
            addr: Ipv4Addr::from(u32::from(self.addr) & self.mask_bits()),
            prefix: self.prefix,
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask_bits() == u32::from(self.addr) & self.mask_bits()
    }

    fn mask_bits(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidConfig(format!("invalid IPv4 CIDR '{s}'"));
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Ipv4Cidr::new(addr, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

/// An OpenFlow datapath identifier.
///
/// Written as a hex string the way Mininet accepts it (`dpid = "2"`), or as
/// a plain integer in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "DpidRepr", into = "String")]
pub struct Dpid(u64);

impl Dpid {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl FromStr for Dpid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim_start_matches("0x");
        if digits.is_empty() || digits.len() > 16 {
            return Err(Error::InvalidConfig(format!("invalid datapath id '{s}'")));
        }
        u64::from_str_radix(digits, 16)
            .map(Dpid)
            .map_err(|_| Error::InvalidConfig(format!("invalid datapath id '{s}'")))
    }
}

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<Dpid> for String {
    fn from(dpid: Dpid) -> Self {
        dpid.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DpidRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<DpidRepr> for Dpid {
    type Error = Error;

    fn try_from(value: DpidRepr) -> Result<Self, Self::Error> {
        match value {
            DpidRepr::Number(n) => Ok(Dpid(n)),
            DpidRepr::Text(s) => s.parse(),
        }
    }
}

/// Where a switch's OpenFlow control channel should connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ControllerEndpoint(SocketAddr);

impl ControllerEndpoint {
    pub const DEFAULT_OPENFLOW_PORT: u16 = 6653;

    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    /// The target string understood by Open vSwitch, e.g. `tcp:127.0.0.1:6653`.
    pub fn ovs_target(&self) -> String {
        format!("tcp:{}", self.0)
    }
}

impl FromStr for ControllerEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("tcp:").unwrap_or(s);
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self(addr));
        }
        // Bare address: use the standard OpenFlow port.
        s.parse::<std::net::IpAddr>()
            .map(|ip| Self(SocketAddr::new(ip, Self::DEFAULT_OPENFLOW_PORT)))
            .map_err(|_| Error::InvalidConfig(format!("invalid controller endpoint '{s}'")))
    }
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ControllerEndpoint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ControllerEndpoint> for String {
    fn from(endpoint: ControllerEndpoint) -> Self {
        endpoint.to_string()
    }
}
