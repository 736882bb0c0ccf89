//! IPv4 CIDR subnet matching.

use crate::transport::TransportError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: u32,
    prefix: u8,
}

impl Subnet {
    /// Network containing `addr` with the given prefix length (clamped to 32)
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        let prefix = prefix.min(32);
        Self {
            network: u32::from(addr) & mask_for(prefix),
            prefix,
        }
    }

    /// Network from an address and a dotted netmask such as `255.255.255.0`.
    ///
    /// # Errors
    /// Fails if the netmask bits are not contiguous.
    pub fn from_netmask(addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self, TransportError> {
        let bits = u32::from(netmask);
        let prefix = bits.leading_ones();
        if bits.checked_shl(prefix).unwrap_or(0) != 0 {
            return Err(TransportError::InvalidConfig(format!(
                "netmask {netmask} is not contiguous"
            )));
        }
        Ok(Self::new(addr, prefix as u8))
    }

    /// A subnet accepting every address
    pub fn any() -> Self {
        Self {
            network: 0,
            prefix: 0,
        }
    }

    /// Whether `addr` lies inside this network
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_for(self.prefix) == self.network
    }

    /// Prefix length
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Network address
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Directed broadcast address of this network
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !mask_for(self.prefix))
    }
}

fn mask_for(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

impl FromStr for Subnet {
    type Err = TransportError;

    /// Accepts `a.b.c.d/nn` or `a.b.c.d/255.255.255.0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TransportError::InvalidConfig(format!("invalid subnet: {s}"));
        let (addr, mask) = s.split_once('/').ok_or_else(bad)?;
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| bad())?;
        let mask = mask.trim();
        if mask.contains('.') {
            let netmask: Ipv4Addr = mask.parse().map_err(|_| bad())?;
            Self::from_netmask(addr, netmask)
        } else {
            let prefix: u8 = mask.parse().map_err(|_| bad())?;
            if prefix > 32 {
                return Err(bad());
            }
            Ok(Self::new(addr, prefix))
        }
    }
}
