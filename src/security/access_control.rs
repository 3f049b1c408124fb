//! Peer admission by address.
//!
//! The worker asks an [`AddressFilter`] once per dequeued session. The
//! stock implementation is [`AllowList`], built from the `only_from`
//! configuration entries: single addresses or CIDR networks of either
//! family. An empty list admits everyone.

use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

/// Predicate deciding whether a peer may receive a reply.
pub trait AddressFilter: Send + Sync {
    /// `ip` is the textual peer address as reported by the session.
    fn is_ip_address_allowed(&self, ip: &str) -> bool;
}

impl<F> AddressFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_ip_address_allowed(&self, ip: &str) -> bool {
        self(ip)
    }
}

/// Error for an `only_from` entry that cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid network '{0}'")]
pub struct NetworkParseError(pub String);

/// An address with a prefix length; a bare address has a full-length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, unmap(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix))
                    .unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for Network {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || NetworkParseError(s.to_string());
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };

        let addr = unmap(addr.parse::<IpAddr>().map_err(|_| err())?);
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| err())?,
            None => max,
        };
        if prefix > max {
            return Err(err());
        }

        Ok(Self { addr, prefix })
    }
}

/// IPv4-mapped IPv6 addresses compare as their IPv4 form.
fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Allow-list built from configuration.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    networks: Vec<Network>,
}

impl AllowList {
    /// An allow-list that admits every peer.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse configuration entries; fails on the first unparsable one.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, NetworkParseError> {
        let networks = entries
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl AddressFilter for AllowList {
    fn is_ip_address_allowed(&self, ip: &str) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        match ip.parse::<IpAddr>() {
            Ok(ip) => self.networks.iter().any(|n| n.contains(ip)),
            Err(_) => {
                tracing::debug!(ip, "Peer address does not parse, denying");
                false
            }
        }
    }
}
