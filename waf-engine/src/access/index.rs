//! Prefix-indexed address matching

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

/// Parse an access list address: an IP literal or a CIDR block.
///
/// Literals become host networks (/32 or /128); an IPv4-mapped IPv6 literal
/// is stored as its IPv4 address. CIDR blocks are truncated to their network
/// address so `10.1.2.3/8` and `10.0.0.0/8` are the same entry.
pub fn parse_network(address: &str) -> Option<IpNet> {
    let address = address.trim();
    if address.contains('/') {
        return address.parse::<IpNet>().ok().map(|net| net.trunc());
    }

    let ip = address.parse::<IpAddr>().ok()?.to_canonical();
    let host_len = match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    IpNet::new(ip, host_len).ok()
}

/// Networks grouped by prefix length.
///
/// A lookup truncates the address once per distinct prefix length present and
/// looks up a hash set, so cost tracks the number of prefix lengths in use
/// (at most 33 for IPv4, 129 for IPv6) rather than the number of networks.
#[derive(Debug, Clone, Default)]
pub struct PrefixIndex {
    ipv4: BTreeMap<u8, HashSet<Ipv4Net>>,
    ipv6: BTreeMap<u8, HashSet<Ipv6Net>>,
}

impl PrefixIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a network; returns false if it was already present
    pub fn insert(&mut self, net: IpNet) -> bool {
        match net.trunc() {
            IpNet::V4(net) => self.ipv4.entry(net.prefix_len()).or_default().insert(net),
            IpNet::V6(net) => self.ipv6.entry(net.prefix_len()).or_default().insert(net),
        }
    }

    pub fn remove(&mut self, net: IpNet) -> bool {
        match net.trunc() {
            IpNet::V4(net) => remove_from(&mut self.ipv4, net.prefix_len(), &net),
            IpNet::V6(net) => remove_from(&mut self.ipv6, net.prefix_len(), &net),
        }
    }

    pub fn contains_network(&self, net: IpNet) -> bool {
        match net.trunc() {
            IpNet::V4(net) => self
                .ipv4
                .get(&net.prefix_len())
                .is_some_and(|set| set.contains(&net)),
            IpNet::V6(net) => self
                .ipv6
                .get(&net.prefix_len())
                .is_some_and(|set| set.contains(&net)),
        }
    }

    /// Check whether any indexed network contains the address
    pub fn matches(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(addr) => self.ipv4.iter().any(|(len, nets)| {
                Ipv4Net::new(addr, *len)
                    .map(|net| nets.contains(&net.trunc()))
                    .unwrap_or(false)
            }),
            IpAddr::V6(addr) => self.ipv6.iter().any(|(len, nets)| {
                Ipv6Net::new(addr, *len)
                    .map(|net| nets.contains(&net.trunc()))
                    .unwrap_or(false)
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

fn remove_from<N: std::hash::Hash + Eq>(
    buckets: &mut BTreeMap<u8, HashSet<N>>,
    len: u8,
    net: &N,
) -> bool {
    let Some(set) = buckets.get_mut(&len) else {
        return false;
    };
    let removed = set.remove(net);
    if set.is_empty() {
        buckets.remove(&len);
    }
    removed
}
