//! Operator-managed whitelist and blacklist

use super::index::{parse_network, PrefixIndex};
use crate::error::{Result, ValidationError, WafError};
use crate::model::{AccessStatus, EntryId, IpEntry, ListType, NewIpEntry};
use arc_swap::ArcSwap;
use chrono::Utc;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: IpEntry,
    network: IpNet,
}

/// Immutable state swapped in whole on every edit
#[derive(Debug, Clone, Default)]
struct AccessSnapshot {
    entries: Vec<StoredEntry>,
    whitelist: PrefixIndex,
    blacklist: PrefixIndex,
}

impl AccessSnapshot {
    fn index_mut(&mut self, list: ListType) -> &mut PrefixIndex {
        match list {
            ListType::Whitelist => &mut self.whitelist,
            ListType::Blacklist => &mut self.blacklist,
        }
    }

    fn index(&self, list: ListType) -> &PrefixIndex {
        match list {
            ListType::Whitelist => &self.whitelist,
            ListType::Blacklist => &self.blacklist,
        }
    }

    fn status(&self, ip: IpAddr) -> AccessStatus {
        if self.whitelist.matches(ip) {
            AccessStatus::Whitelisted
        } else if self.blacklist.matches(ip) {
            AccessStatus::Blacklisted
        } else {
            AccessStatus::Unlisted
        }
    }

    fn entry_for(&self, ip: IpAddr, list: ListType) -> Option<IpEntry> {
        self.entries
            .iter()
            .find(|stored| stored.entry.list_type == list && stored.network.contains(&ip))
            .map(|stored| stored.entry.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessCounts {
    pub whitelist: usize,
    pub blacklist: usize,
}

/// IP access lists consulted before any rule.
///
/// Reads load the current snapshot without locking; edits are serialized by
/// a writer lock and publish a fresh snapshot.
///
/// An address present on both lists is reported as whitelisted: operators use
/// the whitelist as an emergency override.
#[derive(Debug)]
pub struct AccessList {
    snapshot: ArcSwap<AccessSnapshot>,
    writer: Mutex<()>,
    next_id: AtomicU64,
}

impl AccessList {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(AccessSnapshot::default()),
            writer: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a list from seed entries, keeping their ids
    pub fn from_entries(entries: impl IntoIterator<Item = IpEntry>) -> Result<Self> {
        let mut snapshot = AccessSnapshot::default();
        let mut max_id: u64 = 0;

        for entry in entries {
            let network = parse_network(&entry.address).ok_or_else(|| WafError::InvalidAddress {
                address: entry.address.clone(),
            })?;
            if !snapshot.index_mut(entry.list_type).insert(network) {
                return Err(WafError::DuplicateEntry {
                    address: entry.address.clone(),
                    list: entry.list_type.to_string(),
                });
            }
            max_id = max_id.max(entry.id);
            snapshot.entries.push(StoredEntry { entry, network });
        }

        let next_id = max_id
            .checked_add(1)
            .ok_or(ValidationError::IdExhausted { kind: "Access entry", id: max_id })?;

        Ok(Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
            next_id: AtomicU64::new(next_id),
        })
    }

    /// Classify an address against both lists.
    ///
    /// IPv4-mapped IPv6 sources are looked up as their IPv4 address.
    pub fn query(&self, ip: IpAddr) -> AccessStatus {
        self.snapshot.load().status(ip.to_canonical())
    }

    /// The entry responsible for `query(ip)`, whitelist first
    pub fn find(&self, ip: IpAddr) -> Option<IpEntry> {
        self.lookup(ip).1
    }

    /// Status and the entry behind it, read from one snapshot
    pub fn lookup(&self, ip: IpAddr) -> (AccessStatus, Option<IpEntry>) {
        let ip = ip.to_canonical();
        let snapshot = self.snapshot.load();
        let status = snapshot.status(ip);
        let entry = match status {
            AccessStatus::Whitelisted => snapshot.entry_for(ip, ListType::Whitelist),
            AccessStatus::Blacklisted => snapshot.entry_for(ip, ListType::Blacklist),
            AccessStatus::Unlisted => None,
        };
        (status, entry)
    }

    pub fn add(&self, new: NewIpEntry) -> Result<IpEntry> {
        let network = parse_network(&new.address).ok_or_else(|| WafError::InvalidAddress {
            address: new.address.clone(),
        })?;

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot.load();

        if current.index(new.list_type).contains_network(network) {
            return Err(WafError::DuplicateEntry {
                address: new.address,
                list: new.list_type.to_string(),
            });
        }

        let entry = IpEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            address: new.address.trim().to_string(),
            list_type: new.list_type,
            note: new.note,
            added_at: new.added_at.unwrap_or_else(Utc::now),
        };

        let mut next = AccessSnapshot::clone(&current);
        next.index_mut(entry.list_type).insert(network);
        next.entries.push(StoredEntry {
            entry: entry.clone(),
            network,
        });
        self.snapshot.store(Arc::new(next));

        info!("Added {} entry {} ({})", entry.list_type, entry.address, entry.id);
        Ok(entry)
    }

    pub fn remove(&self, id: EntryId) -> Result<IpEntry> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot.load();

        let position = current
            .entries
            .iter()
            .position(|stored| stored.entry.id == id)
            .ok_or_else(|| WafError::entry_not_found(id))?;

        let mut next = AccessSnapshot::clone(&current);
        let removed = next.entries.remove(position);
        next.index_mut(removed.entry.list_type).remove(removed.network);
        self.snapshot.store(Arc::new(next));

        info!(
            "Removed {} entry {} ({})",
            removed.entry.list_type, removed.entry.address, removed.entry.id
        );
        Ok(removed.entry)
    }

    /// All entries in insertion order
    pub fn entries(&self) -> Vec<IpEntry> {
        self.snapshot
            .load()
            .entries
            .iter()
            .map(|stored| stored.entry.clone())
            .collect()
    }

    /// Entries whose address contains `needle`
    pub fn filter(&self, needle: &str) -> Vec<IpEntry> {
        self.snapshot
            .load()
            .entries
            .iter()
            .filter(|stored| stored.entry.address.contains(needle))
            .map(|stored| stored.entry.clone())
            .collect()
    }

    pub fn counts(&self) -> AccessCounts {
        let snapshot = self.snapshot.load();
        let whitelist = snapshot
            .entries
            .iter()
            .filter(|stored| stored.entry.list_type == ListType::Whitelist)
            .count();
        AccessCounts {
            whitelist,
            blacklist: snapshot.entries.len() - whitelist,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AccessList {
    fn default() -> Self {
        Self::new()
    }
}
