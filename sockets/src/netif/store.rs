//! Configuration store access.
//!
//! The hypervisor publishes the guest's virtual interfaces in a key/value
//! store:
//!
//! ```text
//! domid                                      → <dom>
//! /local/domain/0/backend/vif/<dom>/<n>      → present for each vif n
//! /local/domain/0/backend/vif/<dom>/<n>/ip   → optional dotted quad
//! ```

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use core::net::Ipv4Addr;

/// Read-only view of a key/value configuration store.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigStore {
    /// Value stored under `key`, if any.
    fn read(&self, key: &str) -> Option<String>;
}

/// Virtual interface lookups over a [`ConfigStore`].
pub struct VifCatalog<'a> {
    store: &'a dyn ConfigStore,
}

impl<'a> VifCatalog<'a> {
    pub fn new(store: &'a dyn ConfigStore) -> Self {
        Self { store }
    }

    /// Domain id of this guest.
    pub fn domain_id(&self) -> Option<u32> {
        self.store.read("domid")?.trim().parse().ok()
    }

    /// Number of vifs, counted from 0 until the first missing entry.
    pub fn vif_count(&self, dom: u32) -> u32 {
        let mut n = 0;
        while self.store.read(&vif_path(dom, n)).is_some() {
            n += 1;
        }
        n
    }

    /// Address assigned to vif `n`, if the store has a usable one.
    pub fn vif_ip(&self, dom: u32, n: u32) -> Option<Ipv4Addr> {
        let key = format!("{}/ip", vif_path(dom, n));
        self.store.read(&key)?.trim().parse().ok()
    }

    /// Vif carrying `addr`, or with `0.0.0.0` the first vif with any
    /// address. Returns the vif and the address found.
    pub fn find_ip(&self, addr: Ipv4Addr) -> Option<(u32, Ipv4Addr)> {
        let dom = self.domain_id()?;
        (0..self.vif_count(dom)).find_map(|n| {
            let ip = self.vif_ip(dom, n)?;
            (addr.is_unspecified() || ip == addr).then_some((n, ip))
        })
    }

    /// First vif at or after `offset` without an address.
    pub fn find_next_noip(&self, offset: u32) -> Option<u32> {
        let dom = self.domain_id()?;
        (offset..self.vif_count(dom)).find(|&n| {
            let key = format!("{}/ip", vif_path(dom, n));
            self.store.read(&key).is_none()
        })
    }
}

fn vif_path(dom: u32, n: u32) -> String {
    format!("/local/domain/0/backend/vif/{}/{}", dom, n)
}

/// In-memory store, for hosted runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store describing domain `dom` with one vif per entry of `ips`.
    pub fn with_vifs(dom: u32, ips: &[Option<Ipv4Addr>]) -> Self {
        let mut store = Self::new();
        store.insert("domid", &format!("{}", dom));
        for (n, ip) in (0u32..).zip(ips) {
            let path = vif_path(dom, n);
            store.insert(&path, "0");
            if let Some(ip) = ip {
                store.insert(&format!("{}/ip", path), &format!("{}", ip));
            }
        }
        store
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries.insert(String::from(key), String::from(value));
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

impl ConfigStore for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}
