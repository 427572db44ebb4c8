//! Interface registry.
//!
//! Tracks the interfaces brought up on the engine, answers whether an
//! address can be bound, and picks a virtual interface and address for new
//! interfaces from the configuration store. The first interface added
//! becomes the engine's default route.

pub mod store;

use alloc::vec::Vec;
use core::net::Ipv4Addr;

use log::info;

use crate::engine::ProtocolEngine;
use crate::error::ConfigError;

pub use store::{ConfigStore, MemoryStore, VifCatalog};

/// One configured interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    /// Position in the registry.
    pub id: usize,
    /// Backing virtual interface.
    pub vif: u32,
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Interface {
    /// Directed broadcast address of the interface's subnet.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !u32::from(self.mask))
    }

    /// Whether `addr` is a broadcast address on this interface.
    pub fn is_broadcast(&self, addr: Ipv4Addr) -> bool {
        if addr.is_broadcast() || addr.is_unspecified() {
            return true;
        }
        let mask = u32::from(self.mask);
        let same_net = u32::from(addr) & mask == u32::from(self.addr) & mask;
        mask != u32::MAX && same_net && addr == self.broadcast()
    }
}

/// Interface table plus the vif search state.
#[derive(Debug)]
pub struct InterfaceRegistry {
    interfaces: Vec<Interface>,
    max: usize,
    /// Next vif to try when looking for one without an address.
    noip_offset: u32,
}

impl InterfaceRegistry {
    pub fn new(max: usize) -> Self {
        Self {
            interfaces: Vec::new(),
            max,
            noip_offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Interface> {
        self.interfaces.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    /// Whether an existing interface can carry a socket bound to `addr`.
    pub fn is_bindable(&self, addr: Ipv4Addr) -> bool {
        if addr.is_link_local() {
            return true;
        }
        if self.interfaces.is_empty() {
            return false;
        }
        if addr.is_unspecified() || addr.is_multicast() {
            return true;
        }
        self.interfaces
            .iter()
            .any(|netif| netif.is_broadcast(addr) || netif.addr == addr)
    }

    /// Bring up a new interface for `addr`.
    ///
    /// A vif whose store entry carries `addr` is preferred; `0.0.0.0` takes
    /// the first vif with any address. Failing that, the next vif without
    /// an address is used, with `addr` itself or `fallback` for `0.0.0.0`.
    pub fn add(
        &mut self,
        engine: &mut dyn ProtocolEngine,
        store: &dyn ConfigStore,
        addr: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        fallback: Ipv4Addr,
    ) -> Result<usize, ConfigError> {
        if self.interfaces.len() >= self.max {
            return Err(ConfigError::TooManyInterfaces);
        }

        let catalog = VifCatalog::new(store);
        let (vif, found) = match catalog.find_ip(addr) {
            Some((vif, ip)) => (vif, Some(ip)),
            None => {
                let vif = catalog
                    .find_next_noip(self.noip_offset)
                    .ok_or(ConfigError::NoSuitableInterface)?;
                self.noip_offset = vif + 1;
                (vif, None)
            }
        };

        let ip = if !addr.is_unspecified() {
            addr
        } else {
            found.unwrap_or(fallback)
        };

        info!("Initialize vif{} with {}", vif, ip);
        let make_default = self.interfaces.is_empty();
        engine
            .add_interface(vif, ip, mask, gateway, make_default)
            .map_err(ConfigError::InterfaceRejected)?;

        let id = self.interfaces.len();
        self.interfaces.push(Interface {
            id,
            vif,
            addr: ip,
            mask,
            gateway,
        });
        Ok(id)
    }

    /// Forget every interface and restart the vif search.
    pub fn clear(&mut self) {
        self.interfaces.clear();
        self.noip_offset = 0;
    }
}

/// Parse the dotted-quad arguments of an interface constructor.
pub fn parse_interface_args(
    addr: &str,
    mask: &str,
    gateway: &str,
) -> Result<(Ipv4Addr, Ipv4Addr, Ipv4Addr), ConfigError> {
    let addr = addr.parse().map_err(|_| ConfigError::InvalidAddress)?;
    let mask = mask.parse().map_err(|_| ConfigError::InvalidMask)?;
    let gateway = gateway.parse().map_err(|_| ConfigError::InvalidGateway)?;
    Ok((addr, mask, gateway))
}
