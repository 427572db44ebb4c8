//! Module-level state and operations.
//!
//! A [`Stack`] owns the protocol engine, the callback bridge, the interface
//! registry and the host services. It is a cheap handle: every socket keeps
//! a clone. All engine work goes through [`Stack::pump`], which is also the
//! only place user callbacks run.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{RefCell, RefMut};
use core::net::Ipv4Addr;

use log::{debug, info};

use crate::bridge::Bridge;
use crate::config::StackConfig;
use crate::engine::{DnsQuery, ProtocolEngine};
use crate::error::{ConfigError, Result};
use crate::netif::{self, ConfigStore, Interface, InterfaceRegistry};
use crate::poll::{Host, Pump};
use crate::socket::{AddressFamily, Socket, Transport};

/// Hook run before every engine pump, e.g. a serial line interface.
pub type PollHook = Rc<dyn Fn()>;

pub(crate) struct Shared {
    pub(crate) engine: Box<dyn ProtocolEngine>,
    pub(crate) bridge: Bridge,
    pub(crate) interfaces: InterfaceRegistry,
    host: Box<dyn Host>,
    store: Box<dyn ConfigStore>,
    pub(crate) config: StackConfig,
    initialised: bool,
    /// Bumped by every reset; handles from older generations are dead.
    generation: u64,
    poll_hook: Option<PollHook>,
    next_socket: u32,
    next_query: u32,
}

/// Shared handle to the socket stack.
#[derive(Clone)]
pub struct Stack {
    shared: Rc<RefCell<Shared>>,
}

impl Stack {
    /// Build a stack with the default configuration. The engine is
    /// initialised when the first socket is created.
    pub fn new<E, H, S>(engine: E, host: H, store: S) -> Self
    where
        E: ProtocolEngine + 'static,
        H: Host + 'static,
        S: ConfigStore + 'static,
    {
        Self::with_config(engine, host, store, StackConfig::default())
    }

    pub fn with_config<E, H, S>(engine: E, host: H, store: S, config: StackConfig) -> Self
    where
        E: ProtocolEngine + 'static,
        H: Host + 'static,
        S: ConfigStore + 'static,
    {
        let shared = Shared {
            engine: Box::new(engine),
            bridge: Bridge::new(),
            interfaces: InterfaceRegistry::new(config.max_interfaces),
            host: Box::new(host),
            store: Box::new(store),
            config,
            initialised: false,
            generation: 0,
            poll_hook: None,
            next_socket: 1,
            next_query: 1,
        };
        Self {
            shared: Rc::new(RefCell::new(shared)),
        }
    }

    pub fn config(&self) -> StackConfig {
        self.shared.borrow().config
    }

    /// Create a socket.
    pub fn socket(&self, family: AddressFamily, transport: Transport) -> Result<Socket> {
        Socket::new(self, family, transport)
    }

    /// Create a socket from raw `AF_*` / `SOCK_*` numbers.
    pub fn socket_raw(&self, domain: i32, kind: i32) -> Result<Socket> {
        let family = AddressFamily::from_raw(domain)?;
        let transport = Transport::from_raw(kind)?;
        Socket::new(self, family, transport)
    }

    pub fn is_initialised(&self) -> bool {
        self.shared.borrow().initialised
    }

    pub(crate) fn ensure_init(&self) {
        let mut shared = self.shared.borrow_mut();
        if !shared.initialised {
            info!("initialising protocol engine");
            shared.engine.init();
            shared.initialised = true;
        }
    }

    /// Reinitialise the engine and drop the poll hook.
    ///
    /// Every handle the engine held is gone afterwards, so sockets created
    /// before the reset report `EBADF`. Interfaces must be added again.
    pub fn reset(&self) {
        let mut shared = self.shared.borrow_mut();
        info!("resetting protocol engine");
        shared.engine.init();
        shared.bridge.clear();
        shared.interfaces.clear();
        shared.poll_hook = None;
        shared.initialised = true;
        shared.generation += 1;
    }

    pub fn register_poll_hook<F>(&self, hook: F)
    where
        F: Fn() + 'static,
    {
        self.shared.borrow_mut().poll_hook = Some(Rc::new(hook));
    }

    pub fn deregister_poll_hook(&self) {
        self.shared.borrow_mut().poll_hook = None;
    }

    /// Drive the engine once, then run the callbacks it raised.
    pub fn pump(&self) {
        let hook = self.shared.borrow().poll_hook.clone();
        if let Some(hook) = hook {
            hook();
        }
        let ready = {
            let mut shared = self.shared.borrow_mut();
            let Shared {
                engine,
                bridge,
                host,
                ..
            } = &mut *shared;
            engine.pump(host.now_ms(), bridge);
            bridge.take_ready()
        };
        for callback in ready {
            callback();
        }
    }

    /// Bring up an interface from dotted-quad strings. Returns its id.
    pub fn add_interface(&self, addr: &str, mask: &str, gateway: &str) -> Result<usize> {
        let (addr, mask, gateway) = netif::parse_interface_args(addr, mask, gateway)?;
        self.add_interface_addr(addr, mask, gateway)
    }

    pub fn add_interface_addr(&self, addr: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr) -> Result<usize> {
        self.ensure_init();
        let mut shared = self.shared.borrow_mut();
        let Shared {
            engine,
            interfaces,
            store,
            config,
            ..
        } = &mut *shared;
        let id = interfaces.add(
            &mut **engine,
            &**store,
            addr,
            mask,
            gateway,
            config.fallback_address,
        )?;
        Ok(id)
    }

    pub fn interfaces(&self) -> Vec<Interface> {
        self.shared.borrow().interfaces.iter().copied().collect()
    }

    /// Drive the receive path of one interface.
    pub fn poll_interface(&self, id: usize) -> Result<()> {
        let ready = {
            let mut shared = self.shared.borrow_mut();
            let vif = shared
                .interfaces
                .get(id)
                .map(|netif| netif.vif)
                .ok_or(ConfigError::UnknownInterface)?;
            let Shared {
                engine,
                bridge,
                host,
                ..
            } = &mut *shared;
            engine.poll_interface(vif, host.now_ms(), bridge);
            bridge.take_ready()
        };
        for callback in ready {
            callback();
        }
        Ok(())
    }

    pub fn is_bindable(&self, addr: Ipv4Addr) -> bool {
        self.shared.borrow().interfaces.is_bindable(addr)
    }

    /// Make sure an interface can carry `addr`, adding one if needed.
    pub(crate) fn ensure_bindable(&self, addr: Ipv4Addr) -> Result<()> {
        if self.is_bindable(addr) {
            return Ok(());
        }
        debug!("no interface for {}, adding one", addr);
        let config = self.config();
        self.add_interface_addr(addr, config.implicit_netmask, Ipv4Addr::UNSPECIFIED)?;
        Ok(())
    }

    /// Make sure at least one interface exists.
    pub(crate) fn ensure_interface(&self) -> Result<()> {
        if !self.shared.borrow().interfaces.is_empty() {
            return Ok(());
        }
        debug!("no interface yet, adding one");
        let config = self.config();
        self.add_interface_addr(
            Ipv4Addr::UNSPECIFIED,
            config.implicit_netmask,
            Ipv4Addr::UNSPECIFIED,
        )?;
        Ok(())
    }

    pub(crate) fn inner(&self) -> RefMut<'_, Shared> {
        self.shared.borrow_mut()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.shared.borrow().generation
    }

    pub(crate) fn next_socket_id(&self) -> u32 {
        let mut shared = self.shared.borrow_mut();
        let id = shared.next_socket;
        shared.next_socket = shared.next_socket.wrapping_add(1);
        id
    }

    pub(crate) fn next_query(&self) -> DnsQuery {
        let mut shared = self.shared.borrow_mut();
        let query = DnsQuery(shared.next_query);
        shared.next_query = shared.next_query.wrapping_add(1);
        query
    }
}

impl Pump for Stack {
    fn pump(&self) {
        Stack::pump(self);
    }

    fn sleep_ms(&self, ms: u32) {
        self.shared.borrow_mut().host.sleep_ms(ms);
    }

    fn step_ms(&self) -> u32 {
        self.shared.borrow().config.poll_step_ms
    }
}
