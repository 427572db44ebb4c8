//! Event callback bridge.
//!
//! The engine reports events per handle; the bridge routes them to the
//! socket that registered the handle, in the role it registered it for.
//! Handlers only touch socket state and mailboxes and never block. User
//! callbacks raised by a delivery are queued and run by the stack once the
//! pump has returned.

use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::net::{Ipv4Addr, SocketAddrV4};

use log::debug;

use crate::engine::{DnsQuery, EngineError, EventSink, Handle, Payload, Receipt, Verdict};
use crate::socket::{EventCallback, Mailbox, SocketCore, SocketState};

/// Shared socket record as seen by the bridge.
pub(crate) type CoreRef = Rc<RefCell<SocketCore>>;

/// What a registered handle is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connected or connecting stream.
    Stream,
    Listener,
    Datagram,
    /// Connection parked on a listener, not yet accepted. Its data is held
    /// back by the engine until `accept` re-registers it as a stream.
    Unaccepted,
}

struct Route {
    role: Role,
    /// Owner of the handle; the parent listener for unaccepted children.
    socket: Weak<RefCell<SocketCore>>,
}

#[derive(Default)]
pub struct Bridge {
    routes: BTreeMap<Handle, Route>,
    ready: Vec<EventCallback>,
    lookups: BTreeMap<DnsQuery, Option<Ipv4Addr>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events for `handle` to `socket`.
    pub(crate) fn register(&mut self, handle: Handle, role: Role, socket: &CoreRef) {
        self.routes.insert(
            handle,
            Route {
                role,
                socket: Rc::downgrade(socket),
            },
        );
    }

    /// Drop the route of a released handle.
    pub fn forget(&mut self, handle: Handle) {
        self.routes.remove(&handle);
    }

    pub fn role(&self, handle: Handle) -> Option<Role> {
        self.routes.get(&handle).map(|route| route.role)
    }

    /// Drop every route and pending result. Used on engine reset.
    pub fn clear(&mut self) {
        self.routes.clear();
        self.ready.clear();
        self.lookups.clear();
    }

    /// Callbacks raised since the last call.
    pub fn take_ready(&mut self) -> Vec<EventCallback> {
        core::mem::take(&mut self.ready)
    }

    /// Result of a finished lookup: `Some(None)` means it failed.
    pub fn take_lookup(&mut self, query: DnsQuery) -> Option<Option<Ipv4Addr>> {
        self.lookups.remove(&query)
    }

    fn owner(&self, handle: Handle) -> Option<(Role, CoreRef)> {
        let route = self.routes.get(&handle)?;
        Some((route.role, route.socket.upgrade()?))
    }

    fn notify(&mut self, core: &SocketCore) {
        if let Some(callback) = &core.callback {
            self.ready.push(Rc::clone(callback));
        }
    }
}

impl EventSink for Bridge {
    fn datagram_received(&mut self, handle: Handle, payload: Payload, from: SocketAddrV4) {
        let Some((Role::Datagram, socket)) = self.owner(handle) else {
            return;
        };
        let mut core = socket.borrow_mut();
        if core.mailbox.offer_datagram(payload, from) {
            self.notify(&core);
        }
    }

    fn stream_received(&mut self, handle: Handle, payload: Option<Payload>) -> Receipt {
        let Some((Role::Stream, socket)) = self.owner(handle) else {
            return Receipt::Refused(payload);
        };
        let mut core = socket.borrow_mut();
        match payload {
            None => {
                if !core.state.is_terminal() {
                    debug!("socket {}: peer closed {}", core.id, handle);
                    core.state = SocketState::PeerClosed;
                }
                self.notify(&core);
                Receipt::Taken
            }
            Some(payload) => match core.mailbox.offer_stream(payload) {
                Ok(()) => {
                    self.notify(&core);
                    Receipt::Taken
                }
                Err(payload) => Receipt::Refused(Some(payload)),
            },
        }
    }

    fn stream_error(&mut self, handle: Handle, err: EngineError) {
        let Some((role, socket)) = self.owner(handle) else {
            self.forget(handle);
            return;
        };
        self.forget(handle);
        let mut core = socket.borrow_mut();
        if role == Role::Unaccepted {
            if core.mailbox == Mailbox::Connection(handle) {
                core.mailbox = Mailbox::Empty;
            }
            return;
        }
        debug!("socket {}: {} failed with {}", core.id, handle, err);
        if core.handle == Some(handle) {
            core.handle = None;
        }
        if core.state != SocketState::Closed {
            core.state = SocketState::Failed(err);
        }
    }

    fn stream_connected(&mut self, handle: Handle) {
        let Some((Role::Stream, socket)) = self.owner(handle) else {
            return;
        };
        let mut core = socket.borrow_mut();
        if core.state == SocketState::Connecting {
            core.state = SocketState::Connected;
        }
    }

    fn stream_accepted(&mut self, listener: Handle, conn: Handle) -> Verdict {
        let Some((Role::Listener, socket)) = self.owner(listener) else {
            return Verdict::Busy;
        };
        let mut core = socket.borrow_mut();
        if !core.mailbox.offer_connection(conn) {
            debug!("socket {}: backlog full, {} told to retry", core.id, conn);
            return Verdict::Busy;
        }
        self.routes.insert(
            conn,
            Route {
                role: Role::Unaccepted,
                socket: Rc::downgrade(&socket),
            },
        );
        self.notify(&core);
        Verdict::Accept
    }

    fn dns_resolved(&mut self, query: DnsQuery, addr: Option<Ipv4Addr>) {
        self.lookups.insert(query, addr);
    }
}
