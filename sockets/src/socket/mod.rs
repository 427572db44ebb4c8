//! Socket state machine and facade.
//!
//! A [`Socket`] pairs a shared [`SocketCore`] record, which the callback
//! bridge writes into during pumps, with the [`Stack`] it lives on. Facade
//! calls check state, issue engine primitives, and block through the
//! cooperative poll loop when they have to wait for an event.
//!
//! Stream-specific transfer logic lives in `tcp.rs`, datagram logic in
//! `udp.rs`, options in `options.rs` and the byte-stream adapters in
//! `io.rs`.

pub mod mailbox;
pub mod options;
pub mod state;

mod io;
mod tcp;
mod udp;

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::time::Duration;

use log::debug;

use crate::bridge::{CoreRef, Role};
use crate::engine::Handle;
use crate::error::{Errno, Result, SocketError};
use crate::poll::{self, WaitError};
use crate::stack::Stack;

pub use mailbox::Mailbox;
pub use options::SockOptValue;
pub use state::{SocketState, Timeout};

/// User callback run after a pump filled the mailbox or connection slot.
pub type EventCallback = Rc<dyn Fn()>;

/// Address family requested at construction. Only IPv4 addressing is
/// carried by the engine; `Inet6` is accepted and recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn from_raw(domain: i32) -> Result<Self> {
        match domain {
            crate::AF_INET => Ok(Self::Inet),
            crate::AF_INET6 => Ok(Self::Inet6),
            _ => Err(Errno::EINVAL.into()),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Inet => crate::AF_INET,
            Self::Inet6 => crate::AF_INET6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stream,
    Datagram,
}

impl Transport {
    /// Map a `SOCK_*` number. Raw and unknown types are rejected.
    pub fn from_raw(kind: i32) -> Result<Self> {
        match kind {
            crate::SOCK_STREAM => Ok(Self::Stream),
            crate::SOCK_DGRAM => Ok(Self::Datagram),
            _ => Err(Errno::EINVAL.into()),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Stream => crate::SOCK_STREAM,
            Self::Datagram => crate::SOCK_DGRAM,
        }
    }
}

/// Per-socket record shared with the callback bridge.
pub(crate) struct SocketCore {
    pub(crate) id: u32,
    pub(crate) family: AddressFamily,
    pub(crate) transport: Transport,
    /// Engine handle; `None` once closed or released by an error.
    pub(crate) handle: Option<Handle>,
    pub(crate) state: SocketState,
    pub(crate) mailbox: Mailbox,
    pub(crate) timeout: Timeout,
    /// Last known remote endpoint.
    pub(crate) peer: Option<SocketAddrV4>,
    pub(crate) callback: Option<EventCallback>,
    /// Stack generation the handle belongs to.
    pub(crate) generation: u64,
}

impl SocketCore {
    pub(crate) fn new(id: u32, transport: Transport) -> Self {
        Self {
            id,
            family: AddressFamily::Inet,
            transport,
            handle: None,
            state: SocketState::New,
            mailbox: Mailbox::Empty,
            timeout: Timeout::Blocking,
            peer: None,
            callback: None,
            generation: 0,
        }
    }
}

/// Blocking BSD-style socket.
///
/// Dropping the socket closes it.
pub struct Socket {
    stack: Stack,
    core: CoreRef,
}

impl Socket {
    /// Allocate an engine handle and register its callbacks.
    pub fn new(stack: &Stack, family: AddressFamily, transport: Transport) -> Result<Self> {
        stack.ensure_init();

        let allocated = {
            let mut shared = stack.inner();
            match transport {
                Transport::Stream => shared.engine.tcp_new(),
                Transport::Datagram => shared.engine.udp_new(),
            }
        };
        let handle = allocated.ok_or(SocketError::Os(Errno::ENOMEM))?;

        let mut core = SocketCore::new(stack.next_socket_id(), transport);
        core.family = family;
        core.handle = Some(handle);
        core.generation = stack.generation();
        let core = Rc::new(RefCell::new(core));

        let role = match transport {
            Transport::Stream => Role::Stream,
            Transport::Datagram => Role::Datagram,
        };
        stack.inner().bridge.register(handle, role, &core);

        Ok(Self {
            stack: stack.clone(),
            core,
        })
    }

    /// Wrap an accepted connection.
    fn adopt(stack: &Stack, handle: Handle, timeout: Timeout, peer: Option<SocketAddrV4>) -> Self {
        let mut core = SocketCore::new(stack.next_socket_id(), Transport::Stream);
        core.handle = Some(handle);
        core.state = SocketState::Connected;
        core.timeout = timeout;
        core.peer = peer;
        core.generation = stack.generation();
        let core = Rc::new(RefCell::new(core));
        stack.inner().bridge.register(handle, Role::Stream, &core);
        Self {
            stack: stack.clone(),
            core,
        }
    }

    pub fn id(&self) -> u32 {
        self.core.borrow().id
    }

    pub fn family(&self) -> AddressFamily {
        self.core.borrow().family
    }

    pub fn transport(&self) -> Transport {
        self.core.borrow().transport
    }

    pub fn state(&self) -> SocketState {
        self.core.borrow().state
    }

    /// Last known remote endpoint.
    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.core.borrow().peer
    }

    pub fn timeout(&self) -> Timeout {
        self.core.borrow().timeout
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// `None` blocks forever, zero makes the socket non-blocking.
    pub fn settimeout(&self, timeout: Option<Duration>) {
        self.core.borrow_mut().timeout = Timeout::from_duration(timeout);
    }

    pub fn set_timeout_mode(&self, timeout: Timeout) {
        self.core.borrow_mut().timeout = timeout;
    }

    pub fn setblocking(&self, blocking: bool) {
        self.core.borrow_mut().timeout = if blocking {
            Timeout::Blocking
        } else {
            Timeout::NonBlocking
        };
    }

    /// Bind to a local address, bringing up an interface for it if none
    /// can carry it yet.
    pub fn bind(&self, addr: SocketAddrV4) -> Result<()> {
        let handle = self.live_handle()?;
        self.stack.ensure_bindable(*addr.ip())?;
        let transport = self.transport();
        let mut shared = self.stack.inner();
        match transport {
            Transport::Stream => shared.engine.tcp_bind(handle, *addr.ip(), addr.port())?,
            Transport::Datagram => shared.engine.udp_bind(handle, *addr.ip(), addr.port())?,
        }
        Ok(())
    }

    /// Connect to `addr`. Streams perform the handshake per the timeout
    /// policy; datagram sockets only record the default peer.
    pub fn connect(&self, addr: SocketAddrV4) -> Result<()> {
        let handle = self.live_handle()?;
        self.stack.ensure_interface()?;
        match self.transport() {
            Transport::Stream => self.tcp_connect(handle, addr),
            Transport::Datagram => {
                self.stack
                    .inner()
                    .engine
                    .udp_connect(handle, *addr.ip(), addr.port())?;
                self.core.borrow_mut().peer = Some(addr);
                Ok(())
            }
        }
    }

    /// Send once. Streams may write fewer bytes than given.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        self.check_connected()?;
        match self.transport() {
            Transport::Stream => self.tcp_send(data),
            Transport::Datagram => self.udp_send(data, None),
        }
    }

    /// Send to `to`. Streams ignore the address.
    pub fn sendto(&self, data: &[u8], to: SocketAddrV4) -> Result<usize> {
        self.check_connected()?;
        match self.transport() {
            Transport::Stream => self.tcp_send(data),
            Transport::Datagram => self.udp_send(data, Some(to)),
        }
    }

    /// Receive into `buf`. Zero means the peer closed the stream.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_connected()?;
        match self.transport() {
            Transport::Stream => self.tcp_recv(buf),
            Transport::Datagram => self.udp_recv(buf).map(|(n, _)| n),
        }
    }

    /// Receive into `buf`, also reporting the sender.
    pub fn recvfrom(&self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4)> {
        self.check_connected()?;
        match self.transport() {
            Transport::Stream => {
                let peer = self.peer().unwrap_or(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
                let n = self.tcp_recv(buf)?;
                Ok((n, peer))
            }
            Transport::Datagram => self.udp_recv(buf),
        }
    }

    /// Send the whole buffer. Non-blocking sockets fail up front, without
    /// writing anything, unless it all fits in the free send space.
    pub fn sendall(&self, data: &[u8]) -> Result<()> {
        self.check_connected()?;
        match self.transport() {
            Transport::Stream => self.tcp_sendall(data),
            Transport::Datagram => Err(Errno::EOPNOTSUPP.into()),
        }
    }

    /// Release the engine handle. Idempotent.
    pub fn close(&self) {
        let (handle, mailbox, transport) = {
            let mut core = self.core.borrow_mut();
            let handle = core.handle.take();
            let stale = core.generation != self.stack.generation();
            core.state = SocketState::Closed;
            let mailbox = core::mem::take(&mut core.mailbox);
            match handle {
                Some(handle) if !stale => (handle, mailbox, core.transport),
                _ => return,
            }
        };

        let mut shared = self.stack.inner();
        shared.bridge.forget(handle);
        match transport {
            Transport::Stream => {
                if shared.engine.tcp_close(handle).is_err() {
                    debug!("close {}: graceful close failed, aborting", handle);
                    shared.engine.tcp_abort(handle);
                }
            }
            Transport::Datagram => shared.engine.udp_remove(handle),
        }
        if let Mailbox::Connection(pending) = mailbox {
            // can never be accepted now
            shared.bridge.forget(pending);
            shared.engine.tcp_abort(pending);
        }
    }

    /// Handle of a socket that still owns one. Sockets from before a reset
    /// lose theirs here.
    fn live_handle(&self) -> Result<Handle> {
        let generation = self.stack.generation();
        let mut core = self.core.borrow_mut();
        if core.generation != generation {
            core.handle = None;
            core.state = SocketState::Closed;
        }
        core.handle.ok_or(SocketError::Os(Errno::EBADF))
    }

    /// Data-path precondition: a handle must still be held. Otherwise the
    /// latched error (or `EBADF`) is raised and the socket becomes closed.
    fn check_connected(&self) -> Result<Handle> {
        if let Ok(handle) = self.live_handle() {
            return Ok(handle);
        }
        let mut core = self.core.borrow_mut();
        let errno = core.state.latched_errno().unwrap_or(Errno::EBADF);
        core.state = SocketState::Closed;
        Err(errno.into())
    }

    /// Block per this socket's timeout until `ready` holds.
    fn wait<F>(&self, mut ready: F) -> core::result::Result<(), WaitError>
    where
        F: FnMut(&SocketCore) -> bool,
    {
        let timeout = self.timeout();
        poll::wait_until(&self.stack, timeout, || ready(&self.core.borrow()))
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        write!(
            f,
            "<socket state={} timeout={} incoming={} remaining={}>",
            core.state.code(),
            core.timeout.as_millis(),
            !core.mailbox.is_empty(),
            core.mailbox.remaining()
        )
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}
