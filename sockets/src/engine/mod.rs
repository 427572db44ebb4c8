//! Protocol engine interface.
//!
//! The socket layer consumes a TCP/UDP engine that only makes progress when
//! it is pumped, and that reports what happened during a pump through
//! events. Nothing here blocks: every primitive returns immediately with a
//! status, and every event handler must return promptly.
//!
//! # Architecture
//! ```text
//! Socket facade ──primitives──▶ ProtocolEngine
//!       ▲                             │ pump(now, sink)
//!       │ mailbox                     ▼
//!       └──────────────── EventSink (callback bridge)
//! ```
//!
//! Handles are opaque, engine-assigned identifiers for one stream or
//! datagram control block. A handle stays valid until it is closed,
//! aborted, removed, or reported through [`EventSink::stream_error`], after
//! which the engine has released it.

pub mod status;

#[cfg(feature = "smoltcp-engine")]
pub mod smoltcp;

use alloc::vec::Vec;
use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

pub use status::EngineError;

/// Opaque engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Buffer delivered by the engine. Owned by whoever accepted it.
pub type Payload = Vec<u8>;

/// Identifier of an in-flight name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DnsQuery(pub u32);

/// Answer to a stream data delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum Receipt {
    /// The sink owns the payload now.
    Taken,
    /// No consumer or no room; the engine keeps the delivery (data or close
    /// notification) and offers it again on a later pump.
    Refused(Option<Payload>),
}

/// Answer to an inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Connection parked for a later `accept`.
    Accept,
    /// Listener slot occupied; the engine stays responsible for it.
    Busy,
}

/// Outcome of starting a name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsStart {
    /// Answer was available immediately.
    Resolved(Ipv4Addr),
    /// Answer arrives through [`EventSink::dns_resolved`].
    Pending,
}

/// Handlers invoked by the engine while it is being pumped.
///
/// Never reentrant, never concurrent with a facade call.
pub trait EventSink {
    /// A datagram arrived on a datagram handle.
    fn datagram_received(&mut self, handle: Handle, payload: Payload, from: SocketAddrV4);

    /// Stream data arrived. `None` is an orderly close by the peer.
    fn stream_received(&mut self, handle: Handle, payload: Option<Payload>) -> Receipt;

    /// The stream failed. The engine has already released `handle`.
    fn stream_error(&mut self, handle: Handle, err: EngineError);

    /// An outgoing connection completed.
    fn stream_connected(&mut self, handle: Handle);

    /// A listener produced a new connection.
    fn stream_accepted(&mut self, listener: Handle, conn: Handle) -> Verdict;

    /// A pending name lookup finished; `None` on failure.
    fn dns_resolved(&mut self, query: DnsQuery, addr: Option<Ipv4Addr>);
}

/// Primitives of a callback-driven TCP/UDP engine.
pub trait ProtocolEngine {
    /// (Re)initialise all engine state.
    fn init(&mut self);

    /// Allocate a stream control block.
    fn tcp_new(&mut self) -> Option<Handle>;

    /// Allocate a datagram control block.
    fn udp_new(&mut self) -> Option<Handle>;

    fn tcp_bind(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError>;

    fn udp_bind(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError>;

    /// Turn a bound stream into a listener. The returned handle replaces
    /// `handle`, which must not be used afterwards.
    fn tcp_listen(&mut self, handle: Handle, backlog: u8) -> Option<Handle>;

    /// Tell a listener that one of its connections has been taken, so it
    /// may produce more.
    fn tcp_accepted(&mut self, listener: Handle);

    /// Start an active open. Completion is reported through
    /// [`EventSink::stream_connected`].
    fn tcp_connect(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError>;

    /// Set the default peer of a datagram handle.
    fn udp_connect(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError>;

    /// Queue `data` for transmission. Always copies.
    fn tcp_write(&mut self, handle: Handle, data: &[u8]) -> Result<(), EngineError>;

    /// Free space in the send buffer, in bytes.
    fn tcp_sndbuf(&self, handle: Handle) -> usize;

    /// Acknowledge `len` consumed bytes, reopening the receive window.
    fn tcp_recved(&mut self, handle: Handle, len: usize);

    /// Graceful close. On error the handle is still owned by the caller.
    fn tcp_close(&mut self, handle: Handle) -> Result<(), EngineError>;

    /// Forced termination. Always releases the handle.
    fn tcp_abort(&mut self, handle: Handle);

    /// Whether the handle is a listener.
    fn tcp_is_listening(&self, handle: Handle) -> bool;

    /// Remote endpoint of a connected stream.
    fn tcp_remote(&self, handle: Handle) -> Option<SocketAddrV4>;

    /// Send to the default peer.
    fn udp_send(&mut self, handle: Handle, data: &[u8]) -> Result<(), EngineError>;

    fn udp_sendto(&mut self, handle: Handle, data: &[u8], to: SocketAddrV4) -> Result<(), EngineError>;

    /// Release a datagram handle.
    fn udp_remove(&mut self, handle: Handle);

    /// Toggle address reuse on either kind of handle.
    fn set_reuse_addr(&mut self, handle: Handle, enable: bool);

    /// Bring up a network interface backed by virtual interface `vif`.
    fn add_interface(
        &mut self,
        vif: u32,
        addr: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        make_default: bool,
    ) -> Result<(), EngineError>;

    /// Drive a single interface's receive path.
    fn poll_interface(&mut self, vif: u32, now_ms: u64, sink: &mut dyn EventSink);

    /// Start resolving `name`.
    fn dns_lookup(&mut self, name: &str, query: DnsQuery) -> Result<DnsStart, EngineError>;

    /// Advance every interface and timer once, delivering events to `sink`.
    fn pump(&mut self, now_ms: u64, sink: &mut dyn EventSink);
}
