//! Blocking BSD-style sockets over a callback-driven TCP/UDP engine.
//!
//! The engine never blocks: it reports arrivals, connection progress and
//! errors through callbacks while it is pumped. This crate turns that into
//! a socket API where `recv`, `accept` and friends wait by pumping the
//! engine themselves, honouring a per-socket timeout.
//!
//! # Architecture
//! - `engine` - protocol engine contract and the smoltcp-backed engine
//! - `bridge` - routes engine callbacks into socket state
//! - `socket` - socket state machine and facade
//! - `stack` - owner of the engine, interfaces and poll hook
//! - `netif` - interface registry and vif configuration store
//! - `poll` - cooperative wait loop
//! - `resolve` - name resolution
//! - `error` - errno mapping and error types
//!
//! Everything is single threaded. A [`Stack`] and its sockets share state
//! through reference counting and must stay on one thread.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod netif;
pub mod poll;
pub mod resolve;
pub mod socket;
pub mod stack;

#[cfg(test)]
mod testing;

pub use config::StackConfig;
pub use engine::{EngineError, Handle, ProtocolEngine};
pub use error::{ConfigError, Errno, Result, SocketError};
pub use netif::{ConfigStore, Interface, MemoryStore};
pub use poll::Host;
pub use resolve::AddrInfo;
pub use socket::{
    AddressFamily, EventCallback, SockOptValue, Socket, SocketState, Timeout, Transport,
};
pub use stack::{PollHook, Stack};

#[cfg(feature = "std")]
pub use poll::StdHost;

#[cfg(feature = "smoltcp-engine")]
pub use engine::smoltcp::{FrameAdapter, FrameDriver, SmoltcpEngine};

pub const AF_INET: i32 = 2;
pub const AF_INET6: i32 = 10;

pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;
pub const SOCK_RAW: i32 = 3;

pub const SOL_SOCKET: i32 = 1;
pub const SO_REUSEADDR: i32 = 0x04;
/// Installs the per-socket event callback.
pub const SO_EVENT_CALLBACK: i32 = 20;
