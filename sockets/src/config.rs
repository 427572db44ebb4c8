//! Run-time tunables for the socket stack.

use core::net::Ipv4Addr;

/// Configuration shared by every socket of a [`Stack`](crate::Stack).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Sleep increment of bounded waits, in milliseconds.
    pub poll_step_ms: u32,
    /// A blocked stream send resumes once this much send space is free.
    pub min_send_chunk: usize,
    /// Interface table capacity.
    pub max_interfaces: usize,
    /// Netmask of interfaces created implicitly by bind/connect.
    pub implicit_netmask: Ipv4Addr,
    /// Address used when `0.0.0.0` is requested and the store has none.
    pub fallback_address: Ipv4Addr,
    /// Largest datagram payload handed to the engine.
    pub max_datagram: usize,
    /// Treat positive statuses from datagram sends as success. Some ports
    /// return `1` although the datagram went out.
    pub accept_positive_send_status: bool,
}

impl StackConfig {
    pub const DEFAULT_POLL_STEP_MS: u32 = 100;
    pub const DEFAULT_MIN_SEND_CHUNK: usize = 16;
    pub const DEFAULT_MAX_INTERFACES: usize = 4;

    pub const fn new() -> Self {
        Self {
            poll_step_ms: Self::DEFAULT_POLL_STEP_MS,
            min_send_chunk: Self::DEFAULT_MIN_SEND_CHUNK,
            max_interfaces: Self::DEFAULT_MAX_INTERFACES,
            implicit_netmask: Ipv4Addr::new(255, 255, 255, 0),
            fallback_address: Ipv4Addr::new(192, 168, 0, 55),
            max_datagram: 0xffff,
            accept_positive_send_status: false,
        }
    }

    /// Enable the positive-status datagram quirk.
    pub const fn with_positive_send_status(mut self, enable: bool) -> Self {
        self.accept_positive_send_status = enable;
        self
    }

    /// Change the bounded-wait sleep increment. Zero is clamped to 1 ms.
    pub const fn with_poll_step(mut self, ms: u32) -> Self {
        self.poll_step_ms = if ms == 0 { 1 } else { ms };
        self
    }

    pub const fn with_max_interfaces(mut self, max: usize) -> Self {
        self.max_interfaces = max;
        self
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::new()
    }
}
