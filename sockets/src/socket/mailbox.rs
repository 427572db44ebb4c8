//! Single-slot inbound mailbox.
//!
//! Holds at most one engine delivery: a stream chunk (with a consume
//! offset so several short reads can drain it), a datagram with its
//! sender, or one pending inbound connection on a listener. Deliveries
//! never overwrite an occupied slot.

use core::net::SocketAddrV4;

use crate::engine::{Handle, Payload};

#[derive(Debug, Default, PartialEq, Eq)]
pub enum Mailbox {
    #[default]
    Empty,
    /// Stream chunk; `consumed` bytes have already been read.
    Data { payload: Payload, consumed: usize },
    Datagram { payload: Payload, from: SocketAddrV4 },
    /// Inbound connection waiting for `accept`.
    Connection(Handle),
}

/// Outcome of one stream read from the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRead {
    /// Bytes copied out.
    pub copied: usize,
    /// Set when the chunk was fully consumed: bytes to acknowledge.
    pub ack: Option<usize>,
}

impl Mailbox {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Whether readable data (stream or datagram) is waiting.
    pub fn has_data(&self) -> bool {
        matches!(self, Self::Data { .. } | Self::Datagram { .. })
    }

    pub fn has_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Unread bytes of a partially consumed stream chunk.
    pub fn remaining(&self) -> usize {
        match self {
            Self::Data { payload, consumed } if *consumed > 0 => payload.len() - consumed,
            _ => 0,
        }
    }

    /// Store a stream chunk. Hands it back if the slot is taken.
    pub fn offer_stream(&mut self, payload: Payload) -> Result<(), Payload> {
        if !self.is_empty() {
            return Err(payload);
        }
        *self = Self::Data { payload, consumed: 0 };
        Ok(())
    }

    /// Store a datagram. Returns false (and drops it) if the slot is taken.
    pub fn offer_datagram(&mut self, payload: Payload, from: SocketAddrV4) -> bool {
        if !self.is_empty() {
            return false;
        }
        *self = Self::Datagram { payload, from };
        true
    }

    /// Park an inbound connection. Returns false if one is already parked.
    pub fn offer_connection(&mut self, conn: Handle) -> bool {
        if !self.is_empty() {
            return false;
        }
        *self = Self::Connection(conn);
        true
    }

    /// Copy up to `buf.len()` stream bytes, keeping the remainder.
    pub fn read_stream(&mut self, buf: &mut [u8]) -> Option<StreamRead> {
        let Self::Data { payload, consumed } = self else {
            return None;
        };
        let available = &payload[*consumed..];
        let copied = available.len().min(buf.len());
        buf[..copied].copy_from_slice(&available[..copied]);
        *consumed += copied;
        if *consumed < payload.len() {
            return Some(StreamRead { copied, ack: None });
        }
        let ack = payload.len();
        *self = Self::Empty;
        Some(StreamRead { copied, ack: Some(ack) })
    }

    /// Remove the whole datagram; the caller truncates.
    pub fn take_datagram(&mut self) -> Option<(Payload, SocketAddrV4)> {
        match core::mem::take(self) {
            Self::Datagram { payload, from } => Some((payload, from)),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn take_connection(&mut self) -> Option<Handle> {
        match core::mem::take(self) {
            Self::Connection(conn) => Some(conn),
            other => {
                *self = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::net::Ipv4Addr;

    fn peer() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 4000)
    }

    #[test]
    fn test_short_reads_reassemble_chunk() {
        let mut mb = Mailbox::Empty;
        mb.offer_stream(b"hello world".to_vec()).unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        let mut acks = Vec::new();
        while let Some(read) = mb.read_stream(&mut buf) {
            out.extend_from_slice(&buf[..read.copied]);
            acks.extend(read.ack);
        }
        assert_eq!(out, b"hello world");
        assert_eq!(acks, vec![11]);
        assert!(mb.is_empty());
    }

    #[test]
    fn test_remaining_tracks_partial_consumption() {
        let mut mb = Mailbox::Empty;
        mb.offer_stream(vec![1, 2, 3, 4, 5]).unwrap();
        assert_eq!(mb.remaining(), 0);
        let mut buf = [0u8; 2];
        mb.read_stream(&mut buf);
        assert_eq!(mb.remaining(), 3);
    }

    #[test]
    fn test_occupied_slot_refuses_stream() {
        let mut mb = Mailbox::Empty;
        mb.offer_stream(vec![1]).unwrap();
        assert_eq!(mb.offer_stream(vec![2]), Err(vec![2]));
    }

    #[test]
    fn test_second_datagram_dropped() {
        let mut mb = Mailbox::Empty;
        assert!(mb.offer_datagram(b"first".to_vec(), peer()));
        assert!(!mb.offer_datagram(b"second".to_vec(), peer()));
        assert_eq!(mb.take_datagram(), Some((b"first".to_vec(), peer())));
        assert!(mb.is_empty());
    }

    #[test]
    fn test_single_pending_connection() {
        let mut mb = Mailbox::Empty;
        assert!(mb.offer_connection(Handle(7)));
        assert!(!mb.offer_connection(Handle(8)));
        assert_eq!(mb.take_datagram(), None);
        assert_eq!(mb.take_connection(), Some(Handle(7)));
    }
}
