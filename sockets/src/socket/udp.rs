//! Datagram transfer logic.

use core::net::SocketAddrV4;

use log::warn;

use crate::error::{Errno, Result, SocketError};

use super::Socket;

impl Socket {
    /// Send one datagram, truncated to the largest the engine carries.
    /// `None` sends to the connected peer.
    pub(super) fn udp_send(&self, data: &[u8], to: Option<SocketAddrV4>) -> Result<usize> {
        let handle = self.check_connected()?;
        let config = self.stack.config();
        let len = data.len().min(config.max_datagram);

        let status = {
            let mut shared = self.stack.inner();
            match to {
                Some(to) => shared.engine.udp_sendto(handle, &data[..len], to),
                None => shared.engine.udp_send(handle, &data[..len]),
            }
        };

        match status {
            Ok(()) => Ok(len),
            Err(err) if err.is_positive() => {
                if config.accept_positive_send_status {
                    Ok(len)
                } else {
                    warn!("udp send on {}: unexpected status {}", handle, err);
                    Err(Errno::EIO.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Take the pending datagram. Bytes past `buf` are discarded.
    pub(super) fn udp_recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4)> {
        self.wait(|core| core.mailbox.has_data())?;

        let mut core = self.core.borrow_mut();
        let (payload, from) = core
            .mailbox
            .take_datagram()
            .ok_or(SocketError::Os(Errno::EAGAIN))?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        core.peer = Some(from);
        Ok((n, from))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{remote, setup};
    use super::super::{AddressFamily, SocketState, Transport};
    use super::*;
    use crate::config::StackConfig;
    use crate::engine::EngineError;
    use crate::netif::MemoryStore;
    use crate::stack::Stack;
    use crate::testing::{Event, MockEngine, MockHost};
    use core::net::Ipv4Addr;
    use core::time::Duration;

    fn sender(n: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, n), 5353)
    }

    #[test]
    fn test_sendto_reaches_engine() {
        let (stack, engine, _) = setup();
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        assert_eq!(sock.sendto(b"ping", sender(2)), Ok(4));
        assert_eq!(engine.sent()[0].1, b"ping".to_vec());
        assert_eq!(engine.sent()[0].2, Some(sender(2)));
    }

    #[test]
    fn test_connect_records_default_peer() {
        let (stack, engine, _) = setup();
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        let h = engine.last_handle();
        sock.connect(remote()).unwrap();
        assert_eq!(sock.peer(), Some(remote()));
        assert_eq!(engine.pcb(h).unwrap().remote, Some(remote()));
        assert_eq!(sock.state(), SocketState::New);

        assert_eq!(sock.send(b"x"), Ok(1));
        assert_eq!(engine.sent()[0].2, None);
    }

    #[test]
    fn test_oversized_datagram_truncated() {
        let (stack, engine, _) = setup();
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        let big = vec![0u8; 70_000];
        assert_eq!(sock.sendto(&big, sender(2)), Ok(0xffff));
        assert_eq!(engine.sent()[0].1.len(), 0xffff);
    }

    #[test]
    fn test_positive_status_is_io_error() {
        let (stack, engine, _) = setup();
        engine.send_status(EngineError(1));
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        assert_eq!(sock.sendto(b"x", sender(2)), Err(SocketError::Os(Errno::EIO)));
    }

    #[test]
    fn test_positive_status_accepted_when_enabled() {
        let engine = MockEngine::new();
        engine.send_status(EngineError(1));
        let config = StackConfig::default().with_positive_send_status(true);
        let stack = Stack::with_config(engine.clone(), MockHost::new(), MemoryStore::new(), config);
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        assert_eq!(sock.sendto(b"abc", sender(2)), Ok(3));
    }

    #[test]
    fn test_send_error_translated() {
        let (stack, engine, _) = setup();
        engine.send_status(EngineError::RTE);
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        assert_eq!(sock.sendto(b"x", sender(2)), Err(SocketError::Os(Errno::EHOSTUNREACH)));
    }

    #[test]
    fn test_second_datagram_dropped_while_slot_full() {
        let (stack, engine, _) = setup();
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        let h = engine.last_handle();
        engine.script(vec![
            Event::Datagram(h, b"first".to_vec(), sender(3)),
            Event::Datagram(h, b"second".to_vec(), sender(4)),
        ]);
        stack.pump();

        let mut buf = [0u8; 16];
        assert_eq!(sock.recvfrom(&mut buf), Ok((5, sender(3))));
        assert_eq!(&buf[..5], b"first");
        assert_eq!(sock.peer(), Some(sender(3)));

        sock.setblocking(false);
        assert_eq!(sock.recv(&mut buf), Err(SocketError::Os(Errno::EAGAIN)));
    }

    #[test]
    fn test_short_buffer_discards_tail() {
        let (stack, engine, _) = setup();
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        let h = engine.last_handle();
        engine.script(vec![Event::Datagram(h, b"abcdef".to_vec(), sender(5))]);
        stack.pump();

        let mut buf = [0u8; 2];
        assert_eq!(sock.recv(&mut buf), Ok(2));
        assert_eq!(&buf, b"ab");
        sock.setblocking(false);
        assert_eq!(sock.recv(&mut buf), Err(SocketError::Os(Errno::EAGAIN)));
    }

    #[test]
    fn test_recv_times_out() {
        let (stack, _, host) = setup();
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        sock.settimeout(Some(Duration::from_millis(150)));
        let mut buf = [0u8; 4];
        assert_eq!(sock.recv(&mut buf), Err(SocketError::Os(Errno::ETIMEDOUT)));
        assert_eq!(host.sleeps(), vec![100, 50]);
    }

    #[test]
    fn test_sendall_not_supported() {
        let (stack, _, _) = setup();
        let sock = stack.socket(AddressFamily::Inet, Transport::Datagram).unwrap();
        assert_eq!(sock.sendall(b"x"), Err(SocketError::Os(Errno::EOPNOTSUPP)));
    }
}
