//! Host name resolution.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::net::{Ipv4Addr, SocketAddrV4};

use log::debug;

use crate::engine::{DnsStart, EngineError};
use crate::error::{Result, SocketError};
use crate::stack::Stack;
use crate::{AF_INET, SOCK_STREAM};

/// One `getaddrinfo` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub family: i32,
    pub kind: i32,
    pub proto: i32,
    pub canonname: String,
    pub addr: SocketAddrV4,
}

impl Stack {
    /// Resolve `host` and pair it with `port`. The result always holds a
    /// single IPv4 stream entry.
    pub fn getaddrinfo(&self, host: &str, port: u16) -> Result<Vec<AddrInfo>> {
        let ip = self.resolve(host)?;
        Ok(vec![AddrInfo {
            family: AF_INET,
            kind: SOCK_STREAM,
            proto: 0,
            canonname: String::new(),
            addr: SocketAddrV4::new(ip, port),
        }])
    }

    /// Resolve `host`, pumping until the engine answers.
    ///
    /// Lookups that cannot be started fail with the engine's status; a
    /// lookup that completes without an address fails with
    /// [`EngineError::BUF`].
    pub fn resolve(&self, host: &str) -> Result<Ipv4Addr> {
        self.ensure_init();
        let query = self.next_query();
        let started = self.inner().engine.dns_lookup(host, query);
        match started {
            Ok(DnsStart::Resolved(ip)) => return Ok(ip),
            Ok(DnsStart::Pending) => debug!("resolving {} as query {}", host, query.0),
            Err(err) => return Err(SocketError::Resolve(err)),
        }

        loop {
            let done = self.inner().bridge.take_lookup(query);
            if let Some(result) = done {
                return result.ok_or(SocketError::Resolve(EngineError::BUF));
            }
            self.pump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DnsQuery;
    use crate::netif::MemoryStore;
    use crate::testing::{Event, MockEngine, MockHost};

    fn stack() -> (Stack, MockEngine) {
        let engine = MockEngine::new();
        (Stack::new(engine.clone(), MockHost::new(), MemoryStore::new()), engine)
    }

    #[test]
    fn test_immediate_answer() {
        let (stack, engine) = stack();
        engine.resolve_now("example.org", Ipv4Addr::new(93, 184, 216, 34));
        let infos = stack.getaddrinfo("example.org", 80).unwrap();
        assert_eq!(
            infos,
            vec![AddrInfo {
                family: AF_INET,
                kind: SOCK_STREAM,
                proto: 0,
                canonname: String::new(),
                addr: SocketAddrV4::new(Ipv4Addr::new(93, 184, 216, 34), 80),
            }]
        );
        assert_eq!(engine.pumps(), 0);
    }

    #[test]
    fn test_pending_lookup_pumps_until_answer() {
        let (stack, engine) = stack();
        engine.script(vec![]);
        engine.script(vec![Event::Dns(DnsQuery(1), Some(Ipv4Addr::new(10, 1, 2, 3)))]);
        assert_eq!(stack.resolve("host.local"), Ok(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(engine.pumps(), 2);
    }

    #[test]
    fn test_failed_lookup() {
        let (stack, engine) = stack();
        engine.script(vec![Event::Dns(DnsQuery(1), None)]);
        assert_eq!(
            stack.getaddrinfo("nowhere", 80),
            Err(SocketError::Resolve(EngineError::BUF))
        );
        assert_eq!(EngineError::BUF.code(), -2);
    }

    #[test]
    fn test_start_error_keeps_status() {
        let (stack, engine) = stack();
        engine.fail_dns(EngineError::ARG);
        assert_eq!(stack.resolve("bad..name"), Err(SocketError::Resolve(EngineError::ARG)));
    }

    #[test]
    fn test_queries_get_distinct_ids() {
        let (stack, engine) = stack();
        engine.script(vec![Event::Dns(DnsQuery(1), Some(Ipv4Addr::new(1, 1, 1, 1)))]);
        engine.script(vec![Event::Dns(DnsQuery(2), Some(Ipv4Addr::new(2, 2, 2, 2)))]);
        assert_eq!(stack.resolve("a"), Ok(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(stack.resolve("b"), Ok(Ipv4Addr::new(2, 2, 2, 2)));
    }
}
