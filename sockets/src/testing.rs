//! Scripted engine and host for unit tests.
//!
//! Both are cheap clones over shared state, so a test keeps one copy for
//! scripting and inspection while the stack owns another.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;
use std::vec::Vec;

use crate::engine::{
    DnsQuery, DnsStart, EngineError, EventSink, Handle, Payload, ProtocolEngine, Receipt, Verdict,
};
use crate::poll::Host;

/// Something the mock engine does during a pump.
#[derive(Debug, Clone)]
pub enum Event {
    Datagram(Handle, Payload, SocketAddrV4),
    Data(Handle, Option<Payload>),
    Error(Handle, EngineError),
    Connected(Handle),
    /// A peer connects to `listener`; the child gets the next free handle.
    Incoming { listener: Handle, remote: SocketAddrV4 },
    SetSndbuf(usize),
    Dns(DnsQuery, Option<Ipv4Addr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Tcp,
    Udp,
}

#[derive(Debug, Clone)]
pub struct Pcb {
    pub kind: Kind,
    pub listening: bool,
    pub local: Option<SocketAddrV4>,
    pub remote: Option<SocketAddrV4>,
    pub reuse: bool,
}

#[derive(Default)]
struct State {
    next_handle: u32,
    pcbs: BTreeMap<Handle, Pcb>,
    script: VecDeque<Vec<Event>>,
    deferred: BTreeMap<Handle, VecDeque<Option<Payload>>>,
    incoming: Vec<(Handle, Handle)>,
    sndbuf: usize,
    inits: u32,
    pumps: u32,
    writes: Vec<(Handle, Vec<u8>)>,
    acks: Vec<(Handle, usize)>,
    aborted: Vec<Handle>,
    closed: Vec<Handle>,
    removed: Vec<Handle>,
    sent: Vec<(Handle, Vec<u8>, Option<SocketAddrV4>)>,
    verdicts: Vec<(Handle, Verdict)>,
    accepted_acks: u32,
    interfaces: Vec<(u32, Ipv4Addr, bool)>,
    polled: Vec<u32>,
    connect_status: Option<EngineError>,
    bind_status: Option<EngineError>,
    close_status: Option<EngineError>,
    send_status: Option<EngineError>,
    add_status: Option<EngineError>,
    dns_immediate: BTreeMap<String, Ipv4Addr>,
    dns_status: Option<EngineError>,
    tcp_exhausted: bool,
}

#[derive(Clone, Default)]
pub struct MockEngine {
    state: Rc<RefCell<State>>,
}

impl MockEngine {
    pub fn new() -> Self {
        let engine = Self::default();
        engine.state.borrow_mut().sndbuf = 4096;
        engine.state.borrow_mut().next_handle = 1;
        engine
    }

    /// Events delivered by the next pump; consecutive calls queue later pumps.
    pub fn script(&self, events: Vec<Event>) {
        self.state.borrow_mut().script.push_back(events);
    }

    pub fn set_sndbuf(&self, n: usize) {
        self.state.borrow_mut().sndbuf = n;
    }
    pub fn fail_connect(&self, err: EngineError) {
        self.state.borrow_mut().connect_status = Some(err);
    }
    pub fn fail_bind(&self, err: EngineError) {
        self.state.borrow_mut().bind_status = Some(err);
    }
    pub fn fail_close(&self, err: EngineError) {
        self.state.borrow_mut().close_status = Some(err);
    }
    pub fn send_status(&self, err: EngineError) {
        self.state.borrow_mut().send_status = Some(err);
    }
    pub fn fail_add_interface(&self, err: EngineError) {
        self.state.borrow_mut().add_status = Some(err);
    }
    pub fn fail_dns(&self, err: EngineError) {
        self.state.borrow_mut().dns_status = Some(err);
    }
    pub fn exhaust_tcp(&self) {
        self.state.borrow_mut().tcp_exhausted = true;
    }
    pub fn resolve_now(&self, name: &str, addr: Ipv4Addr) {
        self.state.borrow_mut().dns_immediate.insert(name.into(), addr);
    }

    /// Most recently allocated handle.
    pub fn last_handle(&self) -> Handle {
        Handle(self.state.borrow().next_handle - 1)
    }

    pub fn pcb(&self, handle: Handle) -> Option<Pcb> {
        self.state.borrow().pcbs.get(&handle).cloned()
    }
    pub fn live_handles(&self) -> usize {
        self.state.borrow().pcbs.len()
    }
    pub fn inits(&self) -> u32 {
        self.state.borrow().inits
    }
    pub fn pumps(&self) -> u32 {
        self.state.borrow().pumps
    }
    pub fn writes(&self) -> Vec<(Handle, Vec<u8>)> {
        self.state.borrow().writes.clone()
    }
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().writes.iter().flat_map(|(_, w)| w.clone()).collect()
    }
    pub fn acks(&self) -> Vec<(Handle, usize)> {
        self.state.borrow().acks.clone()
    }
    pub fn aborted(&self) -> Vec<Handle> {
        self.state.borrow().aborted.clone()
    }
    pub fn closed(&self) -> Vec<Handle> {
        self.state.borrow().closed.clone()
    }
    pub fn removed(&self) -> Vec<Handle> {
        self.state.borrow().removed.clone()
    }
    pub fn sent(&self) -> Vec<(Handle, Vec<u8>, Option<SocketAddrV4>)> {
        self.state.borrow().sent.clone()
    }
    pub fn verdicts(&self) -> Vec<(Handle, Verdict)> {
        self.state.borrow().verdicts.clone()
    }
    pub fn accepted_acks(&self) -> u32 {
        self.state.borrow().accepted_acks
    }
    pub fn interfaces(&self) -> Vec<(u32, Ipv4Addr, bool)> {
        self.state.borrow().interfaces.clone()
    }
    pub fn polled(&self) -> Vec<u32> {
        self.state.borrow().polled.clone()
    }
    pub fn deferred(&self, handle: Handle) -> usize {
        self.state.borrow().deferred.get(&handle).map_or(0, VecDeque::len)
    }

    fn alloc(&self, kind: Kind) -> Handle {
        let mut st = self.state.borrow_mut();
        let handle = Handle(st.next_handle);
        st.next_handle += 1;
        st.pcbs.insert(
            handle,
            Pcb {
                kind,
                listening: false,
                local: None,
                remote: None,
                reuse: false,
            },
        );
        handle
    }

    fn deliver(&self, sink: &mut dyn EventSink, handle: Handle, payload: Option<Payload>) -> bool {
        match sink.stream_received(handle, payload) {
            Receipt::Taken => true,
            Receipt::Refused(payload) => {
                self.state
                    .borrow_mut()
                    .deferred
                    .entry(handle)
                    .or_default()
                    .push_front(payload);
                false
            }
        }
    }
}

impl ProtocolEngine for MockEngine {
    fn init(&mut self) {
        let mut st = self.state.borrow_mut();
        st.inits += 1;
        st.pcbs.clear();
        st.deferred.clear();
        st.incoming.clear();
    }

    fn tcp_new(&mut self) -> Option<Handle> {
        if self.state.borrow().tcp_exhausted {
            return None;
        }
        Some(self.alloc(Kind::Tcp))
    }

    fn udp_new(&mut self) -> Option<Handle> {
        Some(self.alloc(Kind::Udp))
    }

    fn tcp_bind(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        if let Some(err) = st.bind_status {
            return Err(err);
        }
        let pcb = st.pcbs.get_mut(&handle).ok_or(EngineError::ARG)?;
        pcb.local = Some(SocketAddrV4::new(addr, port));
        Ok(())
    }

    fn udp_bind(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        self.tcp_bind(handle, addr, port)
    }

    fn tcp_listen(&mut self, handle: Handle, _backlog: u8) -> Option<Handle> {
        let old = self.state.borrow_mut().pcbs.remove(&handle)?;
        let listener = self.alloc(Kind::Tcp);
        let mut st = self.state.borrow_mut();
        let pcb = st.pcbs.get_mut(&listener)?;
        pcb.listening = true;
        pcb.local = old.local;
        pcb.reuse = old.reuse;
        Some(listener)
    }

    fn tcp_accepted(&mut self, _listener: Handle) {
        self.state.borrow_mut().accepted_acks += 1;
    }

    fn tcp_connect(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        if let Some(err) = st.connect_status {
            return Err(err);
        }
        let pcb = st.pcbs.get_mut(&handle).ok_or(EngineError::ARG)?;
        pcb.remote = Some(SocketAddrV4::new(addr, port));
        Ok(())
    }

    fn udp_connect(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        let pcb = st.pcbs.get_mut(&handle).ok_or(EngineError::ARG)?;
        pcb.remote = Some(SocketAddrV4::new(addr, port));
        Ok(())
    }

    fn tcp_write(&mut self, handle: Handle, data: &[u8]) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        if data.len() > st.sndbuf {
            return Err(EngineError::MEM);
        }
        st.sndbuf -= data.len();
        st.writes.push((handle, data.to_vec()));
        Ok(())
    }

    fn tcp_sndbuf(&self, _handle: Handle) -> usize {
        self.state.borrow().sndbuf
    }

    fn tcp_recved(&mut self, handle: Handle, len: usize) {
        self.state.borrow_mut().acks.push((handle, len));
    }

    fn tcp_close(&mut self, handle: Handle) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        if let Some(err) = st.close_status {
            return Err(err);
        }
        st.pcbs.remove(&handle);
        st.closed.push(handle);
        Ok(())
    }

    fn tcp_abort(&mut self, handle: Handle) {
        let mut st = self.state.borrow_mut();
        st.pcbs.remove(&handle);
        st.aborted.push(handle);
    }

    fn tcp_is_listening(&self, handle: Handle) -> bool {
        self.state.borrow().pcbs.get(&handle).is_some_and(|pcb| pcb.listening)
    }

    fn tcp_remote(&self, handle: Handle) -> Option<SocketAddrV4> {
        self.state.borrow().pcbs.get(&handle)?.remote
    }

    fn udp_send(&mut self, handle: Handle, data: &[u8]) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        st.sent.push((handle, data.to_vec(), None));
        st.send_status.map_or(Ok(()), Err)
    }

    fn udp_sendto(&mut self, handle: Handle, data: &[u8], to: SocketAddrV4) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        st.sent.push((handle, data.to_vec(), Some(to)));
        st.send_status.map_or(Ok(()), Err)
    }

    fn udp_remove(&mut self, handle: Handle) {
        let mut st = self.state.borrow_mut();
        st.pcbs.remove(&handle);
        st.removed.push(handle);
    }

    fn set_reuse_addr(&mut self, handle: Handle, enable: bool) {
        if let Some(pcb) = self.state.borrow_mut().pcbs.get_mut(&handle) {
            pcb.reuse = enable;
        }
    }

    fn add_interface(
        &mut self,
        vif: u32,
        addr: Ipv4Addr,
        _mask: Ipv4Addr,
        _gateway: Ipv4Addr,
        make_default: bool,
    ) -> Result<(), EngineError> {
        let mut st = self.state.borrow_mut();
        if let Some(err) = st.add_status {
            return Err(err);
        }
        st.interfaces.push((vif, addr, make_default));
        Ok(())
    }

    fn poll_interface(&mut self, vif: u32, _now_ms: u64, _sink: &mut dyn EventSink) {
        self.state.borrow_mut().polled.push(vif);
    }

    fn dns_lookup(&mut self, name: &str, _query: DnsQuery) -> Result<DnsStart, EngineError> {
        let st = self.state.borrow();
        if let Some(err) = st.dns_status {
            return Err(err);
        }
        Ok(match st.dns_immediate.get(name) {
            Some(addr) => DnsStart::Resolved(*addr),
            None => DnsStart::Pending,
        })
    }

    fn pump(&mut self, _now_ms: u64, sink: &mut dyn EventSink) {
        self.state.borrow_mut().pumps += 1;

        // redeliver what was refused earlier
        let deferred: Vec<Handle> = self.state.borrow().deferred.keys().copied().collect();
        for handle in deferred {
            loop {
                let next = self
                    .state
                    .borrow_mut()
                    .deferred
                    .get_mut(&handle)
                    .and_then(VecDeque::pop_front);
                let Some(payload) = next else { break };
                if !self.deliver(sink, handle, payload) {
                    break;
                }
            }
            let mut st = self.state.borrow_mut();
            if st.deferred.get(&handle).is_some_and(VecDeque::is_empty) {
                st.deferred.remove(&handle);
            }
        }

        // re-offer connections a listener turned away
        let pending = core::mem::take(&mut self.state.borrow_mut().incoming);
        for (listener, conn) in pending {
            let verdict = sink.stream_accepted(listener, conn);
            let mut st = self.state.borrow_mut();
            st.verdicts.push((conn, verdict));
            if verdict == Verdict::Busy {
                st.incoming.push((listener, conn));
            }
        }

        let batch = self.state.borrow_mut().script.pop_front().unwrap_or_default();
        for event in batch {
            match event {
                Event::Datagram(handle, payload, from) => sink.datagram_received(handle, payload, from),
                Event::Data(handle, payload) => {
                    let queued = self.state.borrow().deferred.contains_key(&handle);
                    if queued {
                        self.state
                            .borrow_mut()
                            .deferred
                            .entry(handle)
                            .or_default()
                            .push_back(payload);
                    } else {
                        self.deliver(sink, handle, payload);
                    }
                }
                Event::Error(handle, err) => {
                    self.state.borrow_mut().pcbs.remove(&handle);
                    sink.stream_error(handle, err);
                }
                Event::Connected(handle) => sink.stream_connected(handle),
                Event::Incoming { listener, remote } => {
                    let conn = self.alloc(Kind::Tcp);
                    if let Some(pcb) = self.state.borrow_mut().pcbs.get_mut(&conn) {
                        pcb.remote = Some(remote);
                    }
                    let verdict = sink.stream_accepted(listener, conn);
                    let mut st = self.state.borrow_mut();
                    st.verdicts.push((conn, verdict));
                    if verdict == Verdict::Busy {
                        st.incoming.push((listener, conn));
                    }
                }
                Event::SetSndbuf(n) => self.state.borrow_mut().sndbuf = n,
                Event::Dns(query, addr) => sink.dns_resolved(query, addr),
            }
        }
    }
}

/// Clock that only moves when slept on.
#[derive(Clone, Default)]
pub struct MockHost {
    now: Rc<RefCell<u64>>,
    sleeps: Rc<RefCell<Vec<u32>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slept(&self) -> u64 {
        self.sleeps.borrow().iter().map(|&ms| u64::from(ms)).sum()
    }

    pub fn sleeps(&self) -> Vec<u32> {
        self.sleeps.borrow().clone()
    }
}

impl Host for MockHost {
    fn now_ms(&self) -> u64 {
        *self.now.borrow()
    }

    fn sleep_ms(&mut self, ms: u32) {
        *self.now.borrow_mut() += u64::from(ms);
        self.sleeps.borrow_mut().push(ms);
    }
}
