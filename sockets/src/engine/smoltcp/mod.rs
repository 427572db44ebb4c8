//! Protocol engine backed by smoltcp.
//!
//! smoltcp is poll driven but has no callbacks; this engine polls every
//! interface on each pump and then walks its control blocks, turning state
//! changes into [`EventSink`] calls:
//!
//! - a connecting stream that reaches `Established` is reported connected
//! - received bytes are drained into one payload at a time; the next
//!   payload is pulled only after the previous one was released with
//!   `tcp_recved`, so unread data keeps the receive window closed
//! - a peer FIN is reported once, after all data before it
//! - a stream that drops to `Closed` on its own was reset, and is released
//! - a listening socket that completes a handshake is handed off as a new
//!   handle, and a fresh socket takes over listening on the endpoint
//!
//! Deliveries the sink refuses are kept and offered again on later pumps.

pub mod adapter;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec;
use alloc::vec::Vec;
use core::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, trace, warn};
use smoltcp::config::DNS_MAX_SERVER_COUNT;
use smoltcp::iface::{Config as IfaceConfig, Interface, SocketHandle, SocketSet};
use smoltcp::socket::dns::{self, GetQueryResultError, QueryHandle, Socket as DnsSocket};
use smoltcp::socket::tcp::{self, Socket as TcpSocket, SocketBuffer as TcpSocketBuffer, State as TcpState};
use smoltcp::socket::udp::{self, PacketBuffer as UdpPacketBuffer, PacketMetadata as UdpPacketMetadata, Socket as UdpSocket};
use smoltcp::time::Instant;
use smoltcp::wire::{
    DnsQueryType, EthernetAddress, HardwareAddress, IpAddress, IpCidr, IpEndpoint, IpListenEndpoint,
    Ipv4Address,
};

use super::{DnsQuery, DnsStart, EngineError, EventSink, Handle, Payload, ProtocolEngine, Receipt, Verdict};

pub use adapter::{FrameAdapter, FrameDriver};

const TCP_RX_BUFFER: usize = 8192;
const TCP_TX_BUFFER: usize = 8192;
const UDP_BUFFER: usize = 8192;
const UDP_PACKETS: usize = 8;
const EPHEMERAL_PORTS: core::ops::RangeInclusive<u16> = 49152..=65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Established,
    Listening,
}

struct TcpSlot {
    socket: SocketHandle,
    local: Option<SocketAddrV4>,
    reuse: bool,
    phase: Phase,
    /// Deliveries the sink refused, oldest first.
    held: VecDeque<Option<Payload>>,
    /// Bytes delivered and not yet released.
    unacked: usize,
    fin_reported: bool,
}

struct UdpSlot {
    socket: SocketHandle,
    local: Option<SocketAddrV4>,
    remote: Option<SocketAddrV4>,
    reuse: bool,
}

enum Slot {
    Tcp(TcpSlot),
    Udp(UdpSlot),
}

/// One brought-up virtual interface.
struct Vif {
    iface: Interface,
}

/// Outcome of walking one stream.
enum StreamStatus {
    Alive,
    Reset,
}

/// smoltcp-backed [`ProtocolEngine`].
///
/// Frame drivers are attached per vif before the stack brings the vif up.
pub struct SmoltcpEngine<D: FrameDriver> {
    devices: BTreeMap<u32, FrameAdapter<D>>,
    vifs: BTreeMap<u32, Vif>,
    default_vif: Option<u32>,
    sockets: SocketSet<'static>,
    slots: BTreeMap<Handle, Slot>,
    next_handle: u32,
    next_port: u16,
    /// Streams handed off by a listener, waiting for the sink to take them.
    offers: VecDeque<(Handle, Handle)>,
    /// Released sockets still finishing their close; the flag marks that a
    /// poll has run since.
    closing: Vec<(SocketHandle, bool)>,
    dns_servers: Vec<Ipv4Addr>,
    dns: Option<SocketHandle>,
    lookups: Vec<(DnsQuery, QueryHandle)>,
    seed: u64,
}

impl<D: FrameDriver> SmoltcpEngine<D> {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            vifs: BTreeMap::new(),
            default_vif: None,
            sockets: SocketSet::new(vec![]),
            slots: BTreeMap::new(),
            next_handle: 1,
            next_port: *EPHEMERAL_PORTS.start(),
            offers: VecDeque::new(),
            closing: Vec::new(),
            dns_servers: Vec::new(),
            dns: None,
            lookups: Vec::new(),
            seed: 0,
        }
    }

    /// Name servers for lookups. Only as many as smoltcp supports are used.
    pub fn with_dns_servers(mut self, servers: &[Ipv4Addr]) -> Self {
        self.dns_servers = servers.to_vec();
        self
    }

    /// Seed for initial sequence numbers and ephemeral choices.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Provide the frame driver backing `vif`.
    pub fn attach(&mut self, vif: u32, driver: D) {
        self.devices.insert(vif, FrameAdapter::new(driver));
    }

    pub fn device(&self, vif: u32) -> Option<&FrameAdapter<D>> {
        self.devices.get(&vif)
    }

    fn alloc_handle(&mut self) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }

    fn new_tcp_socket() -> TcpSocket<'static> {
        TcpSocket::new(
            TcpSocketBuffer::new(vec![0u8; TCP_RX_BUFFER]),
            TcpSocketBuffer::new(vec![0u8; TCP_TX_BUFFER]),
        )
    }

    fn new_udp_socket() -> UdpSocket<'static> {
        UdpSocket::new(
            UdpPacketBuffer::new(vec![UdpPacketMetadata::EMPTY; UDP_PACKETS], vec![0u8; UDP_BUFFER]),
            UdpPacketBuffer::new(vec![UdpPacketMetadata::EMPTY; UDP_PACKETS], vec![0u8; UDP_BUFFER]),
        )
    }

    fn port_in_use(&self, port: u16, tcp: bool) -> bool {
        self.slots.values().any(|slot| match slot {
            Slot::Tcp(s) if tcp => s.local.is_some_and(|l| l.port() == port),
            Slot::Udp(s) if !tcp => s.local.is_some_and(|l| l.port() == port),
            _ => false,
        })
    }

    fn ephemeral_port(&mut self, tcp: bool) -> u16 {
        let span = EPHEMERAL_PORTS.len();
        for _ in 0..span {
            let port = self.next_port;
            self.next_port = if port == *EPHEMERAL_PORTS.end() {
                *EPHEMERAL_PORTS.start()
            } else {
                port + 1
            };
            if !self.port_in_use(port, tcp) {
                return port;
            }
        }
        self.next_port
    }

    /// Resolve the port of a bind request, checking it against other
    /// control blocks of the same protocol.
    fn claim_port(&mut self, port: u16, reuse: bool, tcp: bool) -> Result<u16, EngineError> {
        if port == 0 {
            return Ok(self.ephemeral_port(tcp));
        }
        if !reuse && self.port_in_use(port, tcp) {
            return Err(EngineError::USE);
        }
        Ok(port)
    }

    fn tcp_slot(&mut self, handle: Handle) -> Result<&mut TcpSlot, EngineError> {
        match self.slots.get_mut(&handle) {
            Some(Slot::Tcp(slot)) => Ok(slot),
            _ => Err(EngineError::ARG),
        }
    }

    fn udp_slot(&mut self, handle: Handle) -> Result<&mut UdpSlot, EngineError> {
        match self.slots.get_mut(&handle) {
            Some(Slot::Udp(slot)) => Ok(slot),
            _ => Err(EngineError::ARG),
        }
    }

    /// Release a stream socket once it has finished closing.
    fn retire(&mut self, socket: SocketHandle) {
        self.closing.push((socket, false));
    }

    fn poll_vif(&mut self, vif: u32, now: Instant) {
        let (Some(v), Some(device)) = (self.vifs.get_mut(&vif), self.devices.get_mut(&vif)) else {
            return;
        };
        let _ = v.iface.poll(now, device, &mut self.sockets);
    }

    /// Turn smoltcp state into sink events.
    fn dispatch(&mut self, sink: &mut dyn EventSink) {
        self.reap_closing();
        self.hand_off_connections();
        self.offer_connections(sink);

        let handles: Vec<Handle> = self.slots.keys().copied().collect();
        for handle in handles {
            let is_stream = match self.slots.get(&handle) {
                Some(Slot::Tcp(_)) => true,
                Some(Slot::Udp(_)) => false,
                None => continue,
            };
            if !is_stream {
                self.dispatch_datagrams(handle, sink);
            } else if let StreamStatus::Reset = self.dispatch_stream(handle, sink) {
                self.reset_stream(handle, sink);
            }
        }

        self.dispatch_lookups(sink);
    }

    fn reap_closing(&mut self) {
        let sockets = &mut self.sockets;
        self.closing.retain_mut(|(socket, polled)| {
            let state = sockets.get::<TcpSocket>(*socket).state();
            if *polled && matches!(state, TcpState::Closed | TcpState::TimeWait) {
                sockets.remove(*socket);
                return false;
            }
            *polled = true;
            true
        });
    }

    /// Move completed handshakes off their listening sockets.
    fn hand_off_connections(&mut self) {
        let listeners: Vec<Handle> = self
            .slots
            .iter()
            .filter_map(|(h, slot)| match slot {
                Slot::Tcp(s) if s.phase == Phase::Listening => Some(*h),
                _ => None,
            })
            .collect();

        for listener in listeners {
            let Ok(slot) = self.tcp_slot(listener) else { continue };
            let (socket, local) = (slot.socket, slot.local);
            let state = self.sockets.get::<TcpSocket>(socket).state();
            if !matches!(state, TcpState::Established | TcpState::CloseWait) {
                continue;
            }

            let mut fresh = Self::new_tcp_socket();
            if let Err(err) = fresh.listen(listen_endpoint(local)) {
                warn!("listener {}: cannot listen again: {:?}", listener, err);
                continue;
            }
            let fresh = self.sockets.add(fresh);
            if let Ok(slot) = self.tcp_slot(listener) {
                slot.socket = fresh;
            }

            let child = self.alloc_handle();
            self.slots.insert(
                child,
                Slot::Tcp(TcpSlot {
                    socket,
                    local,
                    reuse: false,
                    phase: Phase::Established,
                    held: VecDeque::new(),
                    unacked: 0,
                    fin_reported: false,
                }),
            );
            debug!("listener {}: connection {} established", listener, child);
            self.offers.push_back((listener, child));
        }
    }

    fn offer_connections(&mut self, sink: &mut dyn EventSink) {
        let pending = core::mem::take(&mut self.offers);
        for (listener, child) in pending {
            if !self.slots.contains_key(&child) {
                continue;
            }
            if sink.stream_accepted(listener, child) == Verdict::Busy {
                self.offers.push_back((listener, child));
            }
        }
    }

    fn dispatch_stream(&mut self, handle: Handle, sink: &mut dyn EventSink) -> StreamStatus {
        let Some(Slot::Tcp(slot)) = self.slots.get_mut(&handle) else {
            return StreamStatus::Alive;
        };
        if matches!(slot.phase, Phase::Idle | Phase::Listening) {
            return StreamStatus::Alive;
        }
        let socket = self.sockets.get_mut::<TcpSocket>(slot.socket);

        match (slot.phase, socket.state()) {
            (_, TcpState::Closed) => return StreamStatus::Reset,
            (Phase::Connecting, TcpState::SynSent | TcpState::SynReceived) => {
                return StreamStatus::Alive
            }
            (Phase::Connecting, _) => {
                slot.phase = Phase::Established;
                sink.stream_connected(handle);
            }
            _ => {}
        }

        while let Some(delivery) = slot.held.pop_front() {
            if let Receipt::Refused(back) = sink.stream_received(handle, delivery) {
                slot.held.push_front(back);
                return StreamStatus::Alive;
            }
        }

        if slot.unacked == 0 && socket.can_recv() {
            let pulled = socket.recv(|buf| (buf.len(), buf.to_vec()));
            if let Ok(payload) = pulled {
                if !payload.is_empty() {
                    slot.unacked = payload.len();
                    if let Receipt::Refused(back) = sink.stream_received(handle, Some(payload)) {
                        slot.held.push_back(back);
                        return StreamStatus::Alive;
                    }
                }
            }
        }

        if !slot.fin_reported && !socket.may_recv() && !socket.can_recv() {
            trace!("stream {}: peer closed", handle);
            match sink.stream_received(handle, None) {
                Receipt::Taken => slot.fin_reported = true,
                Receipt::Refused(_) => {}
            }
        }
        StreamStatus::Alive
    }

    fn reset_stream(&mut self, handle: Handle, sink: &mut dyn EventSink) {
        if let Some(Slot::Tcp(slot)) = self.slots.remove(&handle) {
            self.sockets.remove(slot.socket);
        }
        self.offers.retain(|(_, child)| *child != handle);
        debug!("stream {}: reset", handle);
        sink.stream_error(handle, EngineError::RST);
    }

    fn dispatch_datagrams(&mut self, handle: Handle, sink: &mut dyn EventSink) {
        let Some(Slot::Udp(slot)) = self.slots.get(&handle) else {
            return;
        };
        let socket = self.sockets.get_mut::<UdpSocket>(slot.socket);
        while let Ok((data, meta)) = socket.recv() {
            let Some(from) = endpoint_v4(meta.endpoint) else { continue };
            sink.datagram_received(handle, data.to_vec(), from);
        }
    }

    fn dispatch_lookups(&mut self, sink: &mut dyn EventSink) {
        let Some(dns) = self.dns else { return };
        let socket = self.sockets.get_mut::<DnsSocket>(dns);
        self.lookups.retain(|(query, qh)| match socket.get_query_result(*qh) {
            Ok(addrs) => {
                let addr = addrs.iter().copied().find_map(addr_v4);
                sink.dns_resolved(*query, addr);
                false
            }
            Err(GetQueryResultError::Pending) => true,
            Err(GetQueryResultError::Failed) => {
                sink.dns_resolved(*query, None);
                false
            }
        });
    }

    fn stream_socket(&mut self, handle: Handle) -> Result<&mut TcpSocket<'static>, EngineError> {
        let socket = self.tcp_slot(handle)?.socket;
        Ok(self.sockets.get_mut::<TcpSocket>(socket))
    }

    /// Bind a datagram socket that has no local port yet.
    fn ensure_udp_bound(&mut self, handle: Handle) -> Result<(), EngineError> {
        if self.udp_slot(handle)?.local.is_none() {
            self.udp_bind(handle, Ipv4Addr::UNSPECIFIED, 0)?;
        }
        Ok(())
    }

    fn udp_enqueue(&mut self, handle: Handle, data: &[u8], to: SocketAddrV4) -> Result<(), EngineError> {
        self.ensure_udp_bound(handle)?;
        let socket = self.udp_slot(handle)?.socket;
        self.sockets
            .get_mut::<UdpSocket>(socket)
            .send_slice(data, endpoint(to))
            .map_err(|err| match err {
                udp::SendError::BufferFull => EngineError::MEM,
                udp::SendError::Unaddressable => EngineError::RTE,
            })
    }
}

impl<D: FrameDriver> Default for SmoltcpEngine<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: FrameDriver> ProtocolEngine for SmoltcpEngine<D> {
    fn init(&mut self) {
        self.vifs.clear();
        self.default_vif = None;
        self.sockets = SocketSet::new(vec![]);
        self.slots.clear();
        self.offers.clear();
        self.closing.clear();
        self.lookups.clear();

        let servers: Vec<IpAddress> = self
            .dns_servers
            .iter()
            .take(DNS_MAX_SERVER_COUNT)
            .map(|s| IpAddress::Ipv4(v4(*s)))
            .collect();
        self.dns = if servers.is_empty() {
            None
        } else {
            let queries: Vec<Option<dns::DnsQuery>> = Vec::new();
            Some(self.sockets.add(DnsSocket::new(&servers, queries)))
        };
    }

    fn tcp_new(&mut self) -> Option<Handle> {
        let socket = self.sockets.add(Self::new_tcp_socket());
        let handle = self.alloc_handle();
        self.slots.insert(
            handle,
            Slot::Tcp(TcpSlot {
                socket,
                local: None,
                reuse: false,
                phase: Phase::Idle,
                held: VecDeque::new(),
                unacked: 0,
                fin_reported: false,
            }),
        );
        Some(handle)
    }

    fn udp_new(&mut self) -> Option<Handle> {
        let socket = self.sockets.add(Self::new_udp_socket());
        let handle = self.alloc_handle();
        self.slots.insert(
            handle,
            Slot::Udp(UdpSlot {
                socket,
                local: None,
                remote: None,
                reuse: false,
            }),
        );
        Some(handle)
    }

    fn tcp_bind(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        let reuse = self.tcp_slot(handle)?.reuse;
        let port = self.claim_port(port, reuse, true)?;
        self.tcp_slot(handle)?.local = Some(SocketAddrV4::new(addr, port));
        Ok(())
    }

    fn udp_bind(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        let reuse = self.udp_slot(handle)?.reuse;
        let port = self.claim_port(port, reuse, false)?;
        let local = SocketAddrV4::new(addr, port);
        let socket = {
            let slot = self.udp_slot(handle)?;
            slot.local = Some(local);
            slot.socket
        };
        let socket = self.sockets.get_mut::<UdpSocket>(socket);
        if socket.is_open() {
            socket.close();
        }
        socket.bind(listen_endpoint(Some(local))).map_err(|err| match err {
            udp::BindError::InvalidState => EngineError::ISCONN,
            udp::BindError::Unaddressable => EngineError::VAL,
        })
    }

    fn tcp_listen(&mut self, handle: Handle, _backlog: u8) -> Option<Handle> {
        let (old, reuse, local) = {
            let slot = self.tcp_slot(handle).ok()?;
            (slot.socket, slot.reuse, slot.local)
        };
        let local = match local {
            Some(local) => local,
            None => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.ephemeral_port(true)),
        };

        let mut socket = Self::new_tcp_socket();
        if let Err(err) = socket.listen(listen_endpoint(Some(local))) {
            debug!("listen on {} failed: {:?}", local, err);
            return None;
        }

        self.slots.remove(&handle);
        self.sockets.remove(old);
        let socket = self.sockets.add(socket);
        let listener = self.alloc_handle();
        self.slots.insert(
            listener,
            Slot::Tcp(TcpSlot {
                socket,
                local: Some(local),
                reuse,
                phase: Phase::Listening,
                held: VecDeque::new(),
                unacked: 0,
                fin_reported: false,
            }),
        );
        Some(listener)
    }

    /// smoltcp has no accept window to reopen: a listener hands off each
    /// completed handshake at once, and connections the sink answered
    /// `Busy` stay queued in `offers` until a later pump. Nothing to do.
    fn tcp_accepted(&mut self, listener: Handle) {
        trace!("listener {}: connection accepted", listener);
    }

    fn tcp_connect(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        let (socket, local) = {
            let slot = self.tcp_slot(handle)?;
            (slot.socket, slot.local)
        };
        let local = match local {
            Some(local) => local,
            None => {
                let port = self.ephemeral_port(true);
                let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
                self.tcp_slot(handle)?.local = Some(local);
                local
            }
        };

        let Some(vif) = self.default_vif else {
            return Err(EngineError::RTE);
        };
        let Some(v) = self.vifs.get_mut(&vif) else {
            return Err(EngineError::RTE);
        };
        self.sockets
            .get_mut::<TcpSocket>(socket)
            .connect(v.iface.context(), endpoint(SocketAddrV4::new(addr, port)), listen_endpoint(Some(local)))
            .map_err(|err| match err {
                tcp::ConnectError::InvalidState => EngineError::ISCONN,
                tcp::ConnectError::Unaddressable => EngineError::RTE,
            })?;
        self.tcp_slot(handle)?.phase = Phase::Connecting;
        Ok(())
    }

    fn udp_connect(&mut self, handle: Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError> {
        self.ensure_udp_bound(handle)?;
        self.udp_slot(handle)?.remote = Some(SocketAddrV4::new(addr, port));
        Ok(())
    }

    fn tcp_write(&mut self, handle: Handle, data: &[u8]) -> Result<(), EngineError> {
        let socket = self.stream_socket(handle)?;
        if data.len() > socket.send_capacity() - socket.send_queue() {
            return Err(EngineError::MEM);
        }
        socket.send_slice(data).map_err(|_| EngineError::CONN)?;
        Ok(())
    }

    fn tcp_sndbuf(&self, handle: Handle) -> usize {
        let Some(Slot::Tcp(slot)) = self.slots.get(&handle) else {
            return 0;
        };
        let socket = self.sockets.get::<TcpSocket>(slot.socket);
        if socket.may_send() {
            socket.send_capacity() - socket.send_queue()
        } else {
            0
        }
    }

    fn tcp_recved(&mut self, handle: Handle, len: usize) {
        if let Ok(slot) = self.tcp_slot(handle) {
            slot.unacked = slot.unacked.saturating_sub(len);
        }
    }

    fn tcp_close(&mut self, handle: Handle) -> Result<(), EngineError> {
        let Some(Slot::Tcp(slot)) = self.slots.remove(&handle) else {
            return Err(EngineError::ARG);
        };
        self.sockets.get_mut::<TcpSocket>(slot.socket).close();
        self.retire(slot.socket);

        // connections nobody will accept any more
        let orphans: Vec<Handle> = self
            .offers
            .iter()
            .filter(|(listener, _)| *listener == handle)
            .map(|(_, child)| *child)
            .collect();
        self.offers.retain(|(listener, _)| *listener != handle);
        for child in orphans {
            self.tcp_abort(child);
        }
        Ok(())
    }

    fn tcp_abort(&mut self, handle: Handle) {
        if let Some(Slot::Tcp(slot)) = self.slots.remove(&handle) {
            self.sockets.get_mut::<TcpSocket>(slot.socket).abort();
            self.retire(slot.socket);
        }
        self.offers.retain(|(_, child)| *child != handle);
    }

    fn tcp_is_listening(&self, handle: Handle) -> bool {
        matches!(self.slots.get(&handle), Some(Slot::Tcp(slot)) if slot.phase == Phase::Listening)
    }

    fn tcp_remote(&self, handle: Handle) -> Option<SocketAddrV4> {
        let Some(Slot::Tcp(slot)) = self.slots.get(&handle) else {
            return None;
        };
        endpoint_v4(self.sockets.get::<TcpSocket>(slot.socket).remote_endpoint()?)
    }

    fn udp_send(&mut self, handle: Handle, data: &[u8]) -> Result<(), EngineError> {
        let remote = self.udp_slot(handle)?.remote.ok_or(EngineError::RTE)?;
        self.udp_enqueue(handle, data, remote)
    }

    fn udp_sendto(&mut self, handle: Handle, data: &[u8], to: SocketAddrV4) -> Result<(), EngineError> {
        self.udp_enqueue(handle, data, to)
    }

    fn udp_remove(&mut self, handle: Handle) {
        if let Some(Slot::Udp(slot)) = self.slots.remove(&handle) {
            self.sockets.remove(slot.socket);
        }
    }

    fn set_reuse_addr(&mut self, handle: Handle, enable: bool) {
        match self.slots.get_mut(&handle) {
            Some(Slot::Tcp(slot)) => slot.reuse = enable,
            Some(Slot::Udp(slot)) => slot.reuse = enable,
            None => {}
        }
    }

    fn add_interface(
        &mut self,
        vif: u32,
        addr: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        make_default: bool,
    ) -> Result<(), EngineError> {
        if self.vifs.contains_key(&vif) {
            return Err(EngineError::IF);
        }
        let Some(device) = self.devices.get_mut(&vif) else {
            warn!("vif{}: no frame driver attached", vif);
            return Err(EngineError::IF);
        };

        let mut config = IfaceConfig::new(HardwareAddress::Ethernet(EthernetAddress(device.mac_address())));
        config.random_seed = self.seed ^ u64::from(vif);
        let mut iface = Interface::new(config, device, Instant::ZERO);

        let prefix = u32::from(mask).leading_ones() as u8;
        iface.update_ip_addrs(|addrs| {
            let _ = addrs.push(IpCidr::new(IpAddress::Ipv4(v4(addr)), prefix));
        });
        if !gateway.is_unspecified() {
            iface
                .routes_mut()
                .add_default_ipv4_route(v4(gateway))
                .map_err(|_| EngineError::MEM)?;
        }

        self.vifs.insert(vif, Vif { iface });
        if make_default || self.default_vif.is_none() {
            self.default_vif = Some(vif);
        }
        Ok(())
    }

    fn poll_interface(&mut self, vif: u32, now_ms: u64, sink: &mut dyn EventSink) {
        self.poll_vif(vif, instant(now_ms));
        self.dispatch(sink);
    }

    fn dns_lookup(&mut self, name: &str, query: DnsQuery) -> Result<DnsStart, EngineError> {
        if let Ok(addr) = name.parse::<Ipv4Addr>() {
            return Ok(DnsStart::Resolved(addr));
        }
        let dns = self.dns.ok_or(EngineError::VAL)?;
        let Some(vif) = self.default_vif else {
            return Err(EngineError::RTE);
        };
        let Some(v) = self.vifs.get_mut(&vif) else {
            return Err(EngineError::RTE);
        };
        let qh = self
            .sockets
            .get_mut::<DnsSocket>(dns)
            .start_query(v.iface.context(), name, DnsQueryType::A)
            .map_err(|err| {
                debug!("lookup of {} not started: {:?}", name, err);
                EngineError::ARG
            })?;
        self.lookups.push((query, qh));
        Ok(DnsStart::Pending)
    }

    fn pump(&mut self, now_ms: u64, sink: &mut dyn EventSink) {
        let now = instant(now_ms);
        let vifs: Vec<u32> = self.vifs.keys().copied().collect();
        for vif in vifs {
            self.poll_vif(vif, now);
        }
        self.dispatch(sink);
    }
}

fn instant(now_ms: u64) -> Instant {
    Instant::from_millis(i64::try_from(now_ms).unwrap_or(i64::MAX))
}

fn v4(addr: Ipv4Addr) -> Ipv4Address {
    Ipv4Address(addr.octets())
}

#[allow(irrefutable_let_patterns)]
fn addr_v4(addr: IpAddress) -> Option<Ipv4Addr> {
    if let IpAddress::Ipv4(v4) = addr {
        Some(Ipv4Addr::from(v4.0))
    } else {
        None
    }
}

fn endpoint(addr: SocketAddrV4) -> IpEndpoint {
    IpEndpoint::new(IpAddress::Ipv4(v4(*addr.ip())), addr.port())
}

fn endpoint_v4(ep: IpEndpoint) -> Option<SocketAddrV4> {
    Some(SocketAddrV4::new(addr_v4(ep.addr)?, ep.port))
}

fn listen_endpoint(local: Option<SocketAddrV4>) -> IpListenEndpoint {
    match local {
        Some(local) => IpListenEndpoint {
            addr: (!local.ip().is_unspecified()).then(|| IpAddress::Ipv4(v4(*local.ip()))),
            port: local.port(),
        },
        None => IpListenEndpoint { addr: None, port: 0 },
    }
}
