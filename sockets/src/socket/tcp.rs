//! Stream transfer logic: listen, accept, connect, send, recv, sendall.

use core::net::{Ipv4Addr, SocketAddrV4};

use crate::bridge::Role;
use crate::engine::Handle;
use crate::error::{Errno, Result, SocketError};
use crate::poll::WaitError;

use super::{Socket, SocketState, Timeout, Transport};

impl Socket {
    /// Turn a bound stream socket into a listener.
    ///
    /// Only one inbound connection is held at a time whatever `backlog`
    /// says; further arrivals are handed back to the engine, which offers
    /// them again once the pending one has been accepted.
    pub fn listen(&self, backlog: u8) -> Result<()> {
        let handle = self.live_handle()?;
        if self.transport() != Transport::Stream {
            return Err(Errno::EOPNOTSUPP.into());
        }

        let listener = self.stack.inner().engine.tcp_listen(handle, backlog);
        let listener = listener.ok_or(SocketError::Os(Errno::ENOMEM))?;

        {
            let mut shared = self.stack.inner();
            shared.bridge.forget(handle);
            shared.bridge.register(listener, Role::Listener, &self.core);
        }
        let mut core = self.core.borrow_mut();
        core.handle = Some(listener);
        core.state = SocketState::Listening;
        Ok(())
    }

    /// Wait for an inbound connection and wrap it in a connected socket.
    /// The new socket inherits this socket's timeout.
    pub fn accept(&self) -> Result<(Socket, SocketAddrV4)> {
        let listener = self.live_handle()?;
        if self.transport() != Transport::Stream {
            return Err(Errno::EOPNOTSUPP.into());
        }
        if !self.stack.inner().engine.tcp_is_listening(listener) {
            return Err(Errno::EINVAL.into());
        }

        self.wait(|core| core.mailbox.has_connection() || core.handle.is_none())?;

        let (conn, timeout) = {
            let mut core = self.core.borrow_mut();
            (core.mailbox.take_connection(), core.timeout)
        };
        let Some(conn) = conn else {
            return Err(self.check_connected().err().unwrap_or(SocketError::Os(Errno::EBADF)));
        };

        let peer = self.stack.inner().engine.tcp_remote(conn);
        let socket = Socket::adopt(&self.stack, conn, timeout, peer);
        self.stack.inner().engine.tcp_accepted(listener);

        let addr = peer.unwrap_or(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        Ok((socket, addr))
    }

    pub(super) fn tcp_connect(&self, handle: Handle, addr: SocketAddrV4) -> Result<()> {
        {
            let mut core = self.core.borrow_mut();
            match core.state {
                SocketState::New => {}
                SocketState::Connected => return Err(Errno::EALREADY.into()),
                _ => return Err(Errno::EINPROGRESS.into()),
            }
            core.state = SocketState::Connecting;
        }

        let started = self
            .stack
            .inner()
            .engine
            .tcp_connect(handle, *addr.ip(), addr.port());
        if let Err(err) = started {
            self.core.borrow_mut().state = SocketState::New;
            return Err(err.into());
        }
        self.core.borrow_mut().peer = Some(addr);

        match self.wait(|core| core.state != SocketState::Connecting) {
            Ok(()) => {}
            Err(WaitError::WouldBlock) => return Err(Errno::EINPROGRESS.into()),
            Err(WaitError::TimedOut) => return Err(Errno::ETIMEDOUT.into()),
        }

        match self.state() {
            SocketState::Connected | SocketState::PeerClosed => Ok(()),
            SocketState::Failed(err) => Err(err.into()),
            SocketState::Closed => Err(Errno::EBADF.into()),
            _ => Err(Errno::ENOTCONN.into()),
        }
    }

    /// Handle of a stream with no latched error.
    fn stream_handle(&self) -> Result<Handle> {
        let handle = self.check_connected()?;
        match self.state() {
            SocketState::Failed(err) => Err(err.into()),
            _ => Ok(handle),
        }
    }

    fn sndbuf(&self, handle: Handle) -> usize {
        self.stack.inner().engine.tcp_sndbuf(handle)
    }

    /// One write of at most the free send space.
    ///
    /// With no free space, waits per the timeout until at least the
    /// minimum chunk is free. A stream still connecting waits the same way.
    /// A non-empty buffer never yields `Ok(0)`.
    pub(super) fn tcp_send(&self, data: &[u8]) -> Result<usize> {
        let mut handle = self.stream_handle()?;
        if matches!(self.state(), SocketState::New | SocketState::Listening) {
            return Err(Errno::ENOTCONN.into());
        }
        if data.is_empty() {
            return Ok(0);
        }

        let mut available = self.sndbuf(handle);
        if available == 0 {
            let min = self.stack.config().min_send_chunk.max(1);
            let stack = &self.stack;
            self.wait(|core| match core.handle {
                Some(h) if core.state == SocketState::Connecting || core.state.can_send() => {
                    stack.inner().engine.tcp_sndbuf(h) >= min
                }
                _ => true,
            })?;
            // the wait pumped; anything may have happened
            handle = self.stream_handle()?;
            let state = self.state();
            if state != SocketState::Connecting && !state.can_send() {
                return Err(Errno::ENOTCONN.into());
            }
            available = self.sndbuf(handle);
        }

        let len = available.min(data.len());
        if len == 0 {
            return Err(Errno::ENOTCONN.into());
        }
        self.stack.inner().engine.tcp_write(handle, &data[..len])?;
        Ok(len)
    }

    pub(super) fn tcp_recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.stream_handle()?;

        if !self.core.borrow().mailbox.has_data() {
            if matches!(self.state(), SocketState::New | SocketState::Listening) {
                return Err(Errno::ENOTCONN.into());
            }
            self.wait(|core| {
                core.mailbox.has_data()
                    || !matches!(core.state, SocketState::Connected | SocketState::Connecting)
            })?;

            let core = self.core.borrow();
            if !core.mailbox.has_data() {
                return match core.state {
                    SocketState::PeerClosed => Ok(0),
                    SocketState::Failed(err) => Err(err.into()),
                    SocketState::Closed => Err(Errno::EBADF.into()),
                    _ => Err(Errno::ENOTCONN.into()),
                };
            }
        }

        let (read, handle) = {
            let mut core = self.core.borrow_mut();
            (core.mailbox.read_stream(buf), core.handle)
        };
        let read = read.ok_or(SocketError::Os(Errno::EAGAIN))?;
        if let (Some(ack), Some(handle)) = (read.ack, handle) {
            self.stack.inner().engine.tcp_recved(handle, ack);
        }
        Ok(read.copied)
    }

    pub(super) fn tcp_sendall(&self, data: &[u8]) -> Result<()> {
        let handle = self.stream_handle()?;
        if self.timeout() == Timeout::NonBlocking && data.len() > self.sndbuf(handle) {
            return Err(Errno::EAGAIN.into());
        }
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.tcp_send(rest)?;
            if n == 0 {
                return Err(Errno::ENOTCONN.into());
            }
            rest = &rest[n..];
        }
        Ok(())
    }
}
