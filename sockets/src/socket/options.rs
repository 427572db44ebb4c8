//! Socket options.

use alloc::rc::Rc;
use core::fmt;

use log::warn;

use crate::error::{Errno, Result};
use crate::{SO_EVENT_CALLBACK, SO_REUSEADDR};

use super::{EventCallback, Socket};

/// Value passed to [`Socket::setsockopt`].
#[derive(Clone)]
pub enum SockOptValue {
    Int(i32),
    /// Event callback; `None` clears it.
    Callback(Option<EventCallback>),
}

impl fmt::Debug for SockOptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::Callback(cb) => f.debug_tuple("Callback").field(&cb.is_some()).finish(),
        }
    }
}

impl From<i32> for SockOptValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl Socket {
    /// Set a socket option. The level is not inspected; unknown options
    /// are logged and ignored.
    pub fn setsockopt(&self, _level: i32, option: i32, value: SockOptValue) -> Result<()> {
        match (option, value) {
            (SO_EVENT_CALLBACK, SockOptValue::Callback(callback)) => {
                self.core.borrow_mut().callback = callback;
                Ok(())
            }
            (SO_REUSEADDR, SockOptValue::Int(v)) => {
                self.set_reuse_addr(v != 0)?;
                Ok(())
            }
            (SO_EVENT_CALLBACK | SO_REUSEADDR, _) => Err(Errno::EINVAL.into()),
            (option, _) => {
                warn!("setsockopt: option {} not implemented", option);
                Ok(())
            }
        }
    }

    /// Run `callback` after every pump that delivers data or a connection
    /// to this socket. The callback may call back into the socket.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn() + 'static,
    {
        self.core.borrow_mut().callback = Some(Rc::new(callback));
    }

    pub fn clear_callback(&self) {
        self.core.borrow_mut().callback = None;
    }

    /// Allow binding an address still held by a closing connection.
    pub fn set_reuse_addr(&self, enable: bool) -> Result<()> {
        let handle = self.live_handle()?;
        self.stack.inner().engine.set_reuse_addr(handle, enable);
        Ok(())
    }
}
