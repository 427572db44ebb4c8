//! Socket lifecycle state and timeout mode.
//!
//! ```text
//! New → Connecting → Connected → PeerClosed | Failed(err)
//! New → Listening
//! any → Closed
//! ```
//! Once `PeerClosed` or `Failed` is observed the state only moves on to
//! `Failed` or `Closed`; nothing resurrects a socket.

use core::fmt;
use core::time::Duration;

use crate::engine::EngineError;
use crate::error::{errno_for, Errno};

/// Lifecycle state of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    New,
    Connecting,
    Connected,
    /// Orderly close from the remote side; buffered data is still readable.
    PeerClosed,
    Listening,
    /// Released by `close`.
    Closed,
    /// Engine error latched by the error callback.
    Failed(EngineError),
}

impl SocketState {
    /// Numeric form used in diagnostics: lifecycle states are
    /// non-negative, closed and failed sockets carry the engine status.
    pub fn code(self) -> i32 {
        match self {
            Self::New => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::PeerClosed => 3,
            Self::Listening => 4,
            Self::Closed => i32::from(EngineError::BADF.code()),
            Self::Failed(err) => i32::from(err.code()),
        }
    }

    /// Errno of a latched error, if any.
    pub fn latched_errno(self) -> Option<Errno> {
        match self {
            Self::Failed(err) => Some(errno_for(err)),
            Self::Closed => Some(Errno::EBADF),
            _ => None,
        }
    }

    /// Whether the state is one a later event may not leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    /// Connected, or half-closed by the peer with our side still open.
    pub fn can_send(self) -> bool {
        matches!(self, Self::Connected | Self::PeerClosed)
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::PeerClosed => write!(f, "PEER_CLOSED"),
            Self::Listening => write!(f, "LISTENING"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Failed(err) => write!(f, "ERROR({})", err.code()),
        }
    }
}

/// How long blocking operations wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the condition holds.
    Blocking,
    /// Fail at once with a would-block error.
    NonBlocking,
    /// Wait at most this many milliseconds.
    Millis(u32),
}

impl Timeout {
    /// Build from the runtime convention: `-1` forever, `0` non-blocking.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Self::Blocking,
            0 => Self::NonBlocking,
            ms => Self::Millis(u32::try_from(ms).unwrap_or(u32::MAX)),
        }
    }

    /// `None` blocks forever; a zero duration is non-blocking.
    pub fn from_duration(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Self::Blocking,
            Some(d) => Self::from_millis(i64::try_from(d.as_millis()).unwrap_or(i64::MAX)),
        }
    }

    /// Inverse of [`Timeout::from_millis`].
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Blocking => -1,
            Self::NonBlocking => 0,
            Self::Millis(ms) => i64::from(ms),
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::Blocking
    }
}
