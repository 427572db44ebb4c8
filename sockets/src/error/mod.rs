//! Error types.
//!
//! Every facade failure is one [`SocketError`]. Engine failures and
//! socket-state violations surface as [`Errno`] values (the embedding
//! runtime raises them as its generic OS error), configuration problems
//! as [`ConfigError`], and name lookups keep the raw engine status.

pub mod errno;
pub mod translate;

use core::fmt;

use crate::engine::EngineError;

pub use errno::Errno;
pub use translate::errno_for;

/// Interface configuration failures, raised where they are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Address string is not a dotted-quad IPv4 address.
    InvalidAddress,
    /// Mask string is not a dotted-quad IPv4 address.
    InvalidMask,
    /// Gateway string is not a dotted-quad IPv4 address.
    InvalidGateway,
    /// The interface table is full.
    TooManyInterfaces,
    /// The configuration store offers no vif for the requested address.
    NoSuitableInterface,
    /// The engine refused to bring the interface up.
    InterfaceRejected(EngineError),
    /// No interface with this id.
    UnknownInterface,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => write!(f, "not a valid IP address"),
            Self::InvalidMask => write!(f, "not a valid mask"),
            Self::InvalidGateway => write!(f, "not a valid gateway"),
            Self::TooManyInterfaces => write!(f, "max num of Ether interfaces reached"),
            Self::NoSuitableInterface => write!(f, "could not find any suitable interface"),
            Self::InterfaceRejected(e) => write!(f, "interface rejected: {}", e),
            Self::UnknownInterface => write!(f, "unknown interface"),
        }
    }
}

/// Error returned by socket and module operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// Operating-system style error carrying an errno.
    Os(Errno),
    /// Interface configuration error.
    Config(ConfigError),
    /// Name resolution failed; carries the engine's negative status.
    Resolve(EngineError),
}

impl SocketError {
    /// Errno for `Os` errors.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Os(errno) => Some(*errno),
            _ => None,
        }
    }

    /// Whether this is the would-block failure of a non-blocking socket.
    pub fn is_would_block(&self) -> bool {
        *self == Self::Os(Errno::EAGAIN)
    }

    /// Whether a bounded wait ran out of time.
    pub fn is_timeout(&self) -> bool {
        *self == Self::Os(Errno::ETIMEDOUT)
    }
}

impl From<Errno> for SocketError {
    fn from(errno: Errno) -> Self {
        Self::Os(errno)
    }
}

impl From<ConfigError> for SocketError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<EngineError> for SocketError {
    fn from(err: EngineError) -> Self {
        Self::Os(errno_for(err))
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Os(errno) => write!(f, "OSError: {}", errno),
            Self::Config(e) => write!(f, "ValueError: {}", e),
            Self::Resolve(e) => write!(f, "OSError: {}", e.code()),
        }
    }
}

#[cfg(feature = "std")]
impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Os(errno) => std::io::Error::from_raw_os_error(errno.code()),
            other => std::io::Error::new(std::io::ErrorKind::Other, std::format!("{}", other)),
        }
    }
}

/// Result type for socket operations.
pub type Result<T> = core::result::Result<T, SocketError>;
