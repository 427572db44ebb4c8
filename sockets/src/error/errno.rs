//! POSIX error numbers surfaced by the socket facade.
//!
//! Numbering follows Linux, which is what the embedding runtime reports
//! through its `OSError` equivalent.

use core::fmt;

/// A POSIX-style error number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const EIO: Self = Self(5);
    pub const EBADF: Self = Self(9);
    pub const EAGAIN: Self = Self(11);
    pub const ENOMEM: Self = Self(12);
    pub const EINVAL: Self = Self(22);
    pub const EWOULDBLOCK: Self = Self::EAGAIN;
    pub const EOPNOTSUPP: Self = Self(95);
    pub const EADDRINUSE: Self = Self(98);
    pub const ECONNABORTED: Self = Self(103);
    pub const ECONNRESET: Self = Self(104);
    pub const ENOBUFS: Self = Self(105);
    pub const ENOTCONN: Self = Self(107);
    pub const ETIMEDOUT: Self = Self(110);
    pub const EHOSTUNREACH: Self = Self(113);
    pub const EALREADY: Self = Self(114);
    pub const EINPROGRESS: Self = Self(115);

    /// Low-level interface failures have no POSIX counterpart.
    pub const UNMAPPED: Self = Self(-1);

    /// Raw numeric value.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Symbolic name, if this is one of the numbers the facade produces.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::EIO => "EIO",
            Self::EBADF => "EBADF",
            Self::EAGAIN => "EAGAIN",
            Self::ENOMEM => "ENOMEM",
            Self::EINVAL => "EINVAL",
            Self::EOPNOTSUPP => "EOPNOTSUPP",
            Self::EADDRINUSE => "EADDRINUSE",
            Self::ECONNABORTED => "ECONNABORTED",
            Self::ECONNRESET => "ECONNRESET",
            Self::ENOBUFS => "ENOBUFS",
            Self::ENOTCONN => "ENOTCONN",
            Self::ETIMEDOUT => "ETIMEDOUT",
            Self::EHOSTUNREACH => "EHOSTUNREACH",
            Self::EALREADY => "EALREADY",
            Self::EINPROGRESS => "EINPROGRESS",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "[Errno {}] {}", self.0, name),
            None => write!(f, "[Errno {}]", self.0),
        }
    }
}
