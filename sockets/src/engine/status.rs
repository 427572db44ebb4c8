//! Engine status codes.
//!
//! The engine reports failures as small negative integers. The numeric
//! assignment of the connection-level codes moved between engine releases
//! (somewhere between 1.4.0 and 1.4.1), so the constants below follow the
//! layout selected with the `legacy-err-codes` feature.

use core::fmt;

/// Signed status code returned by an engine primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineError(pub i8);

impl EngineError {
    /// Out of memory.
    pub const MEM: Self = Self(-1);
    /// Buffer error; also "keep this and deliver it again later".
    pub const BUF: Self = Self(-2);
    pub const TIMEOUT: Self = Self(-3);
    /// Routing problem.
    pub const RTE: Self = Self(-4);
    pub const INPROGRESS: Self = Self(-5);
    /// Illegal value.
    pub const VAL: Self = Self(-6);
    pub const WOULDBLOCK: Self = Self(-7);

    #[cfg(feature = "legacy-err-codes")]
    pub const ABRT: Self = Self(-8);
    #[cfg(feature = "legacy-err-codes")]
    pub const RST: Self = Self(-9);
    #[cfg(feature = "legacy-err-codes")]
    pub const CLSD: Self = Self(-10);
    #[cfg(feature = "legacy-err-codes")]
    pub const CONN: Self = Self(-11);
    #[cfg(feature = "legacy-err-codes")]
    pub const ARG: Self = Self(-12);
    #[cfg(feature = "legacy-err-codes")]
    pub const USE: Self = Self(-13);
    #[cfg(feature = "legacy-err-codes")]
    pub const IF: Self = Self(-14);
    #[cfg(feature = "legacy-err-codes")]
    pub const ISCONN: Self = Self(-15);

    #[cfg(not(feature = "legacy-err-codes"))]
    pub const USE: Self = Self(-8);
    #[cfg(not(feature = "legacy-err-codes"))]
    pub const ISCONN: Self = Self(-9);
    #[cfg(not(feature = "legacy-err-codes"))]
    pub const ABRT: Self = Self(-10);
    #[cfg(not(feature = "legacy-err-codes"))]
    pub const RST: Self = Self(-11);
    #[cfg(not(feature = "legacy-err-codes"))]
    pub const CLSD: Self = Self(-12);
    #[cfg(not(feature = "legacy-err-codes"))]
    pub const CONN: Self = Self(-13);
    #[cfg(not(feature = "legacy-err-codes"))]
    pub const ARG: Self = Self(-14);
    #[cfg(not(feature = "legacy-err-codes"))]
    pub const IF: Self = Self(-15);

    /// Synthetic code for a socket whose handle has been released.
    pub const BADF: Self = Self(-16);

    /// Raw status value.
    pub const fn code(self) -> i8 {
        self.0
    }

    /// Non-negative, non-zero statuses are not failures in the engine's
    /// own convention; some ports return them from datagram sends.
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine status {}", self.0)
    }
}
