//! Engine status to errno translation.
//!
//! Fixed tables indexed by `-status`. The table layout is chosen at build
//! time because the engine renumbered its connection-level codes.

use super::errno::Errno;
use crate::engine::EngineError;

#[cfg(feature = "legacy-err-codes")]
const ERROR_LOOKUP_TABLE: [Errno; 17] = [
    Errno(0),             // OK
    Errno::ENOMEM,        // MEM         -1
    Errno::ENOBUFS,       // BUF         -2
    Errno::EWOULDBLOCK,   // TIMEOUT     -3
    Errno::EHOSTUNREACH,  // RTE         -4
    Errno::EINPROGRESS,   // INPROGRESS  -5
    Errno::EINVAL,        // VAL         -6
    Errno::EWOULDBLOCK,   // WOULDBLOCK  -7
    Errno::ECONNABORTED,  // ABRT        -8
    Errno::ECONNRESET,    // RST         -9
    Errno::ENOTCONN,      // CLSD        -10
    Errno::ENOTCONN,      // CONN        -11
    Errno::EIO,           // ARG         -12
    Errno::EADDRINUSE,    // USE         -13
    Errno::UNMAPPED,      // IF          -14
    Errno::EALREADY,      // ISCONN      -15
    Errno::EBADF,         // BADF        -16
];

#[cfg(not(feature = "legacy-err-codes"))]
const ERROR_LOOKUP_TABLE: [Errno; 17] = [
    Errno(0),             // OK
    Errno::ENOMEM,        // MEM         -1
    Errno::ENOBUFS,       // BUF         -2
    Errno::EWOULDBLOCK,   // TIMEOUT     -3
    Errno::EHOSTUNREACH,  // RTE         -4
    Errno::EINPROGRESS,   // INPROGRESS  -5
    Errno::EINVAL,        // VAL         -6
    Errno::EWOULDBLOCK,   // WOULDBLOCK  -7
    Errno::EADDRINUSE,    // USE         -8
    Errno::EALREADY,      // ISCONN      -9
    Errno::ECONNABORTED,  // ABRT        -10
    Errno::ECONNRESET,    // RST         -11
    Errno::ENOTCONN,      // CLSD        -12
    Errno::ENOTCONN,      // CONN        -13
    Errno::EIO,           // ARG         -14
    Errno::UNMAPPED,      // IF          -15
    Errno::EBADF,         // BADF        -16
];

/// Translate an engine status into an errno.
///
/// Statuses outside `-16..=0` have no table entry and map to `EIO`.
pub fn errno_for(err: EngineError) -> Errno {
    usize::try_from(-i32::from(err.code()))
        .ok()
        .and_then(|index| ERROR_LOOKUP_TABLE.get(index).copied())
        .unwrap_or(Errno::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_prefix_is_layout_independent() {
        assert_eq!(errno_for(EngineError::MEM), Errno::ENOMEM);
        assert_eq!(errno_for(EngineError::BUF), Errno::ENOBUFS);
        assert_eq!(errno_for(EngineError::RTE), Errno::EHOSTUNREACH);
        assert_eq!(errno_for(EngineError::WOULDBLOCK), Errno::EAGAIN);
        assert_eq!(errno_for(EngineError::BADF), Errno::EBADF);
    }

    #[test]
    fn test_named_codes_follow_selected_layout() {
        assert_eq!(errno_for(EngineError::USE), Errno::EADDRINUSE);
        assert_eq!(errno_for(EngineError::ISCONN), Errno::EALREADY);
        assert_eq!(errno_for(EngineError::ABRT), Errno::ECONNABORTED);
        assert_eq!(errno_for(EngineError::RST), Errno::ECONNRESET);
        assert_eq!(errno_for(EngineError::CLSD), Errno::ENOTCONN);
        assert_eq!(errno_for(EngineError::CONN), Errno::ENOTCONN);
        assert_eq!(errno_for(EngineError::ARG), Errno::EIO);
        assert_eq!(errno_for(EngineError::IF), Errno::UNMAPPED);
    }

    #[cfg(not(feature = "legacy-err-codes"))]
    #[test]
    fn test_current_layout_raw_codes() {
        assert_eq!(errno_for(EngineError(-8)), Errno::EADDRINUSE);
        assert_eq!(errno_for(EngineError(-11)), Errno::ECONNRESET);
    }

    #[cfg(feature = "legacy-err-codes")]
    #[test]
    fn test_legacy_layout_raw_codes() {
        assert_eq!(errno_for(EngineError(-8)), Errno::ECONNABORTED);
        assert_eq!(errno_for(EngineError(-13)), Errno::EADDRINUSE);
    }

    #[test]
    fn test_unknown_status_is_eio() {
        assert_eq!(errno_for(EngineError(-17)), Errno::EIO);
        assert_eq!(errno_for(EngineError(i8::MIN)), Errno::EIO);
        assert_eq!(errno_for(EngineError(3)), Errno::EIO);
    }
}
