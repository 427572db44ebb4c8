//! Cooperative poll loop.
//!
//! Every blocking socket operation is "pump the engine, then re-check a
//! condition". Events only arrive during a pump, so the condition is always
//! evaluated after pumping and never carried over from before the wait.
//!
//! | Timeout         | Strategy                                        |
//! |-----------------|-------------------------------------------------|
//! | `NonBlocking`   | one check, no pump, would-block on failure      |
//! | `Millis(n)`     | sleep in `poll_step_ms` increments, pump, check |
//! | `Blocking`      | pump until the condition holds                  |

use crate::error::{Errno, SocketError};
use crate::socket::Timeout;

/// Scheduler and clock services of the host.
pub trait Host {
    /// Monotonic milliseconds.
    fn now_ms(&self) -> u64;

    /// Yield the CPU for `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u32);
}

/// Something a wait loop can advance.
pub trait Pump {
    /// Drive the engine once, delivering any pending events.
    fn pump(&self);

    /// Sleep through the host.
    fn sleep_ms(&self, ms: u32);

    /// Increment of bounded waits.
    fn step_ms(&self) -> u32;
}

/// Why a wait ended without its condition holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Non-blocking socket and the condition was false.
    WouldBlock,
    /// The bounded budget ran out.
    TimedOut,
}

impl From<WaitError> for SocketError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::WouldBlock => SocketError::Os(Errno::EAGAIN),
            WaitError::TimedOut => SocketError::Os(Errno::ETIMEDOUT),
        }
    }
}

/// Wait until `ready` returns true, per the timeout policy.
///
/// `ready` must not hold borrows that a pump needs; it is called between
/// pumps, never during one.
pub fn wait_until<P, F>(pump: &P, timeout: Timeout, mut ready: F) -> Result<(), WaitError>
where
    P: Pump + ?Sized,
    F: FnMut() -> bool,
{
    match timeout {
        Timeout::NonBlocking => {
            if ready() {
                Ok(())
            } else {
                Err(WaitError::WouldBlock)
            }
        }
        Timeout::Millis(budget) => {
            let step = pump.step_ms().max(1);
            let mut remaining = budget;
            loop {
                if ready() {
                    return Ok(());
                }
                if remaining == 0 {
                    return Err(WaitError::TimedOut);
                }
                let slice = step.min(remaining);
                pump.sleep_ms(slice);
                remaining -= slice;
                pump.pump();
            }
        }
        Timeout::Blocking => {
            while !ready() {
                pump.pump();
            }
            Ok(())
        }
    }
}

/// Wall-clock host for hosted builds.
#[cfg(feature = "std")]
pub struct StdHost {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdHost {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Host for StdHost {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn sleep_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Counting {
        pumps: Cell<u32>,
        slept: Cell<u32>,
        step: u32,
        ready_after: u32,
    }

    impl Counting {
        fn new(step: u32, ready_after: u32) -> Self {
            Self {
                pumps: Cell::new(0),
                slept: Cell::new(0),
                step,
                ready_after,
            }
        }

        fn ready(&self) -> bool {
            self.pumps.get() >= self.ready_after
        }
    }

    impl Pump for Counting {
        fn pump(&self) {
            self.pumps.set(self.pumps.get() + 1);
        }
        fn sleep_ms(&self, ms: u32) {
            self.slept.set(self.slept.get() + ms);
        }
        fn step_ms(&self) -> u32 {
            self.step
        }
    }

    #[test]
    fn test_non_blocking_never_pumps() {
        let p = Counting::new(100, 1);
        assert_eq!(wait_until(&p, Timeout::NonBlocking, || p.ready()), Err(WaitError::WouldBlock));
        assert_eq!(p.pumps.get(), 0);
        assert_eq!(p.slept.get(), 0);
    }

    #[test]
    fn test_bounded_times_out_after_budget() {
        let p = Counting::new(100, u32::MAX);
        assert_eq!(wait_until(&p, Timeout::Millis(200), || p.ready()), Err(WaitError::TimedOut));
        assert_eq!(p.slept.get(), 200);
        assert_eq!(p.pumps.get(), 2);
    }

    #[test]
    fn test_bounded_last_slice_is_shortened() {
        let p = Counting::new(100, u32::MAX);
        let _ = wait_until(&p, Timeout::Millis(250), || p.ready());
        assert_eq!(p.slept.get(), 250);
        assert_eq!(p.pumps.get(), 3);
    }

    #[test]
    fn test_bounded_rechecks_after_pump() {
        let p = Counting::new(100, 1);
        assert_eq!(wait_until(&p, Timeout::Millis(1000), || p.ready()), Ok(()));
        assert_eq!(p.slept.get(), 100);
    }

    #[test]
    fn test_blocking_pumps_without_sleeping() {
        let p = Counting::new(100, 5);
        assert_eq!(wait_until(&p, Timeout::Blocking, || p.ready()), Ok(()));
        assert_eq!(p.pumps.get(), 5);
        assert_eq!(p.slept.get(), 0);
    }

    #[test]
    fn test_wait_errors_map_to_errno() {
        assert_eq!(SocketError::from(WaitError::WouldBlock), SocketError::Os(Errno::EAGAIN));
        assert_eq!(SocketError::from(WaitError::TimedOut), SocketError::Os(Errno::ETIMEDOUT));
    }
}
