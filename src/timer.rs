use std::io;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;

use crate::error::SetupError;

/// Target frames per second across the whole panel.
const TARGET_FPS: u64 = 30;
/// Rows scanned per half-panel (the panel is driven top and bottom half
/// simultaneously, so a full refresh only needs to step through half the
/// rows).
const ROWS_PER_HALF: u64 = 16;
/// Bit-planes per binary-code-modulation cycle.
const PLANES_PER_CYCLE: u64 = 3;

/// Period of the interval timer: one full refresh visits every row and
/// every plane once, so the per-cell budget is the frame period divided
/// by the number of (row, plane) cells. Each tick bounds the illumination
/// duration of one such cell.
pub const PERIOD_NANOS: u64 =
    1_000_000_000 / (TARGET_FPS * ROWS_PER_HALF * PLANES_PER_CYCLE);

/// A kernel facility that pulses once per fixed period; waiting blocks
/// until at least one period has elapsed since the previous wait.
pub trait IntervalTimer {
    /// Blocks until the next interval tick, returning the number of
    /// elapsed intervals since the previous call. A return of more than
    /// one means the caller fell behind; the painter treats this as
    /// advisory and does not correct for overruns.
    fn wait(&mut self) -> u64;
}

/// `timerfd`-backed interval timer on `CLOCK_MONOTONIC`.
pub struct Timerfd {
    fd: RawFd,
}

impl Timerfd {
    /// Creates and arms a `CLOEXEC` monotonic interval timer with period
    /// [`PERIOD_NANOS`].
    pub fn new() -> Result<Self, SetupError> {
        // SAFETY: no preconditions beyond valid flag constants.
        let fd = unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC)
        };
        if fd < 0 {
            return Err(SetupError::TimerCreateFailed {
                errno: io::Error::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }

        let secs = (PERIOD_NANOS / 1_000_000_000) as i64;
        let nanos = (PERIOD_NANOS % 1_000_000_000) as i64;
        let interval = libc::timespec {
            tv_sec: secs,
            tv_nsec: nanos,
        };
        let spec = libc::itimerspec {
            it_interval: interval,
            it_value: interval,
        };

        // SAFETY: fd is a valid, just-created timerfd; spec is a fully
        // initialized itimerspec.
        let rc = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        if rc != 0 {
            let errno = io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            // SAFETY: fd was just opened by us.
            unsafe { libc::close(fd) };
            return Err(SetupError::TimerArmFailed { errno });
        }

        Ok(Self { fd })
    }
}

impl IntervalTimer for Timerfd {
    fn wait(&mut self) -> u64 {
        let mut buf = MaybeUninit::<u64>::uninit();
        // SAFETY: buf is 8 bytes, matching the expiration-counter read
        // contract of timerfd.
        let n = unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8)
        };
        if n == 8 {
            // SAFETY: a full 8-byte read initialized buf.
            unsafe { buf.assume_init() }
        } else {
            // Short or zero read off the timerfd: treated as zero ticks
            // elapsed, no retry.
            0
        }
    }
}

impl Drop for Timerfd {
    fn drop(&mut self) {
        if self.fd >= 0 {
            // SAFETY: fd was opened by this struct and is closed at most once.
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

/// Test double for [`IntervalTimer`]: returns immediately with a
/// caller-supplied tick count, so refresh-loop tests run without real
/// timing.
pub struct FakeTimer {
    ticks_per_wait: u64,
    pub wait_count: u64,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self {
            ticks_per_wait: 1,
            wait_count: 0,
        }
    }

    pub fn with_ticks_per_wait(ticks_per_wait: u64) -> Self {
        Self {
            ticks_per_wait,
            wait_count: 0,
        }
    }
}

impl Default for FakeTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalTimer for FakeTimer {
    fn wait(&mut self) -> u64 {
        self.wait_count += 1;
        self.ticks_per_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_timer_counts_waits() {
        let mut t = FakeTimer::new();
        assert_eq!(t.wait(), 1);
        assert_eq!(t.wait(), 1);
        assert_eq!(t.wait_count, 2);
    }

    #[test]
    fn period_matches_spec_derivation() {
        assert_eq!(PERIOD_NANOS, 1_000_000_000 / (30 * 16 * 3));
    }
}
