// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Monotonic time source for the governor
//!
//! Timestamps are offsets from the clock's own origin, so they only compare
//! against timestamps from the same clock.

use std::io;
use std::time::Duration;

use crate::error::{GateError, Result};

/// How a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The full duration passed.
    Elapsed,
    /// A signal cut the sleep short.
    Interrupted,
}

pub trait Clock {
    /// Current monotonic time.
    fn now(&self) -> Result<Duration>;

    /// Sleep for `duration`, returning early with [`Wake::Interrupted`] when a
    /// signal arrives. Must not retry on its own.
    fn sleep(&self, duration: Duration) -> Result<Wake>;
}

impl<T: Clock> Clock for &T {
    fn now(&self) -> Result<Duration> {
        (*self).now()
    }

    fn sleep(&self, duration: Duration) -> Result<Wake> {
        (*self).sleep(duration)
    }
}

/// `CLOCK_MONOTONIC` with `nanosleep(2)`.
///
/// `std::thread::sleep` resumes after `EINTR`, which would hide reconfiguration
/// signals from the governor; `nanosleep` is never restarted, even under
/// `SA_RESTART`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Result<Duration> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            return Err(GateError::Clock(io::Error::last_os_error()));
        }
        Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
    }

    fn sleep(&self, duration: Duration) -> Result<Wake> {
        let request = libc::timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as _,
        };
        // SAFETY: `request` is a valid timespec; the remainder pointer may be null.
        let rc = unsafe { libc::nanosleep(&request, std::ptr::null_mut()) };
        if rc == 0 {
            return Ok(Wake::Elapsed);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            Ok(Wake::Interrupted)
        } else {
            Err(GateError::Clock(err))
        }
    }
}
