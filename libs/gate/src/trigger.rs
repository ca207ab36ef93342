// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Reconfiguration trigger
//!
//! A recurring `ITIMER_REAL` timer raises `SIGALRM`; a user may raise the same
//! signal by hand (`kill -ALRM <pid>`) for an immediate refresh. Either way the
//! handler only sets an atomic flag. The control file is read later, on the
//! relay thread, by whoever consumes the flag.
//!
//! # Safety
//! The handler is installed through `signal_hook::flag`, which stores into an
//! `AtomicBool` and does nothing else, so it is async-signal-safe.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use signal_hook::SigId;

use crate::error::{GateError, Result};

/// Signal raised by the polling timer and accepted as the manual trigger.
pub const TRIGGER_SIGNAL: libc::c_int = libc::SIGALRM;

/// Shared "refresh requested" flag.
#[derive(Debug, Clone, Default)]
pub struct RefreshRequest(Arc<AtomicBool>);

impl RefreshRequest {
    pub fn new(initially_pending: bool) -> Self {
        Self(Arc::new(AtomicBool::new(initially_pending)))
    }

    #[cfg(test)]
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, reporting whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Installed signal handler plus the armed polling timer.
///
/// Dropping it disarms the timer and removes the handler action.
pub struct Trigger {
    sig_id: SigId,
}

impl Trigger {
    pub fn install(period: Duration, request: &RefreshRequest) -> Result<Self> {
        let sig_id = signal_hook::flag::register(TRIGGER_SIGNAL, Arc::clone(&request.0))
            .map_err(GateError::Signal)?;

        if let Err(err) = set_interval_timer(period) {
            signal_hook::low_level::unregister(sig_id);
            return Err(GateError::Timer(err));
        }

        tracing::debug!(?period, "control polling timer armed");
        Ok(Self { sig_id })
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        if let Err(err) = set_interval_timer(Duration::ZERO) {
            tracing::warn!(%err, "failed to disarm control polling timer");
        }
        signal_hook::low_level::unregister(self.sig_id);
    }
}

fn to_timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}

/// Arm (or, with a zero period, disarm) the process-wide real-time timer.
fn set_interval_timer(period: Duration) -> io::Result<()> {
    let value = libc::itimerval {
        it_interval: to_timeval(period),
        it_value: to_timeval(period),
    };
    // SAFETY: `value` is a valid itimerval; the old-value pointer may be null.
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &value, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Blocks one signal on the calling thread until restored.
///
/// Keeps a second tick from interrupting a refresh that is already running.
pub struct SignalMask {
    previous: libc::sigset_t,
    active: bool,
}

impl SignalMask {
    pub fn block(signal: libc::c_int) -> Result<Self> {
        // SAFETY: both sets are plain data initialised by sigemptyset before use.
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            let mut previous: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, signal);
            let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous);
            if rc != 0 {
                return Err(GateError::SignalMask(io::Error::from_raw_os_error(rc)));
            }
            Ok(Self {
                previous,
                active: true,
            })
        }
    }

    pub fn restore(mut self) -> Result<()> {
        self.active = false;
        apply_mask(&self.previous).map_err(GateError::SignalMask)
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        if self.active {
            let _ = apply_mask(&self.previous);
        }
    }
}

fn apply_mask(mask: &libc::sigset_t) -> io::Result<()> {
    // SAFETY: `mask` was filled in by a previous pthread_sigmask call.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, mask, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}
