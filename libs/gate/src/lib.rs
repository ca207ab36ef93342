// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Gate: stream pacing for UNIX pipes
//!
//! Forwards bytes from input sources to an output while enforcing a minimum
//! time between successive blocks (characters or lines). The rate can be a
//! fixed literal or come from a control file that is re-read while running.
//!
//! ## Components
//!
//! - [`interval`]: periodic-time literal grammar (`100ms`, `9600bps`, `0%`, ...)
//! - [`governor`]: drift-free scheduler deciding when the next block may leave
//! - [`control`]: control-file watcher publishing live rate changes
//! - [`trigger`]: polling timer and manual signal that request refreshes
//! - [`relay`]: the copy loop over all input sources
//!
//! Everything runs on one thread. Signal handlers only raise a flag; control
//! files are read by the governor between scheduling decisions.

pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod governor;
pub mod interval;
pub mod relay;
pub mod runtime;
pub mod trigger;

pub use clock::{Clock, MonotonicClock, Wake};
pub use config::{DEFAULT_POLL_PERIOD, GateConfig, RateSource};
pub use control::{ControlSource, Watcher};
pub use error::{ControlFileProblem, GateError, ReconfigureError, Result};
pub use governor::{Governor, Pace, Reconfigure};
pub use interval::{Interval, IntervalError, IntervalSlot};
pub use relay::{InputSource, PacingUnit, RelayReport, relay};
pub use runtime::run;
pub use trigger::{RefreshRequest, Trigger};
