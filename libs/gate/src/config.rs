// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Startup configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::interval::Interval;
use crate::relay::{InputSource, PacingUnit};

/// How often a control file is re-read without an explicit trigger.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Where the pacing rate comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateSource {
    /// A literal given on the command line.
    Fixed(Interval),
    /// A file re-read while running.
    ControlFile(PathBuf),
}

impl RateSource {
    /// The argument is tried as a literal first; only if that fails is it a path.
    pub fn resolve(arg: &str) -> Self {
        match Interval::parse(arg) {
            Ok(interval) => RateSource::Fixed(interval),
            Err(err) => {
                tracing::debug!(%err, arg, "not a periodic time, treating as control file");
                RateSource::ControlFile(PathBuf::from(arg))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub unit: PacingUnit,
    pub rate: RateSource,
    pub inputs: Vec<InputSource>,
    pub poll_period: Duration,
}

impl GateConfig {
    /// Build a configuration from command-line values. No inputs means stdin.
    pub fn from_args<S: AsRef<str>>(unit: PacingUnit, rate: &str, inputs: &[S]) -> Self {
        let mut inputs: Vec<InputSource> = inputs
            .iter()
            .map(|arg| InputSource::from_arg(arg.as_ref()))
            .collect();
        if inputs.is_empty() {
            inputs.push(InputSource::Stdin);
        }

        Self {
            unit,
            rate: RateSource::resolve(rate),
            inputs,
            poll_period: DEFAULT_POLL_PERIOD,
        }
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }
}
