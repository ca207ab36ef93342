// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Wires configuration, watcher, governor and relay loop together.

use std::io::Write;

use crate::clock::MonotonicClock;
use crate::config::{GateConfig, RateSource};
use crate::control::{ControlSource, Watcher};
use crate::error::Result;
use crate::governor::Governor;
use crate::interval::Interval;
use crate::relay::{RelayReport, relay};
use crate::trigger::{RefreshRequest, Trigger};

/// Build the watcher for `rate` and the interval the governor starts with.
///
/// With a control file the valve starts closed and the first read is
/// requested right away instead of after one polling period.
pub fn build_watcher(config: &GateConfig) -> Result<(Watcher, Interval)> {
    match &config.rate {
        RateSource::Fixed(interval) => Ok((Watcher::fixed(), *interval)),
        RateSource::ControlFile(path) => {
            let source = ControlSource::open(path)?;
            let request = RefreshRequest::new(true);
            let trigger = Trigger::install(config.poll_period, &request)?;
            Ok((
                Watcher::new(source, request).with_trigger(trigger),
                Interval::Infinite,
            ))
        }
    }
}

/// Run the gate to completion, writing relayed bytes to `out`.
///
/// Returns the per-source failures; any error returned is fatal.
pub fn run<W: Write>(config: &GateConfig, out: &mut W) -> Result<RelayReport> {
    let (watcher, initial) = build_watcher(config)?;
    tracing::debug!(unit = ?config.unit, %initial, inputs = config.inputs.len(), "gate starting");

    let mut governor = Governor::new(initial, MonotonicClock, watcher);
    let report = relay(&config.inputs, config.unit, &mut governor, out)?;
    tracing::debug!(
        last_interval = %governor.interval(),
        failures = report.failures.len(),
        "gate finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{InputSource, PacingUnit};
    use serial_test::serial;
    use std::time::{Duration, Instant};

    #[test]
    fn test_open_gate_passes_files_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "ab\ncd\n").unwrap();

        for unit in [PacingUnit::Character, PacingUnit::Line] {
            let config = GateConfig::from_args(unit, "100%", &[input.to_str().unwrap()]);
            let mut out = Vec::new();
            let report = run(&config, &mut out).unwrap();
            assert!(report.is_success());
            assert_eq!(out, b"ab\ncd\n");
        }
    }

    #[test]
    fn test_line_mode_paces_second_line() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "first\nsecond\n").unwrap();

        let config = GateConfig::from_args(PacingUnit::Line, "100ms", &[input.to_str().unwrap()]);
        let started = Instant::now();
        let mut out = Vec::new();
        run(&config, &mut out).unwrap();

        assert_eq!(out, b"first\nsecond\n");
        assert!(started.elapsed() >= Duration::from_millis(95));
    }

    #[test]
    fn test_missing_control_file_is_fatal() {
        let config = GateConfig::from_args::<&str>(PacingUnit::Line, "/nonexistent/rate", &[]);
        let err = run(&config, &mut Vec::new()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "/nonexistent/rate: File not found");
    }

    #[test]
    #[serial]
    fn test_control_file_opens_valve() {
        let dir = tempfile::tempdir().unwrap();
        let rate = dir.path().join("rate");
        std::fs::write(&rate, "100%\n").unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "x\ny\n").unwrap();

        let config = GateConfig {
            unit: PacingUnit::Line,
            rate: RateSource::ControlFile(rate),
            inputs: vec![InputSource::Path(input)],
            poll_period: Duration::from_millis(20),
        };
        let mut out = Vec::new();
        let report = run(&config, &mut out).unwrap();
        assert!(report.is_success());
        assert_eq!(out, b"x\ny\n");
    }
}
