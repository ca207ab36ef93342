// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Gate CLI
//!
//! Pipe filter that throttles its output to a given rate.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gate::{GateConfig, Interval, PacingUnit};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
USAGE   : gate [-c|-l] periodictime [file ...]
          gate [-c|-l] controlfile [file ...]
Args    : periodictime  Periodic time from start sending the current
                        block (a character or a line) to start sending
                        the next block. The default unit is millisecond.
                        Available units are 's', 'ms', 'us', 'ns'.
                        The rate may also be given as
                         - speed  : 'bps' (1 character = 8 bits)
                                    'cps' (1 character = 10 bits)
                         - output : '0%'   (valve fully closed)
                                    '100%' (valve fully open)
                        The maximum value is 2147483647 for all units.
          controlfile   File holding the periodic time, in the same
                        format as the argument. Overwrite it to change
                        the rate while running; it is re-read every
                        0.1 seconds. Send SIGALRM to re-read it at once.
                        Must be a regular file, character device or FIFO;
                        devices and FIFOs need newline-terminated input.
          file          File to send (\"-\" means stdin)
Options : -c            Pace by character (default). The periodic time
                        separates the starts of consecutive characters.
          -l            Pace by line. The periodic time separates the
                        first characters of consecutive lines.
Env     : GATE_LOG (or RUST_LOG) sets the diagnostic filter, e.g. GATE_LOG=debug
          GATE_POLL_PERIOD replaces the 0.1 second control re-read period,
                        e.g. GATE_POLL_PERIOD=1s
";

/// Startup override for the control polling period, in periodic-time syntax.
const POLL_PERIOD_ENV: &str = "GATE_POLL_PERIOD";

#[derive(Parser)]
#[command(name = "gate", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Pace by character (default)
    #[arg(short = 'c', overrides_with = "line")]
    character: bool,

    /// Pace by line
    #[arg(short = 'l', overrides_with = "character")]
    line: bool,

    /// Print usage
    #[arg(short = 'h')]
    help: bool,

    /// Print usage
    #[arg(short = 'v')]
    version: bool,

    /// Periodic time literal or control file
    #[arg(value_name = "PERIODICTIME|CONTROLFILE")]
    rate: Option<String>,

    /// Input files ("-" means stdin)
    #[arg(value_name = "FILE")]
    files: Vec<String>,
}

impl Cli {
    fn unit(&self) -> PacingUnit {
        if self.line {
            PacingUnit::Line
        } else {
            PacingUnit::Character
        }
    }
}

fn print_usage() -> ExitCode {
    eprint!("{USAGE}");
    ExitCode::FAILURE
}

/// Diagnostics go to stderr; stdout carries the relayed stream.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("GATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn poll_period_override() -> Option<Duration> {
    let raw = std::env::var(POLL_PERIOD_ENV).ok()?;
    match Interval::parse(&raw).map(|interval| interval.as_duration()) {
        Ok(Some(period)) if !period.is_zero() => Some(period),
        _ => {
            tracing::warn!(value = %raw, "ignoring {POLL_PERIOD_ENV}: needs a non-zero periodic time");
            None
        }
    }
}

fn run(config: &GateConfig) -> Result<bool> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let report = gate::run(config, &mut out)?;
    out.flush().context("Cannot write to STDOUT")?;
    for failure in &report.failures {
        eprintln!("gate: {failure}");
    }
    Ok(report.is_success())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if let Some(reason) = err.kind().as_str() {
                eprintln!("gate: {reason}");
            }
            return print_usage();
        }
    };

    if cli.help || cli.version {
        return print_usage();
    }
    let Some(rate) = cli.rate.as_deref() else {
        return print_usage();
    };

    init_tracing();

    let mut config = GateConfig::from_args(cli.unit(), rate, &cli.files);
    if let Some(period) = poll_period_override() {
        config = config.with_poll_period(period);
    }
    tracing::debug!(?config, "configuration resolved");
    match run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("gate: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_flags_last_wins() {
        let cli = Cli::try_parse_from(["gate", "-c", "-l", "1s"]).unwrap();
        assert_eq!(cli.unit(), PacingUnit::Line);

        let cli = Cli::try_parse_from(["gate", "-l", "-c", "1s"]).unwrap();
        assert_eq!(cli.unit(), PacingUnit::Character);

        let cli = Cli::try_parse_from(["gate", "1s"]).unwrap();
        assert_eq!(cli.unit(), PacingUnit::Character);
    }

    #[test]
    fn test_bundled_flags_and_stdin_marker() {
        let cli = Cli::try_parse_from(["gate", "-cl", "100ms", "a.txt", "-", "b.txt"]).unwrap();
        assert_eq!(cli.unit(), PacingUnit::Line);
        assert_eq!(cli.rate.as_deref(), Some("100ms"));
        assert_eq!(cli.files, vec!["a.txt", "-", "b.txt"]);
    }

    #[test]
    fn test_help_flag_is_ours() {
        let cli = Cli::try_parse_from(["gate", "-h"]).unwrap();
        assert!(cli.help);
        assert!(cli.rate.is_none());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["gate", "-x", "1s"]).is_err());
    }
}
