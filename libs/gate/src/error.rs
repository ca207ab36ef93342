// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::interval::IntervalError;

/// Why a control path was rejected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFileProblem {
    Unreadable,
    NotFound,
    Invalid,
    ImproperType,
    OpenFailed,
}

impl fmt::Display for ControlFileProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ControlFileProblem::Unreadable => "Unreadable",
            ControlFileProblem::NotFound => "File not found",
            ControlFileProblem::Invalid => "Invalid file",
            ControlFileProblem::ImproperType => "Improper file type",
            ControlFileProblem::OpenFailed => "Open error",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("{name}: File open error")]
    SourceOpen {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name}: Read error")]
    SourceRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {problem}", path.display())]
    ControlFile {
        path: PathBuf,
        problem: ControlFileProblem,
    },

    #[error("FATAL: monotonic clock failure: {0}")]
    Clock(std::io::Error),

    #[error("FATAL: interval timer failure: {0}")]
    Timer(std::io::Error),

    #[error("FATAL: signal handler registration failed: {0}")]
    Signal(std::io::Error),

    #[error("FATAL: signal mask update failed: {0}")]
    SignalMask(std::io::Error),

    #[error("Cannot write to STDOUT: {0}")]
    Write(std::io::Error),
}

impl GateError {
    /// Per-source failures are reported and skipped; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            GateError::SourceOpen { .. } | GateError::SourceRead { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GateError>;

/// Failure of a single live reconfiguration attempt.
///
/// Never leaves the watcher: the previous interval simply stays in effect.
#[derive(Error, Debug)]
pub enum ReconfigureError {
    #[error("control read failed: {0}")]
    Read(std::io::Error),

    #[error("control file is empty")]
    Empty,

    #[error("control line exceeds the control buffer")]
    Overflow,

    #[error("control line rejected: {0}")]
    Parse(#[from] IntervalError),
}
