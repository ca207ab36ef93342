// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Relay loop
//!
//! Copies every input source, in order, to the output while asking a
//! [`Pace`] implementation for permission before each block.
//!
//! In line mode the pace covers "first byte of line N to first byte of line
//! N+1": once a line is admitted it is written in full, terminator included.
//! After each terminator one byte is peeked to learn whether the source has
//! more data; that byte opens the next line.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{GateError, Result};
use crate::governor::Pace;

/// What one paced block is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacingUnit {
    #[default]
    Character,
    Line,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    Path(PathBuf),
}

impl InputSource {
    /// `-` names standard input; anything else is a path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            InputSource::Stdin
        } else {
            InputSource::Path(PathBuf::from(arg))
        }
    }

    pub fn name(&self) -> String {
        match self {
            InputSource::Stdin => "stdin".to_string(),
            InputSource::Path(path) => path.display().to_string(),
        }
    }
}

/// Sources that could not be relayed completely.
#[derive(Debug, Default)]
pub struct RelayReport {
    pub failures: Vec<GateError>,
}

impl RelayReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Relay every source in `inputs` to `out`.
///
/// Open and read failures are collected in the report and the loop moves on.
/// Pacing and write failures abort the run.
pub fn relay<P: Pace, W: Write>(
    inputs: &[InputSource],
    unit: PacingUnit,
    pacer: &mut P,
    out: &mut W,
) -> Result<RelayReport> {
    let mut report = RelayReport::default();

    for input in inputs {
        let name = input.name();
        let outcome = match input {
            InputSource::Stdin => {
                let stdin = io::stdin();
                let mut reader = stdin.lock();
                relay_source(&name, &mut reader, unit, pacer, out)
            }
            InputSource::Path(path) => match open_retrying(path) {
                Ok(file) => {
                    let mut reader = BufReader::new(file);
                    relay_source(&name, &mut reader, unit, pacer, out)
                }
                Err(source) => Err(GateError::SourceOpen {
                    name: name.clone(),
                    source,
                }),
            },
        };

        match outcome {
            Ok(()) => tracing::trace!(source = %name, "source drained"),
            Err(err) if !err.is_fatal() => {
                tracing::warn!(source = %name, %err, "source skipped");
                report.failures.push(err);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(report)
}

/// Relay a single, already opened source.
pub fn relay_source<R: BufRead, P: Pace, W: Write>(
    name: &str,
    reader: &mut R,
    unit: PacingUnit,
    pacer: &mut P,
    out: &mut W,
) -> Result<()> {
    let read_failed = |source| GateError::SourceRead {
        name: name.to_string(),
        source,
    };

    match unit {
        PacingUnit::Character => {
            while let Some(byte) = next_byte(reader).map_err(read_failed)? {
                pacer.wait_for_next_block()?;
                emit(out, &[byte])?;
                flush(out)?;
            }
        }
        PacingUnit::Line => {
            let mut first = next_byte(reader).map_err(read_failed)?;
            while let Some(byte) = first {
                pacer.wait_for_next_block()?;
                first = copy_line(byte, reader, out).map_err(|err| match err {
                    LineError::Read(source) => read_failed(source),
                    LineError::Gate(err) => err,
                })?;
            }
        }
    }

    Ok(())
}

enum LineError {
    Read(io::Error),
    Gate(GateError),
}

impl From<GateError> for LineError {
    fn from(err: GateError) -> Self {
        LineError::Gate(err)
    }
}

/// Write the line that starts with `first`, then peek at the next byte.
fn copy_line<R: BufRead, W: Write>(
    first: u8,
    reader: &mut R,
    out: &mut W,
) -> std::result::Result<Option<u8>, LineError> {
    emit(out, &[first])?;

    if first != b'\n' {
        loop {
            let buf = fill(reader).map_err(LineError::Read)?;
            if buf.is_empty() {
                flush(out)?;
                return Ok(None);
            }
            let (taken, finished) = match buf.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (buf.len(), false),
            };
            emit(out, &buf[..taken])?;
            reader.consume(taken);
            if finished {
                break;
            }
        }
    }

    flush(out)?;
    next_byte(reader).map_err(LineError::Read)
}

const EOF: &[u8] = &[];

/// `fill_buf` that retries interrupted reads.
fn fill<R: BufRead>(reader: &mut R) -> io::Result<&[u8]> {
    loop {
        match reader.fill_buf() {
            Ok(buf) if buf.is_empty() => return Ok(EOF),
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    reader.fill_buf()
}

fn next_byte<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    let byte = fill(reader)?.first().copied();
    if byte.is_some() {
        reader.consume(1);
    }
    Ok(byte)
}

fn emit<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    out.write_all(bytes).map_err(GateError::Write)
}

fn flush<W: Write>(out: &mut W) -> Result<()> {
    out.flush().map_err(GateError::Write)
}

fn open_retrying(path: &Path) -> io::Result<File> {
    loop {
        match File::open(path) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Counts waits.
    #[derive(Default)]
    struct Recorder {
        waits: usize,
    }

    impl Pace for Recorder {
        fn wait_for_next_block(&mut self) -> Result<()> {
            self.waits += 1;
            Ok(())
        }
    }

    /// Writer that remembers where each flush happened.
    #[derive(Default)]
    struct FlushLog {
        data: Vec<u8>,
        flushes: Vec<usize>,
    }

    impl Write for FlushLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes.push(self.data.len());
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(input: &[u8], unit: PacingUnit) -> (FlushLog, usize) {
        let mut reader = Cursor::new(input.to_vec());
        let mut pacer = Recorder::default();
        let mut out = FlushLog::default();
        relay_source("test", &mut reader, unit, &mut pacer, &mut out).unwrap();
        (out, pacer.waits)
    }

    #[test]
    fn test_character_mode_waits_per_byte() {
        let (out, waits) = run(b"ab\ncd\n", PacingUnit::Character);
        assert_eq!(out.data, b"ab\ncd\n");
        assert_eq!(waits, 6);
        assert_eq!(out.flushes, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_line_mode_waits_per_line() {
        let (out, waits) = run(b"ab\ncd\n", PacingUnit::Line);
        assert_eq!(out.data, b"ab\ncd\n");
        assert_eq!(waits, 2);
        assert_eq!(out.flushes, vec![3, 6]);
    }

    #[test]
    fn test_line_mode_unterminated_tail() {
        let (out, waits) = run(b"one\ntwo", PacingUnit::Line);
        assert_eq!(out.data, b"one\ntwo");
        assert_eq!(waits, 2);
    }

    #[test]
    fn test_line_mode_blank_lines() {
        let (out, waits) = run(b"\n\nx\n", PacingUnit::Line);
        assert_eq!(out.data, b"\n\nx\n");
        assert_eq!(waits, 3);
    }

    #[test]
    fn test_empty_source_never_waits() {
        for unit in [PacingUnit::Character, PacingUnit::Line] {
            let (out, waits) = run(b"", unit);
            assert!(out.data.is_empty());
            assert_eq!(waits, 0);
        }
    }

    #[test]
    fn test_long_line_crosses_buffer_boundaries() {
        let mut input = vec![b'x'; 20_000];
        input.push(b'\n');
        input.extend_from_slice(b"short\n");

        let mut reader = BufReader::with_capacity(64, Cursor::new(input.clone()));
        let mut pacer = Recorder::default();
        let mut out = Vec::new();
        relay_source("long", &mut reader, PacingUnit::Line, &mut pacer, &mut out).unwrap();

        assert_eq!(out, input);
        assert_eq!(pacer.waits, 2);
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let mut reader = Cursor::new(b"abc".to_vec());
        let mut pacer = Recorder::default();
        let err = relay_source(
            "test",
            &mut reader,
            PacingUnit::Character,
            &mut pacer,
            &mut BrokenPipe,
        )
        .unwrap_err();
        assert!(matches!(err, GateError::Write(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, "hello\n").unwrap();
        let missing = dir.path().join("missing.txt");

        let inputs = vec![
            InputSource::Path(missing.clone()),
            InputSource::Path(present),
        ];
        let mut pacer = Recorder::default();
        let mut out = Vec::new();
        let report = relay(&inputs, PacingUnit::Line, &mut pacer, &mut out).unwrap();

        assert_eq!(out, b"hello\n");
        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            GateError::SourceOpen { name, .. } if name == &missing.display().to_string()
        ));
    }

    #[test]
    fn test_sources_relayed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a");
        let second = dir.path().join("b");
        std::fs::write(&first, "1\n2").unwrap();
        std::fs::write(&second, "3\n").unwrap();

        let inputs = vec![InputSource::Path(first), InputSource::Path(second)];
        let mut pacer = Recorder::default();
        let mut out = Vec::new();
        let report = relay(&inputs, PacingUnit::Line, &mut pacer, &mut out).unwrap();

        assert!(report.is_success());
        assert_eq!(out, b"1\n23\n");
        assert_eq!(pacer.waits, 3);
    }

    #[test]
    fn test_input_source_from_arg() {
        assert_eq!(InputSource::from_arg("-"), InputSource::Stdin);
        assert_eq!(
            InputSource::from_arg("notes.txt"),
            InputSource::Path(PathBuf::from("notes.txt"))
        );
        assert_eq!(InputSource::Stdin.name(), "stdin");
    }
}
