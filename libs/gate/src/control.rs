// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Control source watcher
//!
//! The rate may come from a file that is re-read while the gate runs. The
//! kind of file decides how it is read:
//!
//! - **Regular file**: every refresh seeks to the start and parses the first
//!   line. Overwrite the file to change the rate.
//! - **Character device or FIFO**: opened non-blocking. Refreshes drain
//!   whatever bytes are available into a small line buffer. Of the lines
//!   completed by one refresh, the last valid one is applied; an unterminated
//!   tail waits for the next refresh.
//!
//! Refreshes are requested by the [`Trigger`](crate::trigger::Trigger) and
//! performed by [`Watcher::reconfigure`], which the governor calls before
//! every scheduling decision. Failed refreshes keep the current interval.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use crate::error::{ControlFileProblem, GateError, ReconfigureError, Result};
use crate::governor::Reconfigure;
use crate::interval::{Interval, IntervalSlot};
use crate::trigger::{RefreshRequest, SignalMask, TRIGGER_SIGNAL, Trigger};

/// Size of the control line buffer, terminator included.
pub const CONTROL_BUFFER_CAPACITY: usize = 64;

/// Bytes taken from the control source by a single read.
const READ_WINDOW: usize = CONTROL_BUFFER_CAPACITY - 1;

/// Upper bound on reads per refresh, so an endless device cannot stall the relay.
const MAX_DRAIN_READS: usize = 16;

/// Line being assembled from a reactive control source.
#[derive(Debug, Clone)]
pub struct PendingLine {
    buf: [u8; CONTROL_BUFFER_CAPACITY],
    len: usize,
    /// Skipping the rest of a line that outgrew the buffer.
    discarding: bool,
}

impl Default for PendingLine {
    fn default() -> Self {
        Self {
            buf: [0; CONTROL_BUFFER_CAPACITY],
            len: 0,
            discarding: false,
        }
    }
}

/// What one refresh of a reactive source produced.
#[derive(Debug, Default)]
struct Assembled {
    latest: Option<Interval>,
    rejected: Option<ReconfigureError>,
}

impl PendingLine {
    /// Append `bytes`. Returns `false`, leaving the contents untouched, if the
    /// line would no longer fit.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        let end = self.len + bytes.len();
        if end >= READ_WINDOW {
            return false;
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.discarding = false;
    }

    /// Split `bytes` into lines, parsing every line that completes.
    fn feed(&mut self, bytes: &[u8], assembled: &mut Assembled) {
        let mut segments = bytes.split(|&b| b == b'\n').peekable();
        while let Some(segment) = segments.next() {
            let terminated = segments.peek().is_some();
            self.absorb(segment, terminated, assembled);
        }
    }

    fn absorb(&mut self, segment: &[u8], terminated: bool, assembled: &mut Assembled) {
        if self.discarding {
            self.discarding = !terminated;
            return;
        }
        if !self.push(segment) {
            self.clear();
            self.discarding = !terminated;
            assembled.rejected = Some(ReconfigureError::Overflow);
            return;
        }
        if terminated {
            match Interval::parse(self.as_bytes()) {
                Ok(interval) => assembled.latest = Some(interval),
                Err(err) => assembled.rejected = Some(err.into()),
            }
            self.clear();
        }
    }
}

pub enum ControlSource {
    None,
    PollingFile {
        path: PathBuf,
        file: File,
    },
    ReactiveFile {
        path: PathBuf,
        file: File,
        pending: PendingLine,
    },
}

impl ControlSource {
    /// Open `path` as a control source, choosing the variant from its file type.
    pub fn open(path: &Path) -> Result<Self> {
        let reject = |problem| GateError::ControlFile {
            path: path.to_path_buf(),
            problem,
        };

        let metadata = std::fs::metadata(path).map_err(|err| {
            reject(match err.kind() {
                io::ErrorKind::PermissionDenied => ControlFileProblem::Unreadable,
                io::ErrorKind::NotFound => ControlFileProblem::NotFound,
                _ => ControlFileProblem::Invalid,
            })
        })?;

        let file_type = metadata.file_type();
        if file_type.is_file() {
            let file = File::open(path).map_err(|_| reject(ControlFileProblem::OpenFailed))?;
            tracing::debug!(path = %path.display(), "polling control file");
            Ok(ControlSource::PollingFile {
                path: path.to_path_buf(),
                file,
            })
        } else if file_type.is_char_device() || file_type.is_fifo() {
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
                .map_err(|_| reject(ControlFileProblem::OpenFailed))?;
            tracing::debug!(path = %path.display(), "reactive control source");
            Ok(ControlSource::ReactiveFile {
                path: path.to_path_buf(),
                file,
                pending: PendingLine::default(),
            })
        } else {
            Err(reject(ControlFileProblem::ImproperType))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ControlSource::None => None,
            ControlSource::PollingFile { path, .. } | ControlSource::ReactiveFile { path, .. } => {
                Some(path.as_path())
            }
        }
    }

    /// Read the source once. `Ok(None)` means nothing new to apply yet.
    pub fn refresh(&mut self) -> std::result::Result<Option<Interval>, ReconfigureError> {
        match self {
            ControlSource::None => Ok(None),
            ControlSource::PollingFile { file, .. } => read_first_line(file).map(Some),
            ControlSource::ReactiveFile { file, pending, .. } => assemble_lines(file, pending),
        }
    }
}

fn read_first_line(file: &mut File) -> std::result::Result<Interval, ReconfigureError> {
    file.seek(SeekFrom::Start(0)).map_err(ReconfigureError::Read)?;

    let mut buf = [0u8; READ_WINDOW];
    let n = read_retrying(file, &mut buf).map_err(ReconfigureError::Read)?;
    if n == 0 {
        return Err(ReconfigureError::Empty);
    }

    let line = match buf[..n].iter().position(|&b| b == b'\n') {
        Some(end) => &buf[..end],
        None => &buf[..n],
    };
    Ok(Interval::parse(line)?)
}

/// Drain available bytes through `pending`.
///
/// Returns the last line that parsed. When no line parsed, the last rejection
/// (an invalid line, an oversized line or a read error) is returned instead.
/// A read error also drops the partial line.
fn assemble_lines(
    file: &mut File,
    pending: &mut PendingLine,
) -> std::result::Result<Option<Interval>, ReconfigureError> {
    let mut chunk = [0u8; READ_WINDOW];
    let mut assembled = Assembled::default();

    for _ in 0..MAX_DRAIN_READS {
        let n = match read_available(file, &mut chunk) {
            Ok(n) => n,
            Err(err) => {
                pending.clear();
                assembled.rejected = Some(ReconfigureError::Read(err));
                break;
            }
        };
        pending.feed(&chunk[..n], &mut assembled);
        // short read: drained for now
        if n < READ_WINDOW {
            break;
        }
    }

    match assembled {
        Assembled {
            latest: Some(interval),
            ..
        } => Ok(Some(interval)),
        Assembled {
            rejected: Some(err),
            ..
        } => Err(err),
        Assembled { .. } => Ok(None),
    }
}

/// Non-blocking read; `EAGAIN` counts as nothing available.
fn read_available(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    match read_retrying(file, buf) {
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
        other => other,
    }
}

fn read_retrying(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Control source plus the request flag that schedules its refreshes.
pub struct Watcher {
    source: ControlSource,
    request: RefreshRequest,
    trigger: Option<Trigger>,
}

impl Watcher {
    /// No control source: the rate given at startup stays in force.
    pub fn fixed() -> Self {
        Self {
            source: ControlSource::None,
            request: RefreshRequest::new(false),
            trigger: None,
        }
    }

    /// Watch `source`, refreshed whenever `request` is raised.
    ///
    /// Does not install any signal handling; pair with [`Watcher::with_trigger`]
    /// or raise the request directly.
    pub fn new(source: ControlSource, request: RefreshRequest) -> Self {
        Self {
            source,
            request,
            trigger: None,
        }
    }

    /// Keep `trigger` alive for as long as the watcher lives.
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    fn refresh_into(&mut self, slot: &IntervalSlot) {
        match self.source.refresh() {
            Ok(Some(interval)) => {
                if slot.load() != interval {
                    tracing::debug!(
                        path = ?self.source.path(),
                        %interval,
                        "control source published new interval"
                    );
                }
                slot.store(interval);
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(%err, "control refresh ignored"),
        }
    }
}

impl Reconfigure for Watcher {
    fn reconfigure(&mut self, slot: &IntervalSlot) -> Result<()> {
        if !self.request.take() {
            return Ok(());
        }
        if self.trigger.is_none() {
            self.refresh_into(slot);
            return Ok(());
        }

        let mask = SignalMask::block(TRIGGER_SIGNAL)?;
        self.refresh_into(slot);
        mask.restore()
    }
}
