// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Periodic-time literals
//!
//! A literal is a run of decimal digits followed by an optional unit:
//!
//! | unit         | meaning                          |
//! |--------------|----------------------------------|
//! | none, `ms`   | milliseconds                     |
//! | `s`          | seconds                          |
//! | `us`         | microseconds                     |
//! | `ns`         | nanoseconds                      |
//! | `bps`        | bits per second, 8 bits/char     |
//! | `cps`        | chars per second, 10 bits/char   |
//! | `%`          | only `0%` (closed) or `100%` (open) |
//!
//! The numeric part is bounded by `i32::MAX` for every unit.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use thiserror::Error;

/// Longest literal accepted, in bytes. Matches the control buffer.
pub const MAX_LITERAL_LEN: usize = crate::control::CONTROL_BUFFER_CAPACITY - 1;

/// Decimal digit count of `i32::MAX`.
const MAX_DIGITS: usize = 10;

const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_MICRO: u64 = 1_000;

/// Time between the starts of two consecutive blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    /// Pace at this many nanoseconds per block. `Finite(0)` is fully open.
    Finite(u64),
    /// Valve closed: nothing is emitted until the rate changes.
    Infinite,
}

impl Interval {
    pub const OPEN: Interval = Interval::Finite(0);

    /// Parse a periodic-time literal.
    ///
    /// Accepts raw bytes because control files are not guaranteed to be UTF-8.
    pub fn parse(text: impl AsRef<[u8]>) -> Result<Interval, IntervalError> {
        parse_literal(text.as_ref())
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Interval::Finite(ns) => Some(Duration::from_nanos(*ns)),
            Interval::Infinite => None,
        }
    }

    /// Signed nanosecond encoding: `-1` stands for [`Interval::Infinite`].
    pub fn to_nanos_signed(self) -> i64 {
        match self {
            Interval::Finite(ns) => ns as i64,
            Interval::Infinite => -1,
        }
    }

    /// Inverse of [`Interval::to_nanos_signed`]. Any negative value decodes as closed.
    pub fn from_nanos_signed(ns: i64) -> Interval {
        if ns < 0 {
            Interval::Infinite
        } else {
            Interval::Finite(ns as u64)
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Finite(ns) => write!(f, "{ns}ns"),
            Interval::Infinite => f.write_str("0%"),
        }
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("empty periodic time")]
    Empty,

    #[error("periodic time longer than {MAX_LITERAL_LEN} bytes")]
    TooLong,

    #[error("periodic time has no numeric part")]
    MissingDigits,

    #[error("numeric part out of range")]
    Overflow,

    #[error("unknown unit {0:?}")]
    UnknownUnit(String),

    #[error("only 0% and 100% are supported, got {0}%")]
    UnsupportedPercentage(u32),
}

fn parse_literal(text: &[u8]) -> Result<Interval, IntervalError> {
    if text.is_empty() {
        return Err(IntervalError::Empty);
    }
    if text.len() > MAX_LITERAL_LEN {
        return Err(IntervalError::TooLong);
    }

    let digits = text.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(IntervalError::MissingDigits);
    }
    if digits > MAX_DIGITS {
        return Err(IntervalError::Overflow);
    }

    let value = text[..digits]
        .iter()
        .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'));
    if value > i32::MAX as u64 {
        return Err(IntervalError::Overflow);
    }
    // A full-width literal below half of i32::MAX is rejected as well. This
    // catches zero-padded literals like "0000000001" but also refuses
    // 1000000000..=1073741822; the intended boundary is unclear, kept as is.
    if digits == MAX_DIGITS && value < (i32::MAX / 2) as u64 {
        return Err(IntervalError::Overflow);
    }

    match &text[digits..] {
        b"s" => Ok(Interval::Finite(value * NANOS_PER_SEC)),
        b"" | b"ms" => Ok(Interval::Finite(value * NANOS_PER_MILLI)),
        b"us" => Ok(Interval::Finite(value * NANOS_PER_MICRO)),
        b"ns" => Ok(Interval::Finite(value)),
        b"bps" => Ok(per_character(value, 8)),
        b"cps" => Ok(per_character(value, 10)),
        b"%" => match value {
            0 => Ok(Interval::Infinite),
            100 => Ok(Interval::OPEN),
            other => Err(IntervalError::UnsupportedPercentage(other as u32)),
        },
        unit => Err(IntervalError::UnknownUnit(
            String::from_utf8_lossy(unit).into_owned(),
        )),
    }
}

/// Nanoseconds per character at `rate` units per second, rounded half up.
fn per_character(rate: u64, bits_per_char: u64) -> Interval {
    if rate == 0 {
        return Interval::Infinite;
    }
    let tenths = bits_per_char * NANOS_PER_SEC * 10 / rate;
    Interval::Finite((tenths + 5) / 10)
}

/// Single-writer slot holding the interval currently in force.
///
/// Stores the signed encoding so a reader never sees a half-written value.
#[derive(Debug)]
pub struct IntervalSlot(AtomicI64);

impl IntervalSlot {
    pub fn new(initial: Interval) -> Self {
        Self(AtomicI64::new(initial.to_nanos_signed()))
    }

    pub fn load(&self) -> Interval {
        Interval::from_nanos_signed(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, interval: Interval) {
        self.0.store(interval.to_nanos_signed(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_units() {
        assert_eq!(Interval::parse("500ms"), Ok(Interval::Finite(500_000_000)));
        assert_eq!(Interval::parse("1s"), Ok(Interval::Finite(1_000_000_000)));
        assert_eq!(Interval::parse("1000ns"), Ok(Interval::Finite(1000)));
        assert_eq!(Interval::parse("250us"), Ok(Interval::Finite(250_000)));
        assert_eq!(Interval::parse("20"), Ok(Interval::Finite(20_000_000)));
    }

    #[test]
    fn test_percentages() {
        assert_eq!(Interval::parse("0%"), Ok(Interval::Infinite));
        assert_eq!(Interval::parse("100%"), Ok(Interval::Finite(0)));
        assert_eq!(
            Interval::parse("50%"),
            Err(IntervalError::UnsupportedPercentage(50))
        );
    }

    #[test]
    fn test_character_rates() {
        assert_eq!(Interval::parse("0bps"), Ok(Interval::Infinite));
        assert_eq!(Interval::parse("10bps"), Ok(Interval::Finite(800_000_000)));
        assert_eq!(Interval::parse("0cps"), Ok(Interval::Infinite));
        assert_eq!(Interval::parse("10cps"), Ok(Interval::Finite(1_000_000_000)));
        // 8e9 / 3 = 2666666666.67 rounds up; 1e10 / 3 = 3333333333.33 rounds down
        assert_eq!(Interval::parse("3bps"), Ok(Interval::Finite(2_666_666_667)));
        assert_eq!(Interval::parse("3cps"), Ok(Interval::Finite(3_333_333_333)));
    }

    #[test]
    fn test_malformed_literals() {
        assert_eq!(Interval::parse(""), Err(IntervalError::Empty));
        assert_eq!(Interval::parse("abc"), Err(IntervalError::MissingDigits));
        assert_eq!(Interval::parse("ms"), Err(IntervalError::MissingDigits));
        assert_eq!(
            Interval::parse("12xyz"),
            Err(IntervalError::UnknownUnit("xyz".to_string()))
        );
        assert!(Interval::parse("12 ms").is_err());
        assert!(Interval::parse("-5ms").is_err());
        assert!(Interval::parse(b"5\xffs").is_err());
    }

    #[test]
    fn test_literal_length_limit() {
        let long = format!("1{}", "0".repeat(MAX_LITERAL_LEN));
        assert_eq!(Interval::parse(&long), Err(IntervalError::TooLong));
    }

    #[test]
    fn test_full_width_guard() {
        assert_eq!(Interval::parse("2147483647ns"), Ok(Interval::Finite(2_147_483_647)));
        assert_eq!(Interval::parse("1073741823ns"), Ok(Interval::Finite(1_073_741_823)));
        assert_eq!(Interval::parse("1073741822ns"), Err(IntervalError::Overflow));
        assert_eq!(Interval::parse("1000000000ns"), Err(IntervalError::Overflow));
        assert_eq!(Interval::parse("0000000001"), Err(IntervalError::Overflow));
        // nine digits are never subject to the guard
        assert_eq!(Interval::parse("999999999ns"), Ok(Interval::Finite(999_999_999)));
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(Interval::parse("2147483648"), Err(IntervalError::Overflow));
        assert_eq!(Interval::parse("99999999999"), Err(IntervalError::Overflow));
    }

    #[test]
    fn test_largest_seconds_fit() {
        let interval = Interval::parse("2147483647s").unwrap();
        assert_eq!(interval, Interval::Finite(2_147_483_647 * NANOS_PER_SEC));
        assert!(interval.to_nanos_signed() > 0);
    }

    #[test]
    fn test_slot_encoding() {
        let slot = IntervalSlot::new(Interval::Infinite);
        assert_eq!(slot.load(), Interval::Infinite);

        slot.store(Interval::Finite(42));
        assert_eq!(slot.load(), Interval::Finite(42));

        slot.store(Interval::OPEN);
        assert_eq!(slot.load(), Interval::Finite(0));
    }

    #[test]
    fn test_from_str() {
        let interval: Interval = "2s".parse().unwrap();
        assert_eq!(interval.as_duration(), Some(Duration::from_secs(2)));
        assert_eq!(Interval::Infinite.as_duration(), None);
    }
}
