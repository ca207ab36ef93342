// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Clock governor
//!
//! Decides when the next block may leave. The cadence is anchored to the
//! ideal schedule: after a completed sleep the reference deadline becomes the
//! sleep's *target*, not the time the sleep actually returned, so sleep
//! overshoot never accumulates.
//!
//! ## Late blocks
//!
//! When the caller arrives after the target (the consumer stalled, or the
//! previous block took long to read), the block goes out immediately and the
//! reference is re-anchored to the present. Backlog is dropped; there is never
//! a burst of back-to-back blocks to catch up.
//!
//! ## Rate changes
//!
//! The interval lives in an [`IntervalSlot`] owned by the governor. Before every
//! evaluation the governor lets its [`Reconfigure`] hook publish a new value.
//! A changed interval clears the reference, so the new cadence starts fresh
//! from "now" instead of from a deadline computed under the old rate.

use std::time::Duration;

use crate::clock::{Clock, Wake};
use crate::error::Result;
use crate::interval::{Interval, IntervalSlot};

/// Nap length while the valve is closed. Any signal ends it early.
pub const CLOSED_VALVE_NAP: Duration = Duration::from_secs(86_400);

/// Something that blocks until the next block is due.
pub trait Pace {
    fn wait_for_next_block(&mut self) -> Result<()>;
}

/// Hook that may publish a new interval into the governor's slot.
///
/// Called at the top of every governor evaluation, outside any signal context.
pub trait Reconfigure {
    fn reconfigure(&mut self, slot: &IntervalSlot) -> Result<()>;
}

/// One evaluation of the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// No reference yet: emit now and anchor here.
    Unset,
    /// Valve closed: nap until something changes.
    Infinite,
    /// Emit at `target`.
    Armed { target: Duration },
}

pub struct Governor<C: Clock, R: Reconfigure> {
    clock: C,
    control: R,
    slot: IntervalSlot,
    reference: Option<Duration>,
    last_seen: Interval,
}

impl<C: Clock, R: Reconfigure> Governor<C, R> {
    pub fn new(initial: Interval, clock: C, control: R) -> Self {
        Self {
            clock,
            control,
            slot: IntervalSlot::new(initial),
            reference: None,
            last_seen: initial,
        }
    }

    /// Interval currently in force.
    pub fn interval(&self) -> Interval {
        self.slot.load()
    }


    pub fn wait_for_next_block(&mut self) -> Result<()> {
        loop {
            self.control.reconfigure(&self.slot)?;

            let applied = self.slot.load();
            if applied != self.last_seen {
                tracing::debug!(from = %self.last_seen, to = %applied, "interval changed, cadence restarts");
                self.reference = None;
                self.last_seen = applied;
            }

            let step = match (applied, self.reference) {
                (Interval::Infinite, _) => Step::Infinite,
                // Fully open: no clock reads, no sleeps.
                (Interval::Finite(0), _) => return Ok(()),
                (Interval::Finite(_), None) => Step::Unset,
                (Interval::Finite(ns), Some(reference)) => Step::Armed {
                    target: reference + Duration::from_nanos(ns),
                },
            };

            match step {
                Step::Unset => {
                    self.reference = Some(self.clock.now()?);
                    return Ok(());
                }
                Step::Infinite => {
                    let wake = self.clock.sleep(CLOSED_VALVE_NAP)?;
                    tracing::trace!(?wake, "closed valve nap ended");
                }
                Step::Armed { target } => {
                    let now = self.clock.now()?;
                    if target <= now {
                        tracing::trace!(late_by = ?(now - target), "late block, re-anchoring");
                        self.reference = Some(now);
                        return Ok(());
                    }
                    match self.clock.sleep(target - now)? {
                        Wake::Elapsed => {
                            self.reference = Some(target);
                            return Ok(());
                        }
                        Wake::Interrupted => continue,
                    }
                }
            }
        }
    }
}

impl<C: Clock, R: Reconfigure> Pace for Governor<C, R> {
    fn wait_for_next_block(&mut self) -> Result<()> {
        Governor::wait_for_next_block(self)
    }
}
