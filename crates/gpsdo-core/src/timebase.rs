// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Authoritative time representation.
//!
//! Maintains the seconds-since-epoch counter, advanced by exactly +1 per
//! validated nominal-period edge, and interpolates the time elapsed since
//! the last edge from the monotonic hardware clock, adjusted by the
//! discipline loop's current frequency correction. When the pulse stops,
//! the interpolation keeps published time flowing on that correction; it
//! never freezes at the last edge.
//!
//! The published representation is the protocol-era timestamp: seconds
//! since 1900-01-01 plus a 32-bit binary fraction, the format expected by
//! the downstream time-distribution servers.

/// The number of seconds from 1st January 1900 UTC to the start of the Unix
/// epoch.
pub const EPOCH_DELTA: i64 = 2_208_988_800;

// The 32-bit binary fractional scale (full range = 1 second).
const FRACTION_SCALE: f64 = (1u64 << 32) as f64;

/// A fixed-point time value in the published (1900-based) epoch.
///
/// Invariant: `fraction` spans `[0, 2^32)`, full range = 1 second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    /// Whole seconds since the 1900 epoch.
    pub seconds: u32,
    /// Binary fractional second.
    pub fraction: u32,
}

impl Timestamp {
    /// The fractional part as seconds in `[0, 1)`.
    pub fn subsec_seconds(&self) -> f64 {
        self.fraction as f64 / FRACTION_SCALE
    }

    /// Whole Unix seconds (1970-based), saturating at 0 for pre-epoch values.
    pub fn unix_seconds(&self) -> u64 {
        (self.seconds as i64 - EPOCH_DELTA).max(0) as u64
    }
}

/// The authoritative seconds counter and sub-second interpolator.
#[derive(Debug, Default)]
pub struct TimeBase {
    /// Unix seconds; advanced once per validated edge.
    seconds_since_epoch: u64,
    /// Monotonic timestamp (µs) of the edge that began the current second.
    last_edge_us: Option<u64>,
    /// Set once the epoch has been set explicitly or via staged handoff.
    epoch_set: bool,
    /// Secondary-source time staged for atomic application on the next edge.
    pending_unix: Option<u32>,
}

impl TimeBase {
    /// Create a time base at second 0, epoch unset.
    pub fn new() -> Self {
        TimeBase::default()
    }

    /// Advance the second for a validated reference edge.
    ///
    /// Must never be called for invalid edges, and never more than once per
    /// edge. One nominal period advances the counter by exactly one; after a
    /// pulse outage the whole gap is credited in rounded seconds, keeping
    /// the counter continuous with the interpolated [`now()`](TimeBase::now)
    /// reading across recovery.
    ///
    /// If a secondary-source time is staged, it is applied here: a source's
    /// report for second N arrives after the edge it describes, so this edge
    /// starts second N+1.
    pub fn on_edge(&mut self, edge_timestamp_us: u64) {
        if let Some(unix) = self.pending_unix.take() {
            self.seconds_since_epoch = unix as u64 + 1;
            self.epoch_set = true;
            log::info!("epoch set from staged source time: unix {}", unix);
        } else {
            let ticks = match self.last_edge_us {
                Some(prev) => {
                    let elapsed_s = edge_timestamp_us.saturating_sub(prev) as f64 / 1e6;
                    (elapsed_s.round() as u64).max(1)
                }
                None => 1,
            };
            self.seconds_since_epoch += ticks;
        }
        self.last_edge_us = Some(edge_timestamp_us);
    }

    /// Step the epoch directly.
    ///
    /// The caller must follow this with a discipline-loop reset; the
    /// accumulated integral term is meaningless across a discontinuity.
    pub fn set_time(&mut self, unix_secs: u32) {
        self.seconds_since_epoch = unix_secs as u64;
        self.epoch_set = true;
    }

    /// Stage a secondary-source time report for the next edge.
    ///
    /// Replaces any previously staged value; applied atomically by
    /// [`on_edge()`](TimeBase::on_edge).
    pub fn stage_time(&mut self, unix_secs: u32) {
        self.pending_unix = Some(unix_secs);
    }

    /// Drop the explicit-epoch flag and any staged time, forcing
    /// re-acquisition. Idempotent.
    pub fn clear_epoch(&mut self) {
        self.epoch_set = false;
        self.pending_unix = None;
    }

    /// Whether the epoch has been set (explicitly or via staged handoff).
    pub fn is_epoch_set(&self) -> bool {
        self.epoch_set
    }

    /// Whether a staged secondary time is waiting for the next edge.
    pub fn has_pending_time(&self) -> bool {
        self.pending_unix.is_some()
    }

    /// Current whole Unix seconds.
    pub fn unix_seconds(&self) -> u64 {
        self.seconds_since_epoch
    }

    /// Read the current time in the published representation.
    ///
    /// Interpolates `(now - last_edge)`, scaled by the discipline
    /// correction. Whole elapsed seconds are carried into the seconds field,
    /// so published time keeps flowing between edges (holdover on the last
    /// correction) instead of freezing at the last pulse.
    pub fn now(&self, now_us: u64, correction_ppb: f64) -> Timestamp {
        let elapsed_us = match self.last_edge_us {
            Some(edge) => now_us.saturating_sub(edge),
            None => 0,
        };
        let elapsed_s = elapsed_us as f64 / 1e6 * (1.0 + correction_ppb * 1e-9);
        let whole = elapsed_s.floor();
        let frac = elapsed_s - whole;
        Timestamp {
            seconds: (self.seconds_since_epoch as i64 + EPOCH_DELTA + whole as i64) as u32,
            fraction: (frac * FRACTION_SCALE) as u32,
        }
    }
}
