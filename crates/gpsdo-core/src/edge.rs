// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! PPS edge capture with interrupt-safe handoff and period validation.
//!
//! The reference pulse arrives in interrupt context, where only a timestamp
//! and a hardware cycle-counter snapshot may be recorded. The [`EdgeCell`]
//! is a lock-free single-producer/single-consumer cell (sequence-counter
//! protected) carrying that snapshot to the cooperative poll loop, which
//! performs validation and bookkeeping via [`EdgeCapture`].
//!
//! An edge is classified valid when its pulse-to-pulse period falls within a
//! tolerance window around the nominal period. Invalid edges are counted but
//! never advance dependent state (seconds counter, frequency measurement,
//! discipline loop).

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Number of recent pulse periods retained for jitter statistics.
pub const HISTORY_SIZE: usize = 16;

/// Minimum period samples required before jitter is reported.
pub const MIN_JITTER_SAMPLES: usize = 4;

/// Bounded retries for a consistent snapshot read before giving up.
const SNAPSHOT_RETRIES: u32 = 8;

/// Configuration for edge capture and period validation.
#[derive(Clone, Copy, Debug)]
pub struct EdgeConfig {
    /// Nominal pulse-to-pulse period in microseconds (1 s for PPS).
    pub nominal_period_us: u64,
    /// Validation tolerance around the nominal period, in microseconds.
    pub tolerance_us: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        EdgeConfig {
            nominal_period_us: 1_000_000,
            tolerance_us: 500,
        }
    }
}

/// Lock-free single-producer/single-consumer edge snapshot cell.
///
/// The interrupt-context producer calls [`capture()`](EdgeCell::capture);
/// the poll-loop consumer calls [`snapshot()`](EdgeCell::snapshot). The
/// sequence counter is odd while a write is in progress, so a reader that
/// observes a torn write retries instead of consuming inconsistent state.
#[derive(Debug, Default)]
pub struct EdgeCell {
    seq: AtomicU32,
    timestamp_us: AtomicU64,
    cycles: AtomicU64,
}

/// A consistent read of the most recent captured edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeSnapshot {
    /// Edge sequence number (increments once per captured edge).
    pub seq: u32,
    /// Monotonic hardware timestamp of the edge, microseconds.
    pub timestamp_us: u64,
    /// Free-running hardware cycle counter at the edge.
    pub cycles: u64,
}

impl EdgeCell {
    /// Create an empty cell (sequence 0 = no edge captured yet).
    pub const fn new() -> Self {
        EdgeCell {
            seq: AtomicU32::new(0),
            timestamp_us: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    /// Record an edge. Interrupt-context safe: two stores bracketed by
    /// sequence increments, no blocking, no allocation.
    pub fn capture(&self, timestamp_us: u64, cycles: u64) {
        let seq = self.seq.load(Ordering::Relaxed);
        // Odd sequence marks the write window.
        self.seq.store(seq.wrapping_add(1), Ordering::Release);
        self.timestamp_us.store(timestamp_us, Ordering::Release);
        self.cycles.store(cycles, Ordering::Release);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Read the latest edge, retrying if a capture is in flight.
    ///
    /// Returns `None` if no edge has been captured, or if a consistent read
    /// could not be obtained within the retry bound (a capture storm; the
    /// next poll will succeed).
    pub fn snapshot(&self) -> Option<EdgeSnapshot> {
        for _ in 0..SNAPSHOT_RETRIES {
            let seq1 = self.seq.load(Ordering::Acquire);
            if seq1 == 0 || seq1 & 1 != 0 {
                if seq1 == 0 {
                    return None;
                }
                continue;
            }
            let timestamp_us = self.timestamp_us.load(Ordering::Acquire);
            let cycles = self.cycles.load(Ordering::Acquire);
            let seq2 = self.seq.load(Ordering::Acquire);
            if seq1 == seq2 {
                return Some(EdgeSnapshot {
                    seq: seq1 >> 1,
                    timestamp_us,
                    cycles,
                });
            }
        }
        None
    }
}

/// One captured reference-pulse arrival, as seen by the poll loop.
///
/// Immutable once created; consumed by the frequency counter, the time base,
/// and the discipline loop on the same poll cycle.
#[derive(Clone, Copy, Debug)]
pub struct EdgeEvent {
    /// Edge sequence number from the capture cell.
    pub seq: u32,
    /// Monotonic hardware timestamp of the edge, microseconds.
    pub timestamp_us: u64,
    /// Hardware cycle counter at the edge.
    pub cycles: u64,
    /// Elapsed period since the previous edge, if one exists.
    pub period_us: Option<u64>,
    /// Whether the period passed validation.
    pub valid: bool,
}

/// Poll-side edge bookkeeping: validation, counters, and jitter history.
#[derive(Debug)]
pub struct EdgeCapture {
    cell: Arc<EdgeCell>,
    config: EdgeConfig,
    last_seq: u32,
    last_timestamp_us: Option<u64>,
    valid_edges: u64,
    invalid_edges: u64,
    periods: [Option<u64>; HISTORY_SIZE],
    next_idx: usize,
}

impl EdgeCapture {
    /// Create a new capture with its own cell.
    pub fn new(config: EdgeConfig) -> Self {
        EdgeCapture {
            cell: Arc::new(EdgeCell::new()),
            config,
            last_seq: 0,
            last_timestamp_us: None,
            valid_edges: 0,
            invalid_edges: 0,
            periods: [None; HISTORY_SIZE],
            next_idx: 0,
        }
    }

    /// Handle to the snapshot cell for the interrupt-context producer.
    pub fn cell(&self) -> Arc<EdgeCell> {
        Arc::clone(&self.cell)
    }

    /// Check for a new edge since the last poll.
    ///
    /// Detection is by sequence-number comparison, never by consuming
    /// interrupt-signaled events directly. A valid edge has its period
    /// pushed into the jitter history; an invalid edge only bumps the
    /// invalid counter. The first edge after startup has no period baseline
    /// and is reported invalid without being counted as a fault.
    pub fn poll(&mut self) -> Option<EdgeEvent> {
        let snap = self.cell.snapshot()?;
        if snap.seq == self.last_seq {
            return None;
        }
        self.last_seq = snap.seq;

        let (period_us, valid) = match self.last_timestamp_us {
            Some(prev) => {
                let period = snap.timestamp_us.saturating_sub(prev);
                let lo = self.config.nominal_period_us - self.config.tolerance_us;
                let hi = self.config.nominal_period_us + self.config.tolerance_us;
                (Some(period), (lo..=hi).contains(&period))
            }
            None => (None, false),
        };
        self.last_timestamp_us = Some(snap.timestamp_us);

        if valid {
            self.valid_edges += 1;
            self.periods[self.next_idx] = period_us;
            self.next_idx = (self.next_idx + 1) % HISTORY_SIZE;
        } else if period_us.is_some() {
            self.invalid_edges += 1;
            log::debug!(
                "invalid edge: period {}µs outside {}±{}µs",
                period_us.unwrap_or(0),
                self.config.nominal_period_us,
                self.config.tolerance_us
            );
        }

        Some(EdgeEvent {
            seq: snap.seq,
            timestamp_us: snap.timestamp_us,
            cycles: snap.cycles,
            period_us,
            valid,
        })
    }

    /// Whether an edge has been observed within the last 2 nominal periods.
    ///
    /// Absence becomes detectable within one missed period.
    pub fn signal_present(&self, now_us: u64) -> bool {
        match self.last_timestamp_us {
            Some(ts) => now_us.saturating_sub(ts) < 2 * self.config.nominal_period_us,
            None => false,
        }
    }

    /// Pulse jitter: standard deviation of consecutive period differences
    /// over the retained history, in microseconds.
    ///
    /// Returns `None` below [`MIN_JITTER_SAMPLES`] retained periods.
    pub fn jitter_us(&self) -> Option<f64> {
        let periods: Vec<u64> = self.ordered_periods();
        if periods.len() < MIN_JITTER_SAMPLES {
            return None;
        }
        let diffs: Vec<f64> = periods
            .windows(2)
            .map(|w| w[1] as f64 - w[0] as f64)
            .collect();
        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let var = diffs.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / diffs.len() as f64;
        Some(var.sqrt())
    }

    /// Number of edges that passed period validation.
    pub fn valid_edges(&self) -> u64 {
        self.valid_edges
    }

    /// Number of edges rejected by period validation.
    pub fn invalid_edges(&self) -> u64 {
        self.invalid_edges
    }

    /// Sequence number of the most recently consumed edge.
    pub fn sequence(&self) -> u32 {
        self.last_seq
    }

    /// Retained periods in arrival order (oldest first).
    fn ordered_periods(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(HISTORY_SIZE);
        for i in 0..HISTORY_SIZE {
            let idx = (self.next_idx + i) % HISTORY_SIZE;
            if let Some(p) = self.periods[idx] {
                out.push(p);
            }
        }
        out
    }
}
