// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Secondary time source abstraction.
//!
//! A secondary source is typically a satellite receiver: it reports whole
//! Unix seconds with some latency after the edge each report describes, and
//! exposes the validity of its own pulse output. The core consumes these
//! three signals only; parsing the receiver's wire protocol lives outside
//! this crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A secondary (backup) time source consulted by the synchronization state
/// machine.
///
/// Implementations must be cheap to query; all three methods are called
/// once per poll cycle.
pub trait SecondarySource: Send {
    /// Whether the source currently reports a trustworthy time of day.
    fn has_valid_time(&self) -> bool;

    /// The source's most recent whole Unix seconds report.
    ///
    /// Only meaningful while [`has_valid_time()`](SecondarySource::has_valid_time)
    /// returns true.
    fn get_unix_time(&self) -> u32;

    /// Whether the source's own pulse output is currently valid.
    fn pps_valid(&self) -> bool;

    /// A human-readable description of this source.
    fn description(&self) -> &str {
        "Secondary time source"
    }
}

#[derive(Debug, Default)]
struct SimulatedInner {
    time_valid: AtomicBool,
    unix_time: AtomicU32,
    pps: AtomicBool,
}

/// A scriptable secondary source for tests and simulations.
///
/// Cloning yields a handle to the same source, so a test can keep one half
/// and hand the other to the state machine.
#[derive(Clone, Debug, Default)]
pub struct SimulatedSource {
    inner: Arc<SimulatedInner>,
}

impl SimulatedSource {
    /// Create a source reporting nothing valid.
    pub fn new() -> Self {
        SimulatedSource::default()
    }

    /// Script the reported time validity.
    pub fn set_time_valid(&self, valid: bool) {
        self.inner.time_valid.store(valid, Ordering::Relaxed);
    }

    /// Script the reported Unix seconds.
    pub fn set_unix_time(&self, unix: u32) {
        self.inner.unix_time.store(unix, Ordering::Relaxed);
    }

    /// Script the reported pulse validity.
    pub fn set_pps(&self, valid: bool) {
        self.inner.pps.store(valid, Ordering::Relaxed);
    }
}

impl SecondarySource for SimulatedSource {
    fn has_valid_time(&self) -> bool {
        self.inner.time_valid.load(Ordering::Relaxed)
    }

    fn get_unix_time(&self) -> u32 {
        self.inner.unix_time.load(Ordering::Relaxed)
    }

    fn pps_valid(&self) -> bool {
        self.inner.pps.load(Ordering::Relaxed)
    }

    fn description(&self) -> &str {
        "Simulated source (testing only)"
    }
}
