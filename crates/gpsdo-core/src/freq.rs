// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Reciprocal frequency counter.
//!
//! Measures the reference oscillator against the PPS edge by counting
//! oscillator cycles between successive validated edges (reciprocal
//! counting), producing a parts-per-billion deviation from nominal. A
//! single-pole exponential filter smooths the reported value; the raw
//! per-edge value remains queryable for diagnostics.
//!
//! The first measurement after construction or [`reset()`](FrequencyCounter::reset)
//! is discarded: with no prior edge there is no valid cycle-count baseline.

/// Default weight given to the newest sample by the output filter.
pub const DEFAULT_FILTER_WEIGHT: f64 = 0.1;

/// Fraction of probe samples that must be transitions for "signal present".
///
/// A reference line running far above the sampling rate looks like noise to
/// a slow sampler; roughly half of adjacent samples differ. One eighth is a
/// comfortably low bar that still rejects a stuck line.
const PROBE_TRANSITION_DIVISOR: u32 = 8;

/// Frequency counter configuration.
#[derive(Clone, Copy, Debug)]
pub struct FreqConfig {
    /// Nominal oscillator frequency in Hz.
    pub nominal_hz: f64,
    /// Exponential filter coefficient in (0, 1]; weight of the newest sample.
    pub filter_weight: f64,
}

impl Default for FreqConfig {
    fn default() -> Self {
        FreqConfig {
            nominal_hz: 10_000_000.0,
            filter_weight: DEFAULT_FILTER_WEIGHT,
        }
    }
}

/// A single reciprocal-counting result.
///
/// Superseded, not mutated, by the next measurement.
#[derive(Clone, Copy, Debug)]
pub struct FrequencyMeasurement {
    /// Raw cycle count observed between the two edges.
    pub cycles: u64,
    /// Unfiltered deviation from nominal, parts per billion.
    pub raw_ppb: f64,
    /// Exponentially filtered deviation, parts per billion.
    pub filtered_ppb: f64,
}

/// Reciprocal frequency counter state.
#[derive(Debug)]
pub struct FrequencyCounter {
    config: FreqConfig,
    /// Set once the cold-start measurement has been discarded.
    primed: bool,
    filtered_ppb: Option<f64>,
    last: Option<FrequencyMeasurement>,
}

impl FrequencyCounter {
    /// Create a counter for the given nominal frequency.
    pub fn new(config: FreqConfig) -> Self {
        FrequencyCounter {
            config,
            primed: false,
            filtered_ppb: None,
            last: None,
        }
    }

    /// Process the cycle count accumulated between two successive validated
    /// edges.
    ///
    /// Returns `None` (no measurement) when:
    /// - `elapsed_s` is zero or negative (clock wrap or duplicate edge);
    /// - `cycles` is zero;
    /// - this is the first call since construction or reset (cold-start
    ///   artifact, no baseline).
    ///
    /// The previous filtered value is retained across discarded samples.
    pub fn measure(&mut self, cycles: u64, elapsed_s: f64) -> Option<FrequencyMeasurement> {
        if elapsed_s <= 0.0 || cycles == 0 {
            return None;
        }
        if !self.primed {
            self.primed = true;
            return None;
        }

        let measured_hz = cycles as f64 / elapsed_s;
        let raw_ppb = (measured_hz - self.config.nominal_hz) / self.config.nominal_hz * 1e9;
        let filtered_ppb = match self.filtered_ppb {
            Some(f) => f + self.config.filter_weight * (raw_ppb - f),
            None => raw_ppb,
        };
        self.filtered_ppb = Some(filtered_ppb);

        let m = FrequencyMeasurement {
            cycles,
            raw_ppb,
            filtered_ppb,
        };
        self.last = Some(m);
        Some(m)
    }

    /// Discard the measurement baseline, e.g. after a source change.
    ///
    /// The next [`measure()`](FrequencyCounter::measure) call re-primes and
    /// is discarded.
    pub fn reset(&mut self) {
        self.primed = false;
        self.filtered_ppb = None;
        self.last = None;
    }

    /// Filtered deviation in ppb, if at least one measurement was accepted.
    pub fn filtered_ppb(&self) -> Option<f64> {
        self.filtered_ppb
    }

    /// Raw (unfiltered) deviation of the latest measurement, for diagnostics.
    pub fn raw_ppb(&self) -> Option<f64> {
        self.last.map(|m| m.raw_ppb)
    }

    /// Latest accepted measurement.
    pub fn last_measurement(&self) -> Option<FrequencyMeasurement> {
        self.last
    }

    /// Probe the raw reference line for signal presence.
    ///
    /// Samples the line `samples` times via the supplied sampler and counts
    /// level transitions; the signal is present when the count exceeds a
    /// minimum threshold scaled to the sample window. Works before any edge
    /// has been validated, so the state machine can distinguish "no signal"
    /// from "signal not yet qualified".
    pub fn probe_signal<F: FnMut() -> bool>(&self, mut sample_line: F, samples: u32) -> bool {
        if samples < 2 {
            return false;
        }
        let mut transitions = 0u32;
        let mut prev = sample_line();
        for _ in 1..samples {
            let level = sample_line();
            if level != prev {
                transitions += 1;
            }
            prev = level;
        }
        transitions >= (samples / PROBE_TRANSITION_DIVISOR).max(1)
    }
}

impl Default for FrequencyCounter {
    fn default() -> Self {
        Self::new(FreqConfig::default())
    }
}
