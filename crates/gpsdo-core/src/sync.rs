// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Synchronization state machine and published time/status API.
//!
//! The [`SyncManager`] is the top-level coordinator: it drives edge capture,
//! the frequency counter, the time base, and the discipline loop from a
//! cooperative poll loop, and arbitrates between the primary oscillator, a
//! secondary time source, and holdover.
//!
//! State decisions are made by the pure [`transition()`] function over a
//! [`SyncInputs`] snapshot, separated from all side effects (component
//! resets, logging) so the transition table is testable in isolation. The
//! manager must be polled at a fixed wall-clock cadence: timeouts are
//! measured against the monotonic clock, independent of reference-signal
//! health.

use std::fmt;

use crate::discipline::PiDiscipline;
use crate::edge::{EdgeCapture, EdgeCell, EdgeConfig, EdgeEvent};
use crate::freq::{FreqConfig, FrequencyCounter};
use crate::source::SecondarySource;
use crate::timebase::{TimeBase, Timestamp};

/// The synchronization states.
///
/// The single source of truth for "is time valid" and "is time good enough
/// to publish"; consumed read-only by every downstream protocol server.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncState {
    /// Waiting for the primary oscillator to report lock.
    Init,
    /// Qualifying the reference signal and measured frequency.
    FreqCal,
    /// Waiting for the epoch to be set.
    Coarse,
    /// Running the discipline loop toward lock.
    Fine,
    /// Disciplined and settled; time is valid and published.
    Locked,
    /// Running on the last disciplined correction without a live reference.
    Holdover,
    /// No usable reference; time is not valid.
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Init => "Init",
            SyncState::FreqCal => "FreqCal",
            SyncState::Coarse => "Coarse",
            SyncState::Fine => "Fine",
            SyncState::Locked => "Locked",
            SyncState::Holdover => "Holdover",
            SyncState::Error => "Error",
        };
        f.write_str(name)
    }
}

/// State machine thresholds and timeouts.
///
/// The holdover windows mirror long-standing field practice rather than a
/// derived bound; they are configuration, not invariants.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// Seconds to wait in `Init` for primary-oscillator lock before `Error`.
    pub init_timeout_s: f64,
    /// Validated edges required to leave `FreqCal`.
    pub freqcal_min_edges: u32,
    /// Seconds in `FreqCal` with no reference signal before `Error`.
    pub freqcal_timeout_s: f64,
    /// Sanity bound on the measured frequency deviation (ppb).
    pub freq_sanity_ppb: f64,
    /// Edges after which `Coarse` advances without an explicit epoch.
    pub coarse_auto_edges: u32,
    /// Minimum edges in `Fine` before `Locked` is reachable.
    pub fine_min_edges: u32,
    /// Holdover grace period during which time remains valid (seconds).
    pub holdover_grace_s: f64,
    /// Extended grace when the secondary source's pulse is available.
    pub holdover_secondary_grace_s: f64,
    /// Maximum holdover duration before `Error` (seconds).
    pub holdover_max_s: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            init_timeout_s: 600.0,
            freqcal_min_edges: 10,
            freqcal_timeout_s: 120.0,
            freq_sanity_ppb: 10_000.0,
            coarse_auto_edges: 10,
            fine_min_edges: 60,
            holdover_grace_s: 3_600.0,
            holdover_secondary_grace_s: 7_200.0,
            holdover_max_s: 86_400.0,
        }
    }
}

/// Per-poll status of the time sources, read from hardware/collaborators.
///
/// Never owned or mutated by the core; used only as transition input.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceStatus {
    /// Whether the primary oscillator reports lock.
    pub primary_locked: bool,
}

/// The inputs to one transition decision.
#[derive(Clone, Copy, Debug)]
pub struct SyncInputs {
    /// Primary oscillator lock.
    pub primary_locked: bool,
    /// An edge was observed within the last 2 nominal periods.
    pub signal_present: bool,
    /// Signal present and the most recent edge passed validation.
    pub pulse_ok: bool,
    /// The discipline loop reports lock.
    pub discipline_locked: bool,
    /// Filtered frequency deviation, if any measurement was accepted.
    pub freq_ppb: Option<f64>,
    /// The epoch has been set.
    pub epoch_set: bool,
    /// The secondary source's pulse is available as a coarse backup.
    pub secondary_pps: bool,
    /// Validated edges since entering the current state.
    pub edges_in_state: u32,
    /// Wall-clock seconds since entering the current state.
    pub seconds_in_state: f64,
}

/// The outcome of a transition decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    /// State to move to (equal to the current state for a no-op).
    pub next: SyncState,
    /// The discipline loop must be reset on entry.
    pub reset_discipline: bool,
    /// The frequency counter baseline must be discarded on entry.
    pub reset_frequency: bool,
}

impl Transition {
    fn stay(state: SyncState) -> Self {
        Transition {
            next: state,
            reset_discipline: false,
            reset_frequency: false,
        }
    }

    fn to(next: SyncState) -> Self {
        Transition {
            next,
            reset_discipline: false,
            reset_frequency: false,
        }
    }
}

/// Pure transition function: `(state, inputs) -> transition`.
///
/// No side effects; the caller applies resets and logs the change.
pub fn transition(state: SyncState, inputs: &SyncInputs, config: &SyncConfig) -> Transition {
    match state {
        SyncState::Init => {
            if inputs.primary_locked {
                Transition {
                    next: SyncState::FreqCal,
                    reset_discipline: false,
                    reset_frequency: true,
                }
            } else if inputs.seconds_in_state >= config.init_timeout_s {
                Transition::to(SyncState::Error)
            } else {
                Transition::stay(state)
            }
        }
        SyncState::FreqCal => {
            if !inputs.signal_present && inputs.seconds_in_state >= config.freqcal_timeout_s {
                Transition::to(SyncState::Error)
            } else if inputs.signal_present
                && inputs.edges_in_state >= config.freqcal_min_edges
                && inputs
                    .freq_ppb
                    .is_some_and(|ppb| ppb.abs() <= config.freq_sanity_ppb)
            {
                Transition::to(SyncState::Coarse)
            } else {
                Transition::stay(state)
            }
        }
        SyncState::Coarse => {
            if !inputs.pulse_ok {
                Transition::to(SyncState::Error)
            } else if inputs.epoch_set || inputs.edges_in_state >= config.coarse_auto_edges {
                Transition::to(SyncState::Fine)
            } else {
                Transition::stay(state)
            }
        }
        SyncState::Fine => {
            if !inputs.primary_locked || !inputs.pulse_ok {
                Transition::to(SyncState::Holdover)
            } else if inputs.discipline_locked && inputs.edges_in_state >= config.fine_min_edges {
                Transition::to(SyncState::Locked)
            } else {
                Transition::stay(state)
            }
        }
        SyncState::Locked => {
            if !inputs.primary_locked || !inputs.pulse_ok {
                Transition::to(SyncState::Holdover)
            } else if !inputs.discipline_locked {
                // Discipline lock lost with the pulse still healthy.
                Transition::to(SyncState::Fine)
            } else {
                Transition::stay(state)
            }
        }
        SyncState::Holdover => {
            if inputs.primary_locked && inputs.pulse_ok {
                Transition::to(SyncState::Fine)
            } else if inputs.seconds_in_state >= config.holdover_max_s {
                Transition::to(SyncState::Error)
            } else {
                Transition::stay(state)
            }
        }
        SyncState::Error => {
            if inputs.primary_locked && inputs.pulse_ok {
                Transition {
                    next: SyncState::FreqCal,
                    reset_discipline: true,
                    reset_frequency: true,
                }
            } else {
                Transition::stay(state)
            }
        }
    }
}

/// The top-level synchronization coordinator.
///
/// Owns all five core components; polled at a bounded, fixed cadence from
/// the cooperative loop. Downstream consumers use only the published
/// accessors, which never mutate state.
pub struct SyncManager {
    config: SyncConfig,
    state: SyncState,
    state_entered_us: Option<u64>,
    edges_in_state: u32,
    edge: EdgeCapture,
    freq: FrequencyCounter,
    discipline: PiDiscipline,
    timebase: TimeBase,
    secondary: Option<Box<dyn SecondarySource>>,
    last_cycles: Option<u64>,
    last_edge_valid: bool,
    last_offset_ns: i64,
    primary_locked: bool,
    time_valid: bool,
    holdover_expired_warned: bool,
    degraded_secondary: bool,
}

impl SyncManager {
    /// Create a manager with default edge and frequency configurations.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_components(config, EdgeConfig::default(), FreqConfig::default())
    }

    /// Create a manager with explicit component configurations.
    pub fn with_components(config: SyncConfig, edge: EdgeConfig, freq: FreqConfig) -> Self {
        SyncManager {
            config,
            state: SyncState::Init,
            state_entered_us: None,
            edges_in_state: 0,
            edge: EdgeCapture::new(edge),
            freq: FrequencyCounter::new(freq),
            discipline: PiDiscipline::new(),
            timebase: TimeBase::new(),
            secondary: None,
            last_cycles: None,
            last_edge_valid: false,
            last_offset_ns: 0,
            primary_locked: false,
            time_valid: false,
            holdover_expired_warned: false,
            degraded_secondary: false,
        }
    }

    /// Attach a secondary time source.
    pub fn set_secondary(&mut self, source: Box<dyn SecondarySource>) {
        log::info!("secondary source attached: {}", source.description());
        self.secondary = Some(source);
    }

    /// Handle to the edge snapshot cell for the interrupt-context producer.
    pub fn edge_cell(&self) -> std::sync::Arc<EdgeCell> {
        self.edge.cell()
    }

    /// Run one poll cycle.
    ///
    /// Consumes at most one new edge (detected by sequence-number
    /// comparison), feeds the measurement chain, and evaluates the state
    /// machine. Must be called at a fixed cadence faster than the nominal
    /// pulse period so no edge is skipped.
    pub fn poll(&mut self, now_us: u64, status: &SourceStatus) {
        let entered_us = *self.state_entered_us.get_or_insert(now_us);
        self.primary_locked = status.primary_locked;

        if let Some(event) = self.edge.poll() {
            self.handle_edge(&event);
        }

        // Stage the secondary source's time for cross-source handoff while
        // the epoch is unset; the time base applies it on the next edge.
        let (secondary_time_valid, secondary_pps) = match &self.secondary {
            Some(src) => {
                let time_valid = src.has_valid_time();
                let pps = src.pps_valid();
                if time_valid && pps && !self.timebase.is_epoch_set() {
                    self.timebase.stage_time(src.get_unix_time());
                }
                (time_valid, pps)
            }
            None => (false, false),
        };

        let seconds_in_state = now_us.saturating_sub(entered_us) as f64 / 1e6;
        let inputs = SyncInputs {
            primary_locked: self.primary_locked,
            signal_present: self.edge.signal_present(now_us),
            pulse_ok: self.edge.signal_present(now_us) && self.last_edge_valid,
            discipline_locked: self.discipline.is_locked(),
            freq_ppb: self.freq.filtered_ppb(),
            epoch_set: self.timebase.is_epoch_set(),
            secondary_pps,
            edges_in_state: self.edges_in_state,
            seconds_in_state,
        };

        self.update_validity(&inputs);
        self.update_degraded(secondary_time_valid, secondary_pps);

        let t = transition(self.state, &inputs, &self.config);
        if t.next != self.state {
            self.apply_transition(t, now_us);
        }
    }

    /// Consume one edge event from the capture cell.
    fn handle_edge(&mut self, event: &EdgeEvent) {
        if event.valid {
            self.edges_in_state = self.edges_in_state.saturating_add(1);

            // Reciprocal frequency measurement over the validated period.
            if let (Some(prev_cycles), Some(period_us)) = (self.last_cycles, event.period_us) {
                let cycles = event.cycles.wrapping_sub(prev_cycles);
                self.freq.measure(cycles, period_us as f64 / 1e6);
            }

            // The validated edge advances the second.
            self.timebase.on_edge(event.timestamp_us);

            // Per-edge time offset: deviation of the captured period from
            // one nominal second (phase error accumulated per second).
            if let Some(period_us) = event.period_us {
                self.last_offset_ns = (period_us as i64 - 1_000_000) * 1_000;
                if matches!(self.state, SyncState::Fine | SyncState::Locked) {
                    self.discipline
                        .update(self.last_offset_ns, event.timestamp_us as f64 / 1e6);
                }
            }
        }
        self.last_cycles = Some(event.cycles);
        self.last_edge_valid = event.valid;
    }

    /// Compute "time valid" for this poll.
    fn update_validity(&mut self, inputs: &SyncInputs) {
        let valid = match self.state {
            SyncState::Locked => true,
            SyncState::Holdover => {
                let grace = if inputs.secondary_pps {
                    self.config.holdover_secondary_grace_s
                } else {
                    self.config.holdover_grace_s
                };
                let within = inputs.seconds_in_state <= grace;
                if !within && !self.holdover_expired_warned {
                    log::warn!(
                        "holdover grace expired after {:.0}s; time no longer valid",
                        inputs.seconds_in_state
                    );
                    self.holdover_expired_warned = true;
                }
                within
            }
            _ => false,
        };
        self.time_valid = valid;
    }

    /// Surface a secondary source usable as degraded service while in Error.
    fn update_degraded(&mut self, secondary_time_valid: bool, secondary_pps: bool) {
        let degraded =
            self.state == SyncState::Error && secondary_time_valid && secondary_pps;
        if degraded && !self.degraded_secondary {
            log::warn!("in Error with usable secondary source; degraded service available");
        }
        self.degraded_secondary = degraded;
    }

    /// Apply a state change: log, run resets, restart the per-state counters.
    fn apply_transition(&mut self, t: Transition, now_us: u64) {
        log::info!("sync state {} -> {}", self.state, t.next);
        if t.reset_discipline {
            self.discipline.reset();
        }
        if t.reset_frequency {
            self.freq.reset();
            self.last_cycles = None;
        }
        if t.next == SyncState::Holdover {
            log::warn!(
                "entering holdover on correction {:.1} ppb",
                self.discipline.correction_ppb()
            );
        }
        self.state = t.next;
        self.state_entered_us = Some(now_us);
        self.edges_in_state = 0;
        self.holdover_expired_warned = false;
    }

    /// Read the disciplined time at `now_us` (monotonic microseconds).
    pub fn time_at(&self, now_us: u64) -> Timestamp {
        self.timebase.now(now_us, self.discipline.correction_ppb())
    }

    /// Read the disciplined time using the system monotonic clock.
    pub fn get_current_time(&self) -> Timestamp {
        self.time_at(crate::clock::monotonic_micros())
    }

    /// Current synchronization state.
    pub fn get_sync_state(&self) -> SyncState {
        self.state
    }

    /// Whether published time is currently valid (as of the last poll).
    pub fn is_time_valid(&self) -> bool {
        self.time_valid
    }

    /// Whether the primary oscillator reported lock at the last poll.
    pub fn is_primary_locked(&self) -> bool {
        self.primary_locked
    }

    /// Filtered reference-oscillator deviation in ppb (0 before the first
    /// accepted measurement).
    pub fn get_frequency_offset_ppb(&self) -> f64 {
        self.freq.filtered_ppb().unwrap_or(0.0)
    }

    /// The most recent per-edge time offset fed to the discipline loop,
    /// nanoseconds.
    pub fn get_time_offset_ns(&self) -> i64 {
        self.last_offset_ns
    }

    /// Clear the explicit-epoch flag and any pending secondary-source time,
    /// forcing re-acquisition on the next edge. Idempotent.
    pub fn force_resync(&mut self) {
        log::info!("force_resync: clearing epoch and staged time");
        self.timebase.clear_epoch();
    }

    /// Step the epoch and reset the discipline loop.
    ///
    /// The reset is mandatory across a discontinuity, so the manager pairs
    /// the two rather than trusting callers to.
    pub fn set_time(&mut self, unix_secs: u32) {
        self.timebase.set_time(unix_secs);
        self.discipline.reset();
    }

    /// Whether a usable secondary source is available while in `Error`.
    pub fn degraded_secondary_available(&self) -> bool {
        self.degraded_secondary
    }

    /// Elapsed time running on the stored correction, seconds.
    ///
    /// `Some` only while in `Holdover`; lets operators compare against the
    /// grace windows before trusting published time.
    pub fn holdover_elapsed_s(&self, now_us: u64) -> Option<f64> {
        if self.state != SyncState::Holdover {
            return None;
        }
        self.state_entered_us
            .map(|entered| now_us.saturating_sub(entered) as f64 / 1e6)
    }

    /// Validated edges since entering the current state.
    pub fn edges_in_state(&self) -> u32 {
        self.edges_in_state
    }

    /// Pulse jitter from the edge history, if enough samples exist.
    pub fn pulse_jitter_us(&self) -> Option<f64> {
        self.edge.jitter_us()
    }

    /// Offset stability (Allan deviation) at averaging factor `m`.
    pub fn allan_deviation(&self, m: usize) -> Option<f64> {
        self.discipline.allan_deviation(m)
    }

    /// Count of edges rejected by period validation.
    pub fn invalid_edges(&self) -> u64 {
        self.edge.invalid_edges()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> SyncInputs {
        SyncInputs {
            primary_locked: false,
            signal_present: false,
            pulse_ok: false,
            discipline_locked: false,
            freq_ppb: None,
            epoch_set: false,
            secondary_pps: false,
            edges_in_state: 0,
            seconds_in_state: 0.0,
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::default()
    }

    #[test]
    fn test_init_waits_for_primary_lock() {
        let t = transition(SyncState::Init, &inputs(), &config());
        assert_eq!(t.next, SyncState::Init);
    }

    #[test]
    fn test_init_to_freqcal_on_lock() {
        let mut i = inputs();
        i.primary_locked = true;
        let t = transition(SyncState::Init, &i, &config());
        assert_eq!(t.next, SyncState::FreqCal);
        assert!(t.reset_frequency);
    }

    #[test]
    fn test_init_timeout_to_error() {
        let mut i = inputs();
        i.seconds_in_state = 600.0;
        let t = transition(SyncState::Init, &i, &config());
        assert_eq!(t.next, SyncState::Error);
    }

    #[test]
    fn test_init_just_before_timeout_stays() {
        let mut i = inputs();
        i.seconds_in_state = 599.0;
        let t = transition(SyncState::Init, &i, &config());
        assert_eq!(t.next, SyncState::Init);
    }

    #[test]
    fn test_freqcal_requires_edges_and_sane_frequency() {
        let mut i = inputs();
        i.signal_present = true;
        i.edges_in_state = 10;

        i.freq_ppb = None;
        assert_eq!(transition(SyncState::FreqCal, &i, &config()).next, SyncState::FreqCal);

        i.freq_ppb = Some(50_000.0);
        assert_eq!(transition(SyncState::FreqCal, &i, &config()).next, SyncState::FreqCal);

        i.freq_ppb = Some(100.0);
        assert_eq!(transition(SyncState::FreqCal, &i, &config()).next, SyncState::Coarse);
    }

    #[test]
    fn test_freqcal_no_signal_timeout() {
        let mut i = inputs();
        i.seconds_in_state = 120.0;
        let t = transition(SyncState::FreqCal, &i, &config());
        assert_eq!(t.next, SyncState::Error);
    }

    #[test]
    fn test_coarse_advances_on_epoch_or_edges() {
        let mut i = inputs();
        i.pulse_ok = true;

        i.epoch_set = true;
        assert_eq!(transition(SyncState::Coarse, &i, &config()).next, SyncState::Fine);

        i.epoch_set = false;
        i.edges_in_state = 10;
        assert_eq!(transition(SyncState::Coarse, &i, &config()).next, SyncState::Fine);
    }

    #[test]
    fn test_coarse_pulse_loss_to_error() {
        let mut i = inputs();
        i.pulse_ok = false;
        i.epoch_set = true;
        assert_eq!(transition(SyncState::Coarse, &i, &config()).next, SyncState::Error);
    }

    #[test]
    fn test_fine_to_locked_needs_both_conditions() {
        let mut i = inputs();
        i.primary_locked = true;
        i.pulse_ok = true;
        i.discipline_locked = true;
        i.edges_in_state = 59;
        assert_eq!(transition(SyncState::Fine, &i, &config()).next, SyncState::Fine);

        i.edges_in_state = 60;
        assert_eq!(transition(SyncState::Fine, &i, &config()).next, SyncState::Locked);

        i.discipline_locked = false;
        assert_eq!(transition(SyncState::Fine, &i, &config()).next, SyncState::Fine);
    }

    #[test]
    fn test_fine_loss_to_holdover() {
        let mut i = inputs();
        i.primary_locked = false;
        i.pulse_ok = true;
        assert_eq!(transition(SyncState::Fine, &i, &config()).next, SyncState::Holdover);

        i.primary_locked = true;
        i.pulse_ok = false;
        assert_eq!(transition(SyncState::Fine, &i, &config()).next, SyncState::Holdover);
    }

    #[test]
    fn test_locked_pulse_loss_to_holdover() {
        let mut i = inputs();
        i.primary_locked = true;
        i.pulse_ok = false;
        i.discipline_locked = true;
        assert_eq!(transition(SyncState::Locked, &i, &config()).next, SyncState::Holdover);
    }

    #[test]
    fn test_locked_discipline_loss_to_fine() {
        let mut i = inputs();
        i.primary_locked = true;
        i.pulse_ok = true;
        i.discipline_locked = false;
        assert_eq!(transition(SyncState::Locked, &i, &config()).next, SyncState::Fine);
    }

    #[test]
    fn test_holdover_recovery_to_fine() {
        let mut i = inputs();
        i.primary_locked = true;
        i.pulse_ok = true;
        assert_eq!(transition(SyncState::Holdover, &i, &config()).next, SyncState::Fine);
    }

    #[test]
    fn test_holdover_max_to_error() {
        let mut i = inputs();
        i.seconds_in_state = 86_400.0;
        assert_eq!(transition(SyncState::Holdover, &i, &config()).next, SyncState::Error);
    }

    #[test]
    fn test_error_recovery_resets_and_recalibrates() {
        let mut i = inputs();
        i.primary_locked = true;
        i.pulse_ok = true;
        let t = transition(SyncState::Error, &i, &config());
        assert_eq!(t.next, SyncState::FreqCal);
        assert!(t.reset_discipline);
        assert!(t.reset_frequency);
    }

    #[test]
    fn test_redundant_transition_is_noop() {
        let i = inputs();
        for state in [
            SyncState::Init,
            SyncState::FreqCal,
            SyncState::Error,
        ] {
            let t = transition(state, &i, &config());
            assert_eq!(t.next, state);
            assert!(!t.reset_discipline);
            assert!(!t.reset_frequency);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(SyncState::FreqCal.to_string(), "FreqCal");
        assert_eq!(SyncState::Holdover.to_string(), "Holdover");
    }
}
