// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Proportional-integral time discipline loop.
//!
//! Consumes one nanosecond time offset per validated reference edge and
//! produces a frequency correction in parts per billion. The integral term
//! is hard-clamped to bound windup, and lock detection is hysteretic: many
//! consecutive small offsets are required to declare lock, while a single
//! large offset clears it immediately.
//!
//! On lock acquisition both gains are halved (slow regime) for stability; on
//! lock loss the fast gains are restored. After any intentional time step
//! the caller must invoke [`reset()`](PiDiscipline::reset), since the
//! accumulated integral term is meaningless across a discontinuity.

/// Offsets below this magnitude count toward lock (nanoseconds).
pub const LOCK_THRESHOLD_NS: i64 = 1_000;

/// Offsets above this magnitude clear lock immediately (nanoseconds).
pub const UNLOCK_THRESHOLD_NS: i64 = 10_000;

/// Consecutive good samples required to declare lock.
pub const LOCK_SAMPLES: u32 = 60;

/// Hard clamp on the integral term, seconds/second (±100 ppb).
pub const INTEGRAL_CLAMP: f64 = 100e-9;

/// Fast-regime proportional gain (≈2 s time constant at 1 Hz updates).
const KP_FAST: f64 = 0.5;

/// Fast-regime integral gain (≈20 s time constant at 1 Hz updates).
const KI_FAST: f64 = 0.05;

/// Update intervals beyond this are implausible; fall back to 1 s.
const MAX_INTERVAL_S: f64 = 16.0;

/// Number of recent offsets retained for stability statistics.
pub const OFFSET_HISTORY_SIZE: usize = 128;

/// PI controller state.
///
/// Mutated once per offset update by [`update()`](PiDiscipline::update);
/// read-only everywhere else.
#[derive(Debug)]
pub struct PiDiscipline {
    kp: f64,
    ki: f64,
    /// Integral accumulator, seconds/second, clamped to ±[`INTEGRAL_CLAMP`].
    integral: f64,
    correction_ppb: f64,
    good_samples: u32,
    locked: bool,
    last_update_s: Option<f64>,
    last_offset_ns: i64,
    offsets: [Option<i64>; OFFSET_HISTORY_SIZE],
    next_idx: usize,
}

impl PiDiscipline {
    /// Create a new discipline in the unlocked, fast-gain regime.
    pub fn new() -> Self {
        PiDiscipline {
            kp: KP_FAST,
            ki: KI_FAST,
            integral: 0.0,
            correction_ppb: 0.0,
            good_samples: 0,
            locked: false,
            last_update_s: None,
            last_offset_ns: 0,
            offsets: [None; OFFSET_HISTORY_SIZE],
            next_idx: 0,
        }
    }

    /// Feed the offset measured at a validated reference edge.
    ///
    /// * `offset_ns` — time offset in nanoseconds (positive = local clock
    ///   behind the reference).
    /// * `now_s` — monotonic time of this update, seconds.
    ///
    /// Called exactly once per validated edge. Returns the combined
    /// correction in ppb.
    pub fn update(&mut self, offset_ns: i64, now_s: f64) -> f64 {
        let dt = match self.last_update_s {
            Some(prev) => {
                let dt = now_s - prev;
                if dt <= 0.0 || dt > MAX_INTERVAL_S {
                    1.0
                } else {
                    dt
                }
            }
            None => 1.0,
        };
        self.last_update_s = Some(now_s);
        self.last_offset_ns = offset_ns;

        let offset_s = offset_ns as f64 * 1e-9;
        let proportional = self.kp * offset_s;
        self.integral = (self.integral + self.ki * offset_s * dt)
            .clamp(-INTEGRAL_CLAMP, INTEGRAL_CLAMP);
        self.correction_ppb = (proportional + self.integral) * 1e9;

        self.offsets[self.next_idx] = Some(offset_ns);
        self.next_idx = (self.next_idx + 1) % OFFSET_HISTORY_SIZE;

        self.track_lock(offset_ns);
        self.correction_ppb
    }

    /// Hysteretic lock tracking.
    fn track_lock(&mut self, offset_ns: i64) {
        if offset_ns.abs() > UNLOCK_THRESHOLD_NS {
            if self.locked {
                log::warn!("discipline lock lost: offset {offset_ns}ns");
            }
            self.locked = false;
            self.good_samples = 0;
            self.kp = KP_FAST;
            self.ki = KI_FAST;
            return;
        }

        if offset_ns.abs() < LOCK_THRESHOLD_NS {
            self.good_samples = self.good_samples.saturating_add(1);
        } else {
            self.good_samples = 0;
        }

        if !self.locked && self.good_samples >= LOCK_SAMPLES {
            self.locked = true;
            // Slow regime: halve both gains once settled.
            self.kp = KP_FAST / 2.0;
            self.ki = KI_FAST / 2.0;
            log::info!("discipline locked after {} good samples", self.good_samples);
        }
    }

    /// Zero the integral term and lock counters, restoring fast gains.
    ///
    /// Idempotent and cheap; call after any intentional time step. The
    /// offset history is retained for statistics.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.correction_ppb = 0.0;
        self.good_samples = 0;
        self.locked = false;
        self.kp = KP_FAST;
        self.ki = KI_FAST;
        self.last_update_s = None;
    }

    /// Current combined correction, parts per billion.
    pub fn correction_ppb(&self) -> f64 {
        self.correction_ppb
    }

    /// Current integral term, parts per billion.
    pub fn integral_ppb(&self) -> f64 {
        self.integral * 1e9
    }

    /// Whether the loop has declared lock.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Consecutive good samples toward (or since) lock.
    pub fn good_samples(&self) -> u32 {
        self.good_samples
    }

    /// The most recent offset fed to the loop, nanoseconds.
    pub fn last_offset_ns(&self) -> i64 {
        self.last_offset_ns
    }

    /// Allan deviation of the retained offsets at averaging factor `m`
    /// (tau = `m` edge intervals, nominally `m` seconds).
    ///
    /// Returns `None` when fewer than `2 * m + 1` samples are retained.
    pub fn allan_deviation(&self, m: usize) -> Option<f64> {
        if m == 0 {
            return None;
        }
        let xs: Vec<f64> = self.ordered_offsets();
        let n = xs.len();
        if n < 2 * m + 1 {
            return None;
        }
        let tau_s = m as f64;
        let mut sum = 0.0;
        let terms = n - 2 * m;
        for i in 0..terms {
            let d = xs[i + 2 * m] - 2.0 * xs[i + m] + xs[i];
            sum += d * d;
        }
        Some((sum / (2.0 * tau_s * tau_s * terms as f64)).sqrt())
    }

    /// Retained offsets in arrival order, converted to seconds.
    fn ordered_offsets(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(OFFSET_HISTORY_SIZE);
        for i in 0..OFFSET_HISTORY_SIZE {
            let idx = (self.next_idx + i) % OFFSET_HISTORY_SIZE;
            if let Some(ns) = self.offsets[idx] {
                out.push(ns as f64 * 1e-9);
            }
        }
        out
    }
}

impl Default for PiDiscipline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let d = PiDiscipline::new();
        assert!(!d.is_locked());
        assert_eq!(d.correction_ppb(), 0.0);
        assert_eq!(d.good_samples(), 0);
    }

    #[test]
    fn test_zero_offset_produces_zero_correction() {
        let mut d = PiDiscipline::new();
        let c = d.update(0, 0.0);
        assert_eq!(c, 0.0);
    }

    #[test]
    fn test_proportional_term() {
        let mut d = PiDiscipline::new();
        // 1000ns offset: P = 0.5 * 1e-6 s/s = 500 ppb, I = 0.05 * 1e-6 * 1s = 50 ppb.
        let c = d.update(1_000, 0.0);
        assert!((c - 550.0).abs() < 1.0, "correction={c}");
    }

    #[test]
    fn test_lock_after_consecutive_good_samples() {
        let mut d = PiDiscipline::new();
        for i in 0..LOCK_SAMPLES {
            assert!(!d.is_locked(), "locked early at sample {i}");
            d.update(0, i as f64);
        }
        assert!(d.is_locked());
    }

    #[test]
    fn test_large_offset_clears_lock_immediately() {
        let mut d = PiDiscipline::new();
        for i in 0..LOCK_SAMPLES {
            d.update(0, i as f64);
        }
        assert!(d.is_locked());

        d.update(15_000, LOCK_SAMPLES as f64);
        assert!(!d.is_locked());
        assert_eq!(d.good_samples(), 0);
    }

    #[test]
    fn test_marginal_offset_resets_counter_without_unlocking() {
        let mut d = PiDiscipline::new();
        for i in 0..LOCK_SAMPLES {
            d.update(0, i as f64);
        }
        assert!(d.is_locked());

        // 5µs: above the lock threshold but below the unlock threshold.
        d.update(5_000, LOCK_SAMPLES as f64);
        assert!(d.is_locked());
        assert_eq!(d.good_samples(), 0);
    }

    #[test]
    fn test_gains_halved_on_lock() {
        let mut d = PiDiscipline::new();
        let unlocked = d.update(500, 0.0);
        d.reset();

        for i in 0..LOCK_SAMPLES {
            d.update(0, i as f64);
        }
        assert!(d.is_locked());
        let locked = d.update(500, LOCK_SAMPLES as f64);
        // The proportional contribution is halved once locked.
        assert!(
            locked.abs() < unlocked.abs(),
            "locked={locked}, unlocked={unlocked}"
        );
    }

    #[test]
    fn test_integral_clamp() {
        let mut d = PiDiscipline::new();
        for i in 0..1_000 {
            d.update(1_000_000_000, i as f64);
            assert!(
                d.integral_ppb().abs() <= INTEGRAL_CLAMP * 1e9 + 1e-9,
                "integral escaped clamp: {}",
                d.integral_ppb()
            );
        }
    }

    #[test]
    fn test_implausible_interval_falls_back() {
        let mut d = PiDiscipline::new();
        d.update(100, 0.0);
        let i1 = d.integral_ppb();

        // 1000s gap would integrate 1000x too much; must fall back to 1s.
        d.update(100, 1_000.0);
        let i2 = d.integral_ppb();
        assert!(
            (i2 - 2.0 * i1).abs() < 1e-6,
            "i1={i1}, i2={i2}: fallback dt not applied"
        );

        // Negative elapsed likewise.
        d.update(100, 500.0);
        let i3 = d.integral_ppb();
        assert!((i3 - 3.0 * i1).abs() < 1e-6, "i2={i2}, i3={i3}");
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut d = PiDiscipline::new();
        for i in 0..LOCK_SAMPLES {
            d.update(500, i as f64);
        }
        d.reset();
        let after_one = (d.integral_ppb(), d.correction_ppb(), d.good_samples());
        d.reset();
        let after_two = (d.integral_ppb(), d.correction_ppb(), d.good_samples());
        assert_eq!(after_one, after_two);
        assert!(!d.is_locked());
        assert_eq!(d.integral_ppb(), 0.0);
    }

    #[test]
    fn test_allan_deviation_insufficient_samples() {
        let mut d = PiDiscipline::new();
        d.update(0, 0.0);
        d.update(0, 1.0);
        assert!(d.allan_deviation(1).is_none());
        assert!(d.allan_deviation(0).is_none());
    }

    #[test]
    fn test_allan_deviation_of_constant_offset_is_zero() {
        let mut d = PiDiscipline::new();
        for i in 0..32 {
            d.update(500, i as f64);
        }
        let adev = d.allan_deviation(1).unwrap();
        assert!(adev.abs() < 1e-15, "adev={adev}");
        let adev4 = d.allan_deviation(4).unwrap();
        assert!(adev4.abs() < 1e-15, "adev4={adev4}");
    }

    #[test]
    fn test_allan_deviation_detects_noise() {
        let mut d = PiDiscipline::new();
        for i in 0..64 {
            let offset = if i % 2 == 0 { 400 } else { -400 };
            d.update(offset, i as f64);
        }
        let adev = d.allan_deviation(1).unwrap();
        assert!(adev > 1e-7, "adev={adev}");
    }

    #[test]
    fn test_history_wraps() {
        let mut d = PiDiscipline::new();
        for i in 0..(OFFSET_HISTORY_SIZE * 2) {
            d.update(100, i as f64);
        }
        // Still computable at several taus after wrap.
        assert!(d.allan_deviation(1).is_some());
        assert!(d.allan_deviation(16).is_some());
        assert!(d.allan_deviation(OFFSET_HISTORY_SIZE).is_none());
    }
}
