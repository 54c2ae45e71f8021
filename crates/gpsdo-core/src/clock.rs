// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Monotonic microsecond time source.
//!
//! Edge timestamps and poll-loop cadence are measured against a free-running
//! monotonic clock that is never stepped by the discipline loop. On Linux
//! this reads `CLOCK_MONOTONIC_RAW`, which is additionally immune to NTP
//! frequency adjustment of the system clock; elsewhere it falls back to
//! [`std::time::Instant`] relative to process start.

/// Read the monotonic clock in microseconds.
///
/// The absolute value is meaningless; only differences between reads are
/// significant. The value is monotonically non-decreasing.
pub fn monotonic_micros() -> u64 {
    platform::micros()
}

#[cfg(target_os = "linux")]
mod platform {
    #![allow(unsafe_code)]

    pub(super) fn micros() -> u64 {
        let mut tp: libc::timespec = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
        if ret != 0 {
            // clock_gettime on a supported clock id cannot fail in practice;
            // fall back to the portable path rather than propagate.
            return super::fallback::micros();
        }
        tp.tv_sec as u64 * 1_000_000 + tp.tv_nsec as u64 / 1_000
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    pub(super) fn micros() -> u64 {
        super::fallback::micros()
    }
}

mod fallback {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();

    pub(super) fn micros() -> u64 {
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_micros() as u64
    }
}
