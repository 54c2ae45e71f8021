// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

/*!
Stratum 1 time reference core.

Locks a local software clock to an external high-stability oscillator and a
1-pulse-per-second (PPS) reference edge, disciplining it to microsecond-level
accuracy for distribution to downstream time protocol servers.

The core is built from five cooperating components:

- [`edge`] — hardware edge capture with period validation and jitter
  statistics, fed from interrupt context through a lock-free snapshot cell.
- [`freq`] — a reciprocal frequency counter measuring the reference
  oscillator's deviation from nominal in parts per billion (ppb).
- [`discipline`] — a proportional-integral loop converting per-edge time
  offsets into a frequency correction, with hysteretic lock detection.
- [`timebase`] — the authoritative seconds counter with sub-second
  interpolation and an NTP-era (1900-based) published representation.
- [`sync`] — the top-level state machine arbitrating between the primary
  oscillator, a secondary satellite-derived time source, and holdover.

Downstream consumers (NTP/PTP servers, timecode encoders, pulse outputs) read
only the published [`Timestamp`](timebase::Timestamp) and
[`SyncState`](sync::SyncState) snapshot; they never mutate core state.

# Example

```
use gpsdo_core::sync::{SourceStatus, SyncConfig, SyncManager};

let mut manager = SyncManager::new(SyncConfig::default());
let cell = manager.edge_cell();

// Interrupt context: capture a PPS edge (timestamp in µs, cycle counter).
cell.capture(1_000_000, 10_000_000);

// Poll loop context: run the state machine at a fixed cadence.
manager.poll(1_000_100, &SourceStatus { primary_locked: true });
println!("state: {}", manager.get_sync_state());
```
*/

#![warn(missing_docs)]

/// Monotonic microsecond time source for edge timestamping and poll cadence.
pub mod clock;

/// PPS edge capture: interrupt-safe snapshot cell, period validation, and
/// jitter statistics.
pub mod edge;

/// Reciprocal frequency counter with exponential filtering and a raw-line
/// signal-presence probe.
pub mod freq;

/// Proportional-integral time discipline loop with lock hysteresis and
/// Allan-deviation stability statistics.
pub mod discipline;

/// Authoritative seconds counter, sub-second interpolation, and the
/// published 1900-epoch timestamp representation.
pub mod timebase;

/// Secondary time source abstraction (satellite receiver or equivalent).
pub mod source;

/// Top-level synchronization state machine and published time/status API.
pub mod sync;

pub use discipline::PiDiscipline;
pub use edge::{EdgeCapture, EdgeCell, EdgeEvent};
pub use freq::{FrequencyCounter, FrequencyMeasurement};
pub use source::SecondarySource;
pub use sync::{SourceStatus, SyncConfig, SyncManager, SyncState};
pub use timebase::{TimeBase, Timestamp};
