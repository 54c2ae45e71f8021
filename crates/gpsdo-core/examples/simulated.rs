// Simulated GPS-Disciplined Oscillator
//
// Drives the sync manager with a synthetic 1PPS signal and a synthetic
// 10 MHz cycle counter, walking the state machine from cold start to lock.
// Edges arrive once per simulated second; a short outage partway through
// demonstrates the holdover path and re-lock.
//
// Usage:
//   cargo run -p gpsdo_core --example simulated
//
// For real hardware, feed EdgeCell::capture() from your PPS interrupt
// handler and call SyncManager::poll() from your main loop instead.

use chrono::DateTime;
use gpsdo_core::{SourceStatus, SyncConfig, SyncManager, SyncState};

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("═══════════════════════════════════════════════════════");
    println!("Simulated GPS-Disciplined Oscillator");
    println!("═══════════════════════════════════════════════════════");
    println!();
    println!("PPS period:   1 000 000 µs (simulated)");
    println!("Oscillator:   10 MHz nominal (simulated)");
    println!("Outage:       5 s, injected at t=100 s");
    println!();

    let mut manager = SyncManager::new(SyncConfig::default());
    let cell = manager.edge_cell();
    // The simulated oscillator is always locked.
    let status = SourceStatus {
        primary_locked: true,
    };

    let mut now_us: u64 = 0;
    let mut cycles: u64 = 0;
    let mut last_state = manager.get_sync_state();

    // GPS almanac says it is this Unix second at startup.
    manager.set_time(1_767_225_600);

    for second in 0..180u64 {
        now_us += 1_000_000;
        cycles += 10_000_000;

        // Drop the pulse during the outage window; the counter keeps running.
        let outage = (100..105).contains(&second);
        if !outage {
            cell.capture(now_us, cycles);
        }

        manager.poll(now_us + 100, &status);

        let state = manager.get_sync_state();
        if state != last_state {
            println!(
                "[t={:>3}s] {} -> {}  (freq offset: {:+.1} ppb)",
                second,
                last_state,
                state,
                manager.get_frequency_offset_ppb()
            );
            last_state = state;
        }

        if state == SyncState::Locked && second % 30 == 0 {
            let ts = manager.time_at(now_us + 500_000);
            let when = DateTime::from_timestamp(ts.unix_seconds() as i64, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "invalid".to_string());
            println!(
                "[t={:>3}s] disciplined time: {} +{:.6}s  jitter: {:?} µs",
                second,
                when,
                ts.subsec_seconds(),
                manager.pulse_jitter_us()
            );
        }
    }

    println!();
    println!("═══════════════════════════════════════════════════════");
    println!("Final state:        {}", manager.get_sync_state());
    println!("Time valid:         {}", manager.is_time_valid());
    println!("Frequency offset:   {:+.1} ppb", manager.get_frequency_offset_ppb());
    println!("Last pulse offset:  {} ns", manager.get_time_offset_ns());
    println!("Invalid edges:      {}", manager.invalid_edges());
    if let Some(adev) = manager.allan_deviation(1) {
        println!("Allan deviation:    {:.3e} @ tau=1s", adev);
    }
    println!("═══════════════════════════════════════════════════════");
}
