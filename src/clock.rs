//! A monotonically increasing nanosecond-resolution clock, shared by
//! every id the engine mints in this process — tradable ids and
//! connection ids alike — so that two ids minted within the same
//! wall-clock nanosecond still order correctly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

pub fn next_monotonic_timestamp() -> u64 {
    let wall_clock_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    loop {
        let previous = LAST_TIMESTAMP.load(Ordering::SeqCst);
        let next = if wall_clock_ns > previous {
            wall_clock_ns
        } else {
            previous + 1
        };
        if LAST_TIMESTAMP
            .compare_exchange(previous, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return next;
        }
    }
}
