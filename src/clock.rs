//! Monotonic time source for activity tracking and heartbeat scheduling.
//!
//! Wraps `std::time::Instant` for ordering/elapsed comparisons and
//! `SystemTime` for the epoch-millisecond timestamps the wire protocol
//! carries on `ping`/`pong` frames.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A monotonic instant, used for `lastActivity` and uptime accounting.
pub type Timestamp = Instant;

/// Current monotonic instant.
pub fn now() -> Timestamp {
    Instant::now()
}

/// Current wall-clock time in milliseconds since the Unix epoch, for the
/// `timestamp` field on `ping`/`pong` wire messages.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_is_positive_and_monotonic_enough() {
        let a = epoch_millis();
        let b = epoch_millis();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn now_advances() {
        let a = now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = now();
        assert!(b >= a);
    }
}
