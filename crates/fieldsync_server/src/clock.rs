//! Server time source.
//!
//! Row `updated_at` values and pull checkpoints come from the same clock.
//! Readings are strictly increasing so a row written in the same millisecond
//! as a pull snapshot is never hidden from the next pull.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A source of server timestamps.
pub trait Clock: Send + Sync {
    /// Returns a timestamp strictly greater than any previous reading.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock truncated to milliseconds and forced monotonic.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl SystemClock {
    /// Creates a system clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let now = Utc::now();
        // Timestamps travel with millisecond precision.
        let wall = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let next = match *last {
            Some(prev) if wall <= prev => prev + Duration::milliseconds(1),
            _ => wall,
        };
        *last = Some(next);
        next
    }
}

/// A clock that only moves when told to, one millisecond per reading.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    /// Reads the current time without ticking.
    pub fn peek(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock();
        *current += Duration::milliseconds(1);
        *current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn system_clock_is_strictly_increasing() {
        let clock = SystemClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn manual_clock_ticks() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start + Duration::milliseconds(1));
        clock.advance(Duration::seconds(10));
        assert_eq!(clock.peek(), start + Duration::milliseconds(10_001));
    }
}
