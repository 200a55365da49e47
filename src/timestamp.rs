use std::time::{Duration, SystemTime};
use libc::{clock_gettime, timespec, CLOCK_MONOTONIC_RAW};

pub fn monotonic_ns() -> u128 {
    unsafe {
        let mut ts: timespec = std::mem::zeroed();
        if clock_gettime(CLOCK_MONOTONIC_RAW, &mut ts) == 0 {
            (ts.tv_sec as u128) * 1_000_000_000 + (ts.tv_nsec as u128)
        } else {
            // fallback
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_secs(0));
            (now.as_secs() as u128) * 1_000_000_000 + (now.subsec_nanos() as u128)
        }
    }
}

/// Whole milliseconds elapsed since a `monotonic_ns` reading.
pub fn elapsed_ms(start_ns: u128) -> u128 {
    monotonic_ns().saturating_sub(start_ns) / 1_000_000
}

pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Wall clock used to timestamp probe failures.
pub trait Clock: Send {
    fn unix_seconds(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> i64 {
        unix_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
        assert_eq!(elapsed_ms(monotonic_ns() + 5_000_000_000), 0);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.unix_seconds() > 1_577_836_800);
    }
}
