//! Process uptime tracking, consumed by logging/diagnostics and the public
//! server-list announcer.
//!
//! Grounded on `uptime.go`.

use std::time::{Duration, Instant};

use lazy_static::lazy_static;

lazy_static! {
    static ref START: Instant = Instant::now();
}

pub fn uptime() -> Duration {
    START.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_monotonically_non_negative() {
        let a = uptime();
        let b = uptime();
        assert!(b >= a);
    }
}
