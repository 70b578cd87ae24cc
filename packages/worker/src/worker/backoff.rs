//! Per-user exponential-backoff failure memory.
//!
//! In-memory and per-instance: a replica only throttles users it has itself
//! failed on. An entry exists iff the user's last observed outcome on this
//! instance was a failure.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::BACKOFF_CAP_SECS;

#[derive(Debug, Clone, Copy)]
pub struct UserFailureInfo {
    pub consecutive_failures: u32,
    pub last_failure_time: DateTime<Utc>,
    pub next_retry_time: DateTime<Utc>,
}

/// Backoff delay for a failure streak: 2^k seconds, capped at one hour.
pub fn backoff_delay(consecutive_failures: u32) -> Duration {
    let secs = 1u64 << consecutive_failures.min(12);
    Duration::seconds(secs.min(BACKOFF_CAP_SECS) as i64)
}

#[derive(Default)]
pub struct UserFailures {
    map: Mutex<HashMap<Uuid, UserFailureInfo>>,
}

impl UserFailures {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, UserFailureInfo>> {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bump the failure streak and schedule the next retry.
    pub fn record_failure_at(&self, user_id: Uuid, now: DateTime<Utc>) -> UserFailureInfo {
        let mut map = self.lock();
        let consecutive = map
            .get(&user_id)
            .map(|info| info.consecutive_failures + 1)
            .unwrap_or(1);
        let info = UserFailureInfo {
            consecutive_failures: consecutive,
            last_failure_time: now,
            next_retry_time: now + backoff_delay(consecutive),
        };
        map.insert(user_id, info);
        info
    }

    /// First success deletes the entry entirely.
    pub fn record_success(&self, user_id: Uuid) {
        self.lock().remove(&user_id);
    }

    pub fn should_skip_at(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.lock()
            .get(&user_id)
            .map(|info| now < info.next_retry_time)
            .unwrap_or(false)
    }

    pub fn get(&self, user_id: Uuid) -> Option<UserFailureInfo> {
        self.lock().get(&user_id).copied()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        "2025-01-15T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn delay_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::seconds(2));
        assert_eq!(backoff_delay(2), Duration::seconds(4));
        assert_eq!(backoff_delay(3), Duration::seconds(8));
        assert_eq!(backoff_delay(11), Duration::seconds(2048));
        // 2^12 = 4096 exceeds the cap
        assert_eq!(backoff_delay(12), Duration::seconds(3600));
        assert_eq!(backoff_delay(40), Duration::seconds(3600));
    }

    #[test]
    fn retry_offset_matches_streak() {
        let failures = UserFailures::default();
        let user = Uuid::new_v4();

        for (elapsed, expected_offset) in [(0, 2), (2, 4), (6, 8)] {
            let now = t0() + Duration::seconds(elapsed);
            let info = failures.record_failure_at(user, now);
            assert_eq!(
                info.next_retry_time - info.last_failure_time,
                Duration::seconds(expected_offset)
            );
        }

        let info = failures.get(user).unwrap();
        assert_eq!(info.consecutive_failures, 3);

        // Third failure at t0+6s backs off 8s: gated at +10s, open at +14s.
        assert!(failures.should_skip_at(user, t0() + Duration::seconds(10)));
        assert!(!failures.should_skip_at(user, t0() + Duration::seconds(14)));
    }

    #[test]
    fn success_removes_entry() {
        let failures = UserFailures::default();
        let user = Uuid::new_v4();

        failures.record_failure_at(user, t0());
        assert!(failures.get(user).is_some());

        failures.record_success(user);
        assert!(failures.get(user).is_none());
        assert!(!failures.should_skip_at(user, t0()));
    }

    #[test]
    fn unknown_user_never_skipped() {
        let failures = UserFailures::default();
        assert!(!failures.should_skip_at(Uuid::new_v4(), t0()));
    }
}
