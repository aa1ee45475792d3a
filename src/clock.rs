use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, Utc};

/// Source of "now" for the job store.
///
/// Timestamps are naive UTC, matching the `timestamp` columns of the `job`
/// table.
#[derive(Clone, Debug, Default)]
pub enum Clock {
    /// Wall clock
    #[default]
    System,
    /// Frozen clock that only moves when advanced, for tests
    Manual(Arc<Mutex<NaiveDateTime>>),
}

impl Clock {
    #[must_use]
    pub fn manual(start: NaiveDateTime) -> Self {
        Self::Manual(Arc::new(Mutex::new(start)))
    }

    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Self::System => Utc::now().naive_utc(),
            Self::Manual(now) => *now.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Move a manual clock forward. No-op for the system clock.
    pub fn advance(&self, by: chrono::Duration) {
        if let Self::Manual(now) = self {
            let mut now = now.lock().unwrap_or_else(PoisonError::into_inner);
            *now += by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_only_moves_when_advanced() {
        let start = NaiveDateTime::parse_from_str("2025-01-01 12:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let clock = Clock::manual(start);

        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_clones_share_manual_time() {
        let clock = Clock::manual(Utc::now().naive_utc());
        let other = clock.clone();

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn test_system_clock_ignores_advance() {
        let clock = Clock::System;
        let before = Utc::now().naive_utc();

        clock.advance(chrono::Duration::days(1));
        assert!(clock.now() < before + chrono::Duration::hours(1));
    }
}
