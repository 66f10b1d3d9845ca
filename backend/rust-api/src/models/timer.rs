use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative remaining time at `as_of`.
///
/// Clients use it to correct a locally ticking countdown. It is never
/// assumed accurate between snapshots.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub as_of: DateTime<Utc>,
}

impl TimerSnapshot {
    /// Builds a snapshot, clamping `remaining` into `0..=total`.
    pub fn new(remaining_seconds: u32, total_seconds: u32, as_of: DateTime<Utc>) -> Self {
        Self {
            remaining_seconds: remaining_seconds.min(total_seconds),
            total_seconds,
            as_of,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_seconds == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_exceeds_total() {
        let snapshot = TimerSnapshot::new(90, 60, Utc::now());
        assert_eq!(snapshot.remaining_seconds, 60);
        assert!(!snapshot.is_expired());
        assert!(TimerSnapshot::new(0, 60, Utc::now()).is_expired());
    }

    #[test]
    fn serializes_camel_case() {
        let snapshot = TimerSnapshot::new(5, 10, Utc::now());
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["remainingSeconds"], 5);
        assert_eq!(json["totalSeconds"], 10);
        assert!(json["asOf"].is_string());
    }
}
