use chrono::{DateTime, Utc};

use super::record::ContainerRecord;

/// Whether a record has passed its deadline. `now` is always passed in so
/// the predicate stays deterministic under test.
pub fn is_expired(record: &ContainerRecord, now: DateTime<Utc>) -> bool {
    now >= record.expires_at
}

/// A record only counts as running while the runtime reports it alive and
/// the deadline has not passed. An expired record is never running, no
/// matter what the runtime says.
pub fn is_running(record: &ContainerRecord, now: DateTime<Utc>, runtime_alive: bool) -> bool {
    runtime_alive && !is_expired(record, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::record::{Owner, RecordState};
    use chrono::TimeZone;

    fn record(created: i64, lifetime: i64) -> ContainerRecord {
        let created_at = Utc.timestamp_opt(created, 0).unwrap();
        ContainerRecord {
            container_id: "c0ffee".into(),
            challenge_id: 1,
            image: "challenge:latest".into(),
            owner: Owner::User(1),
            port_mappings: vec![],
            created_at,
            expires_at: created_at + chrono::Duration::seconds(lifetime),
            state: RecordState::Running,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn alive_until_the_deadline_second() {
        let rec = record(0, 600);
        assert!(is_running(&rec, at(599), true));
        assert!(!is_running(&rec, at(600), true));
        assert!(!is_running(&rec, at(601), true));
    }

    #[test]
    fn expired_record_never_runs_regardless_of_runtime() {
        let rec = record(0, 600);
        assert!(!is_running(&rec, at(600), true));
        assert!(!is_running(&rec, at(600), false));
    }

    #[test]
    fn dead_runtime_means_not_running_even_before_expiry() {
        let rec = record(0, 600);
        assert!(!is_running(&rec, at(10), false));
    }
}
