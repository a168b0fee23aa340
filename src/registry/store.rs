use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use super::clock;
use super::record::{ContainerRecord, Owner, RecordState};

/// A non-terminated record already exists for this (challenge, owner)
/// pair. Carries the existing record so the caller can reuse it.
#[derive(Debug, Error)]
#[error("a container already exists for challenge {} ({})", existing.challenge_id, existing.owner)]
pub struct ConflictError {
    pub existing: Box<ContainerRecord>,
}

#[derive(Debug, Error)]
#[error("no container record with id '{0}'")]
pub struct NotFoundError(pub String);

/// Optional filters for [`RecordStore::list`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFilter {
    pub challenge_id: Option<i64>,
    pub owner: Option<Owner>,
    pub state: Option<RecordState>,
}

/// In-memory table of container records, indexed by container id.
///
/// All mutations go through one mutex, which makes `create`'s
/// check-and-insert atomic: two concurrent starts for the same
/// (challenge, owner) pair cannot both insert a live record. Reads clone
/// records out, so callers always see a consistent snapshot.
#[derive(Default)]
pub struct RecordStore {
    records: Mutex<HashMap<String, ContainerRecord>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ContainerRecord>> {
        // A poisoned lock means a panic mid-mutation; individual inserts
        // and removes leave the map structurally sound, so recover.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomic check-and-insert. Fails if a non-terminated record already
    /// exists for the record's (challenge, owner) pair.
    pub fn create(&self, record: ContainerRecord) -> Result<(), ConflictError> {
        let mut records = self.lock();
        if let Some(existing) = records
            .values()
            .find(|r| r.pair() == record.pair() && r.state != RecordState::Terminated)
        {
            return Err(ConflictError {
                existing: Box::new(existing.clone()),
            });
        }
        records.insert(record.container_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, container_id: &str) -> Option<ContainerRecord> {
        self.lock().get(container_id).cloned()
    }

    /// Records matching the filter, ordered by creation time ascending
    /// (container id as tie-break) to match dashboard expectations.
    pub fn list(&self, filter: RecordFilter) -> Vec<ContainerRecord> {
        let records = self.lock();
        let mut result: Vec<ContainerRecord> = records
            .values()
            .filter(|r| filter.challenge_id.map_or(true, |c| r.challenge_id == c))
            .filter(|r| filter.owner.map_or(true, |o| r.owner == o))
            .filter(|r| filter.state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.container_id.cmp(&b.container_id))
        });
        result
    }

    pub fn delete(&self, container_id: &str) -> Result<ContainerRecord, NotFoundError> {
        self.lock()
            .remove(container_id)
            .ok_or_else(|| NotFoundError(container_id.to_string()))
    }

    /// The non-terminated record for a (challenge, owner) pair, if any.
    pub fn find_for_pair(&self, challenge_id: i64, owner: Owner) -> Option<ContainerRecord> {
        self.lock()
            .values()
            .find(|r| {
                r.challenge_id == challenge_id
                    && r.owner == owner
                    && r.state != RecordState::Terminated
            })
            .cloned()
    }

    /// Collect expired records that are not yet torn down and move them to
    /// `Stopping`. Returns their ids for the orchestrator to stop. A record
    /// already in `Stopping` (an earlier stop failed) is returned again so
    /// the stop gets retried; only a finished teardown takes a record out
    /// of the sweep, which is what keeps repeated passes idempotent.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut records = self.lock();
        let mut expired = Vec::new();
        for record in records.values_mut() {
            if record.state != RecordState::Terminated && clock::is_expired(record, now) {
                record.state = RecordState::Stopping;
                expired.push(record.container_id.clone());
            }
        }
        expired.sort();
        expired
    }

    /// Transition Running -> Stopping for an explicit kill. Returns the
    /// record after the transition; a record already in `Stopping` is
    /// returned as-is so the caller can retry the stop.
    pub fn begin_stop(&self, container_id: &str) -> Result<ContainerRecord, NotFoundError> {
        let mut records = self.lock();
        let record = records
            .get_mut(container_id)
            .ok_or_else(|| NotFoundError(container_id.to_string()))?;
        if record.state == RecordState::Running {
            record.state = RecordState::Stopping;
        }
        Ok(record.clone())
    }

    /// Finish teardown once the runtime confirmed the stop: delete the
    /// record, or keep it as a `Terminated` tombstone when retention asks
    /// for history.
    pub fn finish_stop(&self, container_id: &str, retain: bool) -> Result<(), NotFoundError> {
        let mut records = self.lock();
        if retain {
            let record = records
                .get_mut(container_id)
                .ok_or_else(|| NotFoundError(container_id.to_string()))?;
            record.state = RecordState::Terminated;
            Ok(())
        } else {
            records
                .remove(container_id)
                .map(|_| ())
                .ok_or_else(|| NotFoundError(container_id.to_string()))
        }
    }

    /// Push the deadline out (container renewal).
    pub fn extend(
        &self,
        container_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<ContainerRecord, NotFoundError> {
        let mut records = self.lock();
        let record = records
            .get_mut(container_id)
            .ok_or_else(|| NotFoundError(container_id.to_string()))?;
        record.expires_at = new_expires_at;
        Ok(record.clone())
    }
}
