use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::challenges::ChallengeCatalog;
use crate::config::settings::{AssignmentMode, Settings};
use crate::docker::driver::{LaunchSpec, RuntimeDriver, RuntimeError};

use super::clock;
use super::ports::{self, PortResolveError};
use super::record::{ContainerRecord, Owner, RecordState};
use super::store::{NotFoundError, RecordFilter, RecordStore};

const STOP_ATTEMPTS: u32 = 3;
const STOP_BACKOFF_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("unknown challenge id {0}")]
    UnknownChallenge(i64),

    #[error("team assignment mode requires a team id")]
    TeamRequired,

    #[error("runtime failed to start container: {0}")]
    RuntimeStart(#[source] RuntimeError),

    #[error("runtime start timed out")]
    RuntimeTimeout,

    #[error("previous container '{0}' could not be stopped")]
    PredecessorNotStopped(String),

    #[error(transparent)]
    IncompleteAssignment(#[from] PortResolveError),
}

#[derive(Debug, Error)]
pub enum KillError {
    #[error("no container record with id '{0}'")]
    NotFound(String),

    #[error("runtime failed to stop container: {0}")]
    RuntimeStop(#[source] RuntimeError),

    #[error("runtime stop timed out")]
    RuntimeTimeout,
}

#[derive(Debug, Error)]
pub enum RenewError {
    #[error("unknown challenge id {0}")]
    UnknownChallenge(i64),

    #[error("team assignment mode requires a team id")]
    TeamRequired,

    #[error("no running container for this challenge and owner")]
    NotFound,
}

/// Result of a start request. A request that finds a live instance for the
/// same (challenge, owner) pair gets that instance back instead of an
/// error; callers that care can tell the cases apart.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Created(ContainerRecord),
    AlreadyRunning(ContainerRecord),
}

impl StartOutcome {
    pub fn record(&self) -> &ContainerRecord {
        match self {
            StartOutcome::Created(r) | StartOutcome::AlreadyRunning(r) => r,
        }
    }

    pub fn reused(&self) -> bool {
        matches!(self, StartOutcome::AlreadyRunning(_))
    }
}

/// A port mapping annotated with its dashboard label.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LabeledPort {
    pub internal: u16,
    pub host: u16,
    pub label: Option<String>,
}

/// One dashboard row: the record plus state computed at read time.
#[derive(Debug, Clone)]
pub struct DashboardEntry {
    pub record: ContainerRecord,
    pub is_running: bool,
    pub ports: Vec<LabeledPort>,
}

/// What a sweep pass did.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Expired instances stopped and cleaned up.
    pub stopped: Vec<String>,
    /// Expired instances whose runtime stop failed; left in Stopping for
    /// the next pass.
    pub failed: Vec<String>,
    /// Instances the runtime no longer knew about.
    pub lost: Vec<String>,
}

/// Coordinates the record store, the challenge catalog and the runtime
/// driver: starts instances, kills them, and sweeps out expired ones.
pub struct Lifecycle {
    store: Arc<RecordStore>,
    driver: Arc<dyn RuntimeDriver>,
    catalog: ChallengeCatalog,
    settings: Settings,
    /// One async mutex per (challenge, owner) pair so concurrent starts for
    /// the same pair serialize; the loser observes the winner's record.
    start_locks: Mutex<HashMap<(i64, Owner), Arc<tokio::sync::Mutex<()>>>>,
}

impl Lifecycle {
    pub fn new(driver: Arc<dyn RuntimeDriver>, catalog: ChallengeCatalog, settings: Settings) -> Self {
        Self {
            store: Arc::new(RecordStore::new()),
            driver,
            catalog,
            settings,
            start_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn runtime_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.settings.runtime_timeout_secs)
    }

    /// Resolve the owner once, from the assignment mode in effect right
    /// now. The result is frozen into the record.
    fn owner_for(&self, user_id: i64, team_id: Option<i64>) -> Option<Owner> {
        match self.settings.assignment() {
            AssignmentMode::Team => team_id.map(Owner::Team),
            AssignmentMode::User => Some(Owner::User(user_id)),
        }
    }

    fn pair_lock(&self, key: (i64, Owner)) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.start_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop entries nobody holds anymore so the map does not grow with
        // every pair ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    /// Start (or reuse) an instance of `challenge_id` for the requesting
    /// user/team.
    pub async fn start(
        &self,
        challenge_id: i64,
        user_id: i64,
        team_id: Option<i64>,
    ) -> Result<StartOutcome, StartError> {
        let owner = self
            .owner_for(user_id, team_id)
            .ok_or(StartError::TeamRequired)?;
        let challenge = self
            .catalog
            .get(challenge_id)
            .ok_or(StartError::UnknownChallenge(challenge_id))?
            .clone();

        let lock = self.pair_lock((challenge_id, owner));
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.find_for_pair(challenge_id, owner) {
            let alive = self
                .driver
                .is_alive(&existing.container_id)
                .await
                .unwrap_or(false);
            if existing.state == RecordState::Running
                && clock::is_running(&existing, Utc::now(), alive)
            {
                tracing::info!(
                    "Container '{}' already running for challenge {} ({})",
                    existing.container_id,
                    challenge_id,
                    owner
                );
                return Ok(StartOutcome::AlreadyRunning(existing));
            }

            // Stale record: the container died, expired, or a previous stop
            // never completed. Reap it before starting fresh.
            tracing::info!(
                "Reaping stale container '{}' for challenge {} ({})",
                existing.container_id,
                challenge_id,
                owner
            );
            let _ = self.store.begin_stop(&existing.container_id);
            let stopped = matches!(
                timeout(
                    self.runtime_timeout(),
                    self.driver.stop_container(&existing.container_id),
                )
                .await,
                Ok(Ok(()))
            );
            let gone = stopped
                || !self
                    .driver
                    .is_alive(&existing.container_id)
                    .await
                    .unwrap_or(true);
            if !gone {
                // The container is still up and would not stop. Dropping its
                // record here would leave it running untracked; keep it in
                // Stopping for the sweeper and refuse the fresh start.
                tracing::error!(
                    "Stale container '{}' for challenge {} would not stop; keeping its record",
                    existing.container_id,
                    challenge_id
                );
                return Err(StartError::PredecessorNotStopped(existing.container_id));
            }
            let _ = self.store.delete(&existing.container_id);
        }

        let spec = LaunchSpec {
            name: format!("instancer-{}-{}", challenge_id, Uuid::new_v4().simple()),
            image: challenge.image.clone(),
            internal_ports: challenge.internal_ports(),
            command: challenge.command.clone(),
            memory_limit_mb: self.settings.container_maxmemory_mb,
            cpu_limit: self.settings.container_maxcpu,
        };

        let launched = match timeout(self.runtime_timeout(), self.driver.start_container(&spec)).await
        {
            Ok(Ok(launched)) => launched,
            Ok(Err(e)) => return Err(StartError::RuntimeStart(e)),
            Err(_) => {
                // The container may still come up after we stopped waiting;
                // remove it by its deterministic name so nothing leaks.
                let driver = Arc::clone(&self.driver);
                let name = spec.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = driver.remove_by_name(&name).await {
                        tracing::warn!("Cleanup of timed-out start '{}' failed: {}", name, e);
                    }
                });
                return Err(StartError::RuntimeTimeout);
            }
        };

        let port_mappings = match ports::resolve(&spec.internal_ports, &launched.assigned_ports) {
            Ok(mappings) => mappings,
            Err(e) => {
                // The container is up but unreachable as declared. Never
                // hand out a partial mapping; tear it down instead.
                tracing::error!(
                    "Container '{}' for challenge {} is missing port bindings: {}",
                    launched.container_id,
                    challenge_id,
                    e
                );
                let _ = timeout(
                    self.runtime_timeout(),
                    self.driver.stop_container(&launched.container_id),
                )
                .await;
                return Err(e.into());
            }
        };

        let created_at = Utc::now();
        let record = ContainerRecord {
            container_id: launched.container_id,
            challenge_id,
            image: challenge.image.clone(),
            owner,
            port_mappings,
            created_at,
            expires_at: created_at + Duration::seconds(challenge.lifetime_secs as i64),
            state: RecordState::Running,
        };

        match self.store.create(record.clone()) {
            Ok(()) => {
                tracing::info!(
                    "Container '{}' created for challenge {} ({}), expires at {}",
                    record.container_id,
                    challenge_id,
                    owner,
                    record.expires_at
                );
                Ok(StartOutcome::Created(record))
            }
            Err(conflict) => {
                // Should not happen under the pair lock, but if it does the
                // winner's record stands and our container goes away.
                tracing::warn!(
                    "Lost create race for challenge {} ({}); stopping '{}'",
                    challenge_id,
                    owner,
                    record.container_id
                );
                let _ = timeout(
                    self.runtime_timeout(),
                    self.driver.stop_container(&record.container_id),
                )
                .await;
                Ok(StartOutcome::AlreadyRunning(*conflict.existing))
            }
        }
    }

    /// Kill an instance by container id. Killing a container the runtime
    /// has already lost is a success; a failed runtime stop leaves the
    /// record in `Stopping` and the container visible, so the dashboard
    /// keeps reflecting the truth.
    pub async fn kill(&self, container_id: &str, requested_by: &str) -> Result<(), KillError> {
        self.store
            .begin_stop(container_id)
            .map_err(|NotFoundError(id)| KillError::NotFound(id))?;

        match timeout(
            self.runtime_timeout(),
            self.driver.stop_container(container_id),
        )
        .await
        {
            Ok(Ok(())) => {
                let _ = self
                    .store
                    .finish_stop(container_id, self.settings.retain_terminated);
                tracing::info!("Container '{}' killed by {}", container_id, requested_by);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to stop container '{}': {}", container_id, e);
                Err(KillError::RuntimeStop(e))
            }
            Err(_) => {
                tracing::error!("Stop of container '{}' timed out", container_id);
                Err(KillError::RuntimeTimeout)
            }
        }
    }

    /// Stop and clean up every expired instance, best-effort: one failure
    /// never aborts the rest. Also reaps records whose container vanished
    /// from the runtime before its deadline.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for container_id in self.store.sweep(now) {
            if self.stop_with_retries(&container_id).await {
                let _ = self
                    .store
                    .finish_stop(&container_id, self.settings.retain_terminated);
                tracing::info!("Expired container '{}' stopped", container_id);
                report.stopped.push(container_id);
            } else {
                tracing::warn!(
                    "Expired container '{}' could not be stopped; will retry next sweep",
                    container_id
                );
                report.failed.push(container_id);
            }
        }

        // Records still Running here are unexpired; check the runtime did
        // not lose them behind our back.
        for record in self.store.list(RecordFilter {
            state: Some(RecordState::Running),
            ..Default::default()
        }) {
            match self.driver.is_alive(&record.container_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        "Container '{}' for challenge {} vanished from the runtime",
                        record.container_id,
                        record.challenge_id
                    );
                    let _ = self.store.begin_stop(&record.container_id);
                    let _ = self
                        .store
                        .finish_stop(&record.container_id, self.settings.retain_terminated);
                    report.lost.push(record.container_id);
                }
                Err(e) => {
                    tracing::warn!(
                        "Could not check container '{}': {}",
                        record.container_id,
                        e
                    );
                }
            }
        }

        report
    }

    async fn stop_with_retries(&self, container_id: &str) -> bool {
        for attempt in 0..STOP_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    STOP_BACKOFF_MS * attempt as u64,
                ))
                .await;
            }
            match timeout(
                self.runtime_timeout(),
                self.driver.stop_container(container_id),
            )
            .await
            {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => {
                    tracing::warn!(
                        "Stop attempt {} for '{}' failed: {}",
                        attempt + 1,
                        container_id,
                        e
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Stop attempt {} for '{}' timed out",
                        attempt + 1,
                        container_id
                    );
                }
            }
        }
        false
    }

    /// Extend the deadline of the requester's instance by the challenge
    /// lifetime, counted from now.
    pub async fn renew(
        &self,
        challenge_id: i64,
        user_id: i64,
        team_id: Option<i64>,
    ) -> Result<ContainerRecord, RenewError> {
        let owner = self
            .owner_for(user_id, team_id)
            .ok_or(RenewError::TeamRequired)?;
        let challenge = self
            .catalog
            .get(challenge_id)
            .ok_or(RenewError::UnknownChallenge(challenge_id))?;

        let record = self
            .store
            .find_for_pair(challenge_id, owner)
            .filter(|r| r.state == RecordState::Running)
            .ok_or(RenewError::NotFound)?;

        let new_expires = Utc::now() + Duration::seconds(challenge.lifetime_secs as i64);
        self.store
            .extend(&record.container_id, new_expires)
            .map_err(|_| RenewError::NotFound)
    }

    /// The record's frozen port mappings, annotated with the catalog's
    /// current display labels. Labels are an enrichment only; the mapping
    /// itself never changes after creation.
    pub fn annotate_ports(&self, record: &ContainerRecord) -> Vec<LabeledPort> {
        let challenge = self.catalog.get(record.challenge_id);
        record
            .port_mappings
            .iter()
            .map(|m| LabeledPort {
                internal: m.internal,
                host: m.host,
                label: challenge
                    .and_then(|c| c.label_for(m.internal))
                    .map(str::to_string),
            })
            .collect()
    }

    /// Everything the dashboard shows: records in creation order, each with
    /// `is_running` computed against the runtime and the clock, and port
    /// mappings annotated with the catalog's labels.
    pub async fn list_for_dashboard(&self, now: DateTime<Utc>) -> Vec<DashboardEntry> {
        let mut entries = Vec::new();
        for record in self.store.list(RecordFilter::default()) {
            // Only Terminated tombstones skip the runtime check. A record
            // stuck in Stopping after a failed kill may still be live, and
            // the dashboard has to say so.
            let alive = if record.state == RecordState::Terminated {
                false
            } else {
                self.driver
                    .is_alive(&record.container_id)
                    .await
                    .unwrap_or(false)
            };
            let is_running = clock::is_running(&record, now, alive);
            let ports = self.annotate_ports(&record);

            entries.push(DashboardEntry {
                record,
                is_running,
                ports,
            });
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::driver::Launched;

    struct NoopDriver;

    #[async_trait::async_trait]
    impl RuntimeDriver for NoopDriver {
        async fn start_container(&self, _spec: &LaunchSpec) -> Result<Launched, RuntimeError> {
            Err(RuntimeError::Api("noop".into()))
        }

        async fn stop_container(&self, _container_id: &str) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn is_alive(&self, _container_id: &str) -> Result<bool, RuntimeError> {
            Ok(false)
        }

        async fn remove_by_name(&self, _name: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    #[test]
    fn idle_pair_locks_are_pruned() {
        let lifecycle = Lifecycle::new(
            Arc::new(NoopDriver),
            ChallengeCatalog::default(),
            Settings::default(),
        );

        let held = lifecycle.pair_lock((1, Owner::User(1)));
        drop(lifecycle.pair_lock((2, Owner::User(2))));
        let _ = lifecycle.pair_lock((3, Owner::User(3)));

        let locks = lifecycle.start_locks.lock().unwrap();
        assert!(locks.contains_key(&(1, Owner::User(1))));
        assert!(!locks.contains_key(&(2, Owner::User(2))));
        drop(held);
    }
}
