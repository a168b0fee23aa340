use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a container instance belongs to. Decided once at creation time from
/// the `docker_assignment` setting and never re-derived afterwards, so a
/// settings change cannot silently re-scope an existing instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
    User(i64),
    Team(i64),
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::User(id) => write!(f, "user:{}", id),
            Owner::Team(id) => write!(f, "team:{}", id),
        }
    }
}

/// One container-internal port and the host port the runtime assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub internal: u16,
    pub host: u16,
}

/// Lifecycle state of a registered instance.
///
/// `Running` is the normal live state. `Stopping` marks an instance whose
/// teardown has started (explicit kill or expiry sweep) but whose runtime
/// stop has not been confirmed yet; a failed stop leaves the record here so
/// the next kill or sweep retries it. `Terminated` is the retained
/// historical state used when the retention policy keeps tombstones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Running,
    Stopping,
    Terminated,
}

/// A tracked container instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Runtime-assigned id, unique and immutable once set.
    pub container_id: String,
    pub challenge_id: i64,
    /// Image copied from the challenge at creation time; later catalog
    /// edits do not affect existing records.
    pub image: String,
    pub owner: Owner,
    /// Ordered mapping, frozen at creation: insertion order is the
    /// challenge's declared port order.
    pub port_mappings: Vec<PortBinding>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: RecordState,
}

impl ContainerRecord {
    pub fn pair(&self) -> (i64, Owner) {
        (self.challenge_id, self.owner)
    }
}
