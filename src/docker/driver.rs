use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("runtime error: {0}")]
    Api(String),
}

/// Everything the driver needs to start one challenge instance.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Deterministic container name, chosen by the orchestrator before the
    /// start call so a timed-out start can still be cleaned up by name.
    pub name: String,
    pub image: String,
    /// Container-internal ports the runtime must publish.
    pub internal_ports: Vec<u16>,
    pub command: Option<Vec<String>>,
    pub memory_limit_mb: Option<i64>,
    pub cpu_limit: Option<f64>,
}

/// What the runtime reports after a successful start.
#[derive(Debug, Clone)]
pub struct Launched {
    pub container_id: String,
    /// Internal port -> host-assigned port, as inspected from the runtime.
    pub assigned_ports: HashMap<u16, u16>,
}

/// The external container runtime, seen from the lifecycle core.
///
/// `stop_container` must be idempotent: stopping a container the runtime no
/// longer knows about is a success, which is what lets kill retries and the
/// sweep coexist without double-stop hazards.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    async fn start_container(&self, spec: &LaunchSpec) -> Result<Launched, RuntimeError>;

    async fn stop_container(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn is_alive(&self, container_id: &str) -> Result<bool, RuntimeError>;

    /// Best-effort removal by container name, for cleaning up after a start
    /// whose response we never saw (timeout).
    async fn remove_by_name(&self, name: &str) -> Result<(), RuntimeError>;
}
