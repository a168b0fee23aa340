use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::Docker;
use std::collections::HashMap;

use super::driver::{LaunchSpec, Launched, RuntimeDriver, RuntimeError};

/// Docker-backed runtime driver.
pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    pub async fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        // Verify connection
        docker
            .ping()
            .await
            .context("Failed to ping Docker daemon")?;

        Ok(Self { docker })
    }

    /// Internal port -> host port, from the inspect response. Entries the
    /// runtime did not bind are simply absent; the port resolver decides
    /// whether that is fatal.
    fn assigned_ports(
        ports: Option<HashMap<String, Option<Vec<bollard::models::PortBinding>>>>,
    ) -> HashMap<u16, u16> {
        let mut assigned = HashMap::new();
        for (key, bindings) in ports.unwrap_or_default() {
            // Keys look like "1337/tcp"
            let internal = match key.split('/').next().and_then(|p| p.parse::<u16>().ok()) {
                Some(p) => p,
                None => continue,
            };
            let host = bindings
                .unwrap_or_default()
                .into_iter()
                .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()));
            if let Some(host) = host {
                assigned.insert(internal, host);
            }
        }
        assigned
    }
}

fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn start_container(&self, spec: &LaunchSpec) -> Result<Launched, RuntimeError> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .internal_ports
            .iter()
            .map(|p| (format!("{}/tcp", p), HashMap::new()))
            .collect();

        let host_config = bollard::models::HostConfig {
            publish_all_ports: Some(true),
            // Stopped instances are gone from the runtime; the registry
            // keeps any history we want.
            auto_remove: Some(true),
            memory: spec.memory_limit_mb.map(|mb| mb * 1024 * 1024),
            cpu_quota: spec.cpu_limit.map(|cpus| (cpus * 100_000.0) as i64),
            cpu_period: spec.cpu_limit.map(|_| 100_000),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                if status_code(&e) == Some(404) {
                    RuntimeError::ImageNotFound(spec.image.clone())
                } else {
                    RuntimeError::Api(e.to_string())
                }
            })?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        let inspect = self
            .docker
            .inspect_container(&created.id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        let assigned_ports = Self::assigned_ports(inspect.network_settings.and_then(|n| n.ports));

        Ok(Launched {
            container_id: created.id,
            assigned_ports,
        })
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        match self.docker.stop_container(container_id, None).await {
            Ok(()) => Ok(()),
            // 404: already gone, 304: already stopped. Both count as done.
            Err(e) if matches!(status_code(&e), Some(404) | Some(304)) => Ok(()),
            Err(e) => Err(RuntimeError::Api(e.to_string())),
        }
    }

    async fn is_alive(&self, container_id: &str) -> Result<bool, RuntimeError> {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(inspect.state.and_then(|s| s.running).unwrap_or(false)),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(RuntimeError::Api(e.to_string())),
        }
    }

    async fn remove_by_name(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(RuntimeError::Api(e.to_string())),
        }
    }
}
