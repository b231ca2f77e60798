//! Container runtime abstraction.
//!
//! Every call is blocking from the engine's point of view: the engine
//! suspends at these boundaries and resumes with a success or a failure
//! that aborts the run.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::materialize::{CreateRequest, NetworkAttachment};

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerRuntime;

/// One runtime container, identified by the labels this tool stamped on
/// it at creation time. Containers created by other tools carry no
/// fingerprint label.
#[derive(Debug, Clone)]
pub struct ObservedContainer {
    pub id: String,
    pub service: String,
    pub fingerprint: Option<String>,
    pub state: String,
}

/// Runtime containers of a project, grouped by service name. Built fresh
/// at the start of each invocation and never cached across runs.
pub type ObservedState = BTreeMap<String, Vec<ObservedContainer>>;

/// Group observed containers by their service label.
pub fn observed_state(containers: Vec<ObservedContainer>) -> ObservedState {
    let mut state = ObservedState::new();
    for container in containers {
        state
            .entry(container.service.clone())
            .or_default()
            .push(container);
    }
    state
}

#[async_trait]
pub trait ContainerRuntime {
    /// All containers labeled with the given project, running or not.
    async fn list_containers(&self, project: &str) -> Result<Vec<ObservedContainer>, RuntimeError>;

    /// Create a container; returns its runtime identifier.
    async fn create_container(&self, request: CreateRequest) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop the container (tolerating one that is already stopped) and
    /// remove it.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Attach an existing container to an additional network.
    async fn connect_network(
        &self,
        id: &str,
        network: &str,
        attachment: NetworkAttachment,
    ) -> Result<(), RuntimeError>;

    /// Create the network if it does not exist yet.
    async fn ensure_network(
        &self,
        name: &str,
        driver: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError>;

    /// Create the named volume if it does not exist yet.
    async fn ensure_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError>;

    async fn list_volumes(&self, project: &str) -> Result<Vec<String>, RuntimeError>;

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;

    async fn list_networks(&self, project: &str) -> Result<Vec<String>, RuntimeError>;

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError>;
}
