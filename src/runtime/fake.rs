//! In-memory runtime used by the engine and teardown tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ContainerRuntime, ObservedContainer};
use crate::error::RuntimeError;
use crate::fingerprint::{LABEL_CONFIG, LABEL_PROJECT, LABEL_SERVICE};
use crate::materialize::{CreateRequest, NetworkAttachment};

/// Runtime operations, recorded in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Created a container for the named service.
    Create(String),
    Start(String),
    Remove(String),
    Connect { id: String, network: String },
    EnsureNetwork(String),
    EnsureVolume(String),
    RemoveVolume(String),
    RemoveNetwork(String),
}

impl Op {
    /// Whether this operation mutates containers (as opposed to shared
    /// resources, which are provisioned idempotently every run).
    pub fn is_container_mutation(&self) -> bool {
        matches!(
            self,
            Op::Create(_) | Op::Start(_) | Op::Remove(_) | Op::Connect { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub project: String,
    pub service: String,
    pub fingerprint: Option<String>,
    pub state: String,
    pub request: Option<CreateRequest>,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    networks: Vec<(String, String)>,
    volumes: Vec<(String, String)>,
    ops: Vec<Op>,
    next_id: u32,
    fail_remove: bool,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    /// Drain the recorded operations, leaving runtime state intact.
    pub fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut self.state.lock().unwrap().ops)
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn set_container_state(&self, id: &str, state: &str) {
        let mut inner = self.state.lock().unwrap();
        if let Some(container) = inner.containers.iter_mut().find(|c| c.id == id) {
            container.state = state.to_string();
        }
    }

    /// Place a container into the observed state without going through
    /// the create path.
    pub fn seed_container(
        &self,
        project: &str,
        service: &str,
        fingerprint: Option<String>,
        state: &str,
    ) -> String {
        let mut inner = self.state.lock().unwrap();
        inner.next_id += 1;
        let id = format!("seed-{}", inner.next_id);
        inner.containers.push(FakeContainer {
            id: id.clone(),
            project: project.to_string(),
            service: service.to_string(),
            fingerprint,
            state: state.to_string(),
            request: None,
        });
        id
    }

    /// Make every subsequent remove call fail.
    pub fn fail_removals(&self) {
        self.state.lock().unwrap().fail_remove = true;
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self, project: &str) -> Result<Vec<ObservedContainer>, RuntimeError> {
        let inner = self.state.lock().unwrap();
        Ok(inner
            .containers
            .iter()
            .filter(|c| c.project == project)
            .map(|c| ObservedContainer {
                id: c.id.clone(),
                service: c.service.clone(),
                fingerprint: c.fingerprint.clone(),
                state: c.state.clone(),
            })
            .collect())
    }

    async fn create_container(&self, request: CreateRequest) -> Result<String, RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        let project = request
            .labels
            .get(LABEL_PROJECT)
            .cloned()
            .unwrap_or_default();
        let service = request
            .labels
            .get(LABEL_SERVICE)
            .cloned()
            .unwrap_or_default();
        let fingerprint = request.labels.get(LABEL_CONFIG).cloned();
        inner.next_id += 1;
        let id = format!("ctr-{}", inner.next_id);
        inner.ops.push(Op::Create(service.clone()));
        inner.containers.push(FakeContainer {
            id: id.clone(),
            project,
            service,
            fingerprint,
            state: "created".to_string(),
            request: Some(request),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        inner.ops.push(Op::Start(id.to_string()));
        match inner.containers.iter_mut().find(|c| c.id == id) {
            Some(container) => {
                container.state = "running".to_string();
                Ok(())
            }
            None => Err(RuntimeError::Other(format!("no such container: {}", id))),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        if inner.fail_remove {
            return Err(RuntimeError::Other("injected remove failure".to_string()));
        }
        let before = inner.containers.len();
        inner.containers.retain(|c| c.id != id);
        if inner.containers.len() == before {
            return Err(RuntimeError::Other(format!("no such container: {}", id)));
        }
        inner.ops.push(Op::Remove(id.to_string()));
        Ok(())
    }

    async fn connect_network(
        &self,
        id: &str,
        network: &str,
        _attachment: NetworkAttachment,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        if !inner.containers.iter().any(|c| c.id == id) {
            return Err(RuntimeError::Other(format!("no such container: {}", id)));
        }
        inner.ops.push(Op::Connect {
            id: id.to_string(),
            network: network.to_string(),
        });
        Ok(())
    }

    async fn ensure_network(
        &self,
        name: &str,
        _driver: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        inner.ops.push(Op::EnsureNetwork(name.to_string()));
        let project = labels.get(LABEL_PROJECT).cloned().unwrap_or_default();
        if !inner.networks.iter().any(|(n, _)| n == name) {
            inner.networks.push((name.to_string(), project));
        }
        Ok(())
    }

    async fn ensure_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        inner.ops.push(Op::EnsureVolume(name.to_string()));
        let project = labels.get(LABEL_PROJECT).cloned().unwrap_or_default();
        if !inner.volumes.iter().any(|(n, _)| n == name) {
            inner.volumes.push((name.to_string(), project));
        }
        Ok(())
    }

    async fn list_volumes(&self, project: &str) -> Result<Vec<String>, RuntimeError> {
        let inner = self.state.lock().unwrap();
        Ok(inner
            .volumes
            .iter()
            .filter(|(_, p)| p == project)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        inner.volumes.retain(|(n, _)| n != name);
        inner.ops.push(Op::RemoveVolume(name.to_string()));
        Ok(())
    }

    async fn list_networks(&self, project: &str) -> Result<Vec<String>, RuntimeError> {
        let inner = self.state.lock().unwrap();
        Ok(inner
            .networks
            .iter()
            .filter(|(_, p)| p == project)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        let mut inner = self.state.lock().unwrap();
        inner.networks.retain(|(n, _)| n != name);
        inner.ops.push(Op::RemoveNetwork(name.to_string()));
        Ok(())
    }
}
