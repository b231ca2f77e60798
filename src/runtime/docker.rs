//! Docker implementation of the runtime client, via the local daemon
//! socket.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::models::{
    EndpointIpamConfig, EndpointSettings, HostConfig, Mount, MountTypeEnum, PortBinding,
    RestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions,
};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};
use bollard::Docker;
use log::{debug, warn};

use super::{ContainerRuntime, ObservedContainer};
use crate::config::{MountKind, MountSpec};
use crate::error::RuntimeError;
use crate::fingerprint::{LABEL_CONFIG, LABEL_PROJECT, LABEL_SERVICE};
use crate::materialize::{CreateRequest, NetworkAttachment, PublishedPort, RestartPolicyKind};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local daemon (unix socket on Linux, named pipe
    /// elsewhere).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, project: &str) -> Result<Vec<ObservedContainer>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: true,
            filters: project_filter(project),
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(opts)).await?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let id = match summary.id {
                Some(id) => id,
                None => continue,
            };
            let labels = summary.labels.unwrap_or_default();
            let service = match labels.get(LABEL_SERVICE) {
                Some(service) => service.clone(),
                None => {
                    warn!(
                        "Container {} carries the project label but no service label, skipping",
                        id
                    );
                    continue;
                }
            };
            containers.push(ObservedContainer {
                id,
                service,
                fingerprint: labels.get(LABEL_CONFIG).cloned(),
                state: summary.state.unwrap_or_default(),
            });
        }
        Ok(containers)
    }

    async fn create_container(&self, request: CreateRequest) -> Result<String, RuntimeError> {
        let host_config = HostConfig {
            network_mode: Some(request.network_mode),
            port_bindings: port_map(&request.published_ports),
            restart_policy: request.restart.map(restart_policy),
            cap_add: some_if_nonempty(request.cap_add),
            cap_drop: some_if_nonempty(request.cap_drop),
            dns: some_if_nonempty(request.dns),
            dns_search: some_if_nonempty(request.dns_search),
            extra_hosts: some_if_nonempty(request.extra_hosts),
            mounts: some_if_nonempty(request.mounts.iter().map(mount).collect()),
            privileged: Some(request.privileged),
            readonly_rootfs: Some(request.read_only),
            security_opt: some_if_nonempty(request.security_opt),
            shm_size: request.shm_size,
            sysctls: if request.sysctls.is_empty() {
                None
            } else {
                Some(request.sysctls.into_iter().collect())
            },
            init: request.init,
            ipc_mode: request.ipc,
            pid_mode: request.pid,
            ..Default::default()
        };

        let networking_config = request.first_network.map(|(network, attachment)| {
            let mut endpoints = HashMap::new();
            endpoints.insert(network, endpoint_settings(&attachment));
            NetworkingConfig {
                endpoints_config: endpoints,
            }
        });

        let config = Config {
            hostname: request.hostname,
            domainname: request.domainname,
            user: request.user,
            exposed_ports: exposed_ports(&request.exposed_ports),
            tty: Some(request.tty),
            open_stdin: Some(request.stdin_open),
            env: Some(request.env),
            cmd: request.command,
            image: Some(request.image),
            working_dir: request.working_dir,
            entrypoint: request.entrypoint,
            labels: Some(request.labels.into_iter().collect()),
            stop_signal: request.stop_signal,
            network_disabled: Some(request.network_disabled),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        for warning in &created.warnings {
            warn!("Runtime warning on create: {}", warning);
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        match self.docker.stop_container(id, None::<StopContainerOptions>).await {
            Ok(()) => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} already stopped", id);
            }
            Err(e) => return Err(e.into()),
        }
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn connect_network(
        &self,
        id: &str,
        network: &str,
        attachment: NetworkAttachment,
    ) -> Result<(), RuntimeError> {
        let options = ConnectNetworkOptions {
            container: id.to_string(),
            endpoint_config: endpoint_settings(&attachment),
        };
        self.docker.connect_network(network, options).await?;
        Ok(())
    }

    async fn ensure_network(
        &self,
        name: &str,
        driver: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => {
                debug!("Network {} already exists", name);
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: driver.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ..Default::default()
        };
        debug!("Creating network {}", name);
        self.docker.create_network(options).await?;
        Ok(())
    }

    async fn ensure_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        // Volume creation is idempotent on the daemon side.
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ..Default::default()
        };
        self.docker.create_volume(options).await?;
        Ok(())
    }

    async fn list_volumes(&self, project: &str) -> Result<Vec<String>, RuntimeError> {
        let opts = ListVolumesOptions {
            filters: project_filter(project),
        };
        let response = self.docker.list_volumes(Some(opts)).await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| volume.name)
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker.remove_volume(name, None).await?;
        Ok(())
    }

    async fn list_networks(&self, project: &str) -> Result<Vec<String>, RuntimeError> {
        let opts = ListNetworksOptions {
            filters: project_filter(project),
        };
        let networks = self.docker.list_networks(Some(opts)).await?;
        Ok(networks
            .into_iter()
            .filter_map(|network| network.name)
            .collect())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker.remove_network(name).await?;
        Ok(())
    }
}

fn project_filter(project: &str) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        vec![format!("{}={}", LABEL_PROJECT, project)],
    );
    filters
}

fn some_if_nonempty<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn exposed_ports(keys: &[String]) -> Option<HashMap<String, HashMap<(), ()>>> {
    if keys.is_empty() {
        return None;
    }
    Some(
        keys.iter()
            .map(|key| (key.clone(), HashMap::new()))
            .collect(),
    )
}

fn port_map(published: &[PublishedPort]) -> Option<HashMap<String, Option<Vec<PortBinding>>>> {
    if published.is_empty() {
        return None;
    }
    let mut map: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for port in published {
        let bindings = map
            .entry(port.container.clone())
            .or_insert_with(|| Some(Vec::new()));
        if let Some(list) = bindings {
            list.push(PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: port.host_port.map(|p| p.to_string()),
            });
        }
    }
    Some(map)
}

fn mount(spec: &MountSpec) -> Mount {
    Mount {
        target: Some(spec.target.clone()),
        source: spec.source.clone(),
        typ: Some(match spec.kind {
            MountKind::Bind => MountTypeEnum::BIND,
            MountKind::Volume => MountTypeEnum::VOLUME,
            MountKind::Tmpfs => MountTypeEnum::TMPFS,
        }),
        read_only: Some(spec.read_only),
        ..Default::default()
    }
}

fn endpoint_settings(attachment: &NetworkAttachment) -> EndpointSettings {
    EndpointSettings {
        aliases: if attachment.aliases.is_empty() {
            None
        } else {
            Some(attachment.aliases.clone())
        },
        ipam_config: attachment.ipv4_address.as_ref().map(|ip| EndpointIpamConfig {
            ipv4_address: Some(ip.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn restart_policy(kind: RestartPolicyKind) -> RestartPolicy {
    let name = match kind {
        RestartPolicyKind::No => RestartPolicyNameEnum::NO,
        RestartPolicyKind::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicyKind::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicyKind::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };
    RestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}
