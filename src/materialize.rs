//! Translate one desired service into a runtime creation request.
//!
//! The request carries everything a single create call needs, plus the
//! list of additional networks that have to be connected after creation
//! (a container can only be attached to one network at create time).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::{MountKind, MountSpec, ServiceSpec};
use crate::error::ConfigError;
use crate::fingerprint::{fingerprint, LABEL_CONFIG, LABEL_PROJECT, LABEL_SERVICE};
use crate::resources::{ResolvedResources, DEFAULT_NETWORK};

/// A runtime-agnostic container creation request.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub image: String,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    /// Sorted `KEY=VAL` pairs.
    pub env: Vec<String>,
    /// User labels plus the project, service and config labels.
    pub labels: BTreeMap<String, String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub stop_signal: Option<String>,
    pub tty: bool,
    pub stdin_open: bool,
    /// `"80/tcp"`-style exposure keys, sorted.
    pub exposed_ports: Vec<String>,
    pub published_ports: Vec<PublishedPort>,
    pub network_mode: String,
    pub network_disabled: bool,
    /// Attachment applied at create time; the rest go through
    /// follow-up connect calls.
    pub first_network: Option<(String, NetworkAttachment)>,
    /// Fully resolved mounts: absolute bind sources, runtime volume
    /// names.
    pub mounts: Vec<MountSpec>,
    pub restart: Option<RestartPolicyKind>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub privileged: bool,
    pub read_only: bool,
    pub security_opt: Vec<String>,
    pub shm_size: Option<i64>,
    pub sysctls: BTreeMap<String, String>,
    pub init: Option<bool>,
    pub ipc: Option<String>,
    pub pid: Option<String>,
}

/// One host-side publication of a container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    /// `"80/tcp"`-style key.
    pub container: String,
    pub host_ip: Option<String>,
    /// `None` publishes to an ephemeral host port.
    pub host_port: Option<u16>,
}

/// Endpoint options for attaching a container to one network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub aliases: Vec<String>,
    pub ipv4_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicyKind {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

/// Build the creation request for a service, along with the networks to
/// connect after creation.
pub fn container_request(
    service: &ServiceSpec,
    resolved: &ResolvedResources,
    project: &str,
    project_dir: &Path,
) -> Result<(CreateRequest, Vec<(String, NetworkAttachment)>), ConfigError> {
    let mut labels = service.labels.clone();
    labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    labels.insert(LABEL_SERVICE.to_string(), service.name.clone());
    labels.insert(LABEL_CONFIG.to_string(), fingerprint(service));

    let mut attachments = network_attachments(service, resolved);
    let network_mode = match &service.network_mode {
        Some(mode) => mode.clone(),
        None => attachments
            .first()
            .map(|(network, _)| network.clone())
            .unwrap_or_else(|| "none".to_string()),
    };
    let first_network = if attachments.is_empty() {
        None
    } else {
        Some(attachments.remove(0))
    };

    let request = CreateRequest {
        image: service.image.clone(),
        command: service.command.clone(),
        entrypoint: service.entrypoint.clone(),
        env: service
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect(),
        labels,
        hostname: service.hostname.clone(),
        domainname: service.domainname.clone(),
        user: service.user.clone(),
        working_dir: service.working_dir.clone(),
        stop_signal: service.stop_signal.clone(),
        tty: service.tty,
        stdin_open: service.stdin_open,
        exposed_ports: exposed_ports(service),
        published_ports: published_ports(service),
        network_mode,
        network_disabled: service.network_mode.as_deref() == Some("disabled"),
        first_network,
        mounts: mounts(service, resolved, project_dir)?,
        restart: restart_policy(service.restart.as_deref())?,
        cap_add: service.cap_add.clone(),
        cap_drop: service.cap_drop.clone(),
        dns: service.dns.clone(),
        dns_search: service.dns_search.clone(),
        extra_hosts: service.extra_hosts.clone(),
        privileged: service.privileged,
        read_only: service.read_only,
        security_opt: service.security_opt.clone(),
        shm_size: service.shm_size,
        sysctls: service.sysctls.clone(),
        init: service.init,
        ipc: service.ipc.clone(),
        pid: service.pid.clone(),
    };
    Ok((request, attachments))
}

/// All network attachments of a service, in sorted name order. A service
/// with no declared networks attaches to the project default network;
/// an explicit `network_mode` suppresses attachments entirely. Every
/// attachment carries the service name as an alias.
fn network_attachments(
    service: &ServiceSpec,
    resolved: &ResolvedResources,
) -> Vec<(String, NetworkAttachment)> {
    if service.network_mode.is_some() {
        return Vec::new();
    }
    if service.networks.is_empty() {
        let network = resolved
            .network(DEFAULT_NETWORK)
            .unwrap_or(DEFAULT_NETWORK)
            .to_string();
        return vec![(
            network,
            NetworkAttachment {
                aliases: vec![service.name.clone()],
                ipv4_address: None,
            },
        )];
    }
    service
        .networks
        .iter()
        .map(|(logical, endpoint)| {
            let network = resolved.network(logical).unwrap_or(logical).to_string();
            let mut aliases = vec![service.name.clone()];
            aliases.extend(endpoint.aliases.iter().cloned());
            (
                network,
                NetworkAttachment {
                    aliases,
                    ipv4_address: endpoint.ipv4_address.clone(),
                },
            )
        })
        .collect()
}

/// Mount assembly order: service mounts and tmpfs entries first, then
/// config files, then secret files.
fn mounts(
    service: &ServiceSpec,
    resolved: &ResolvedResources,
    project_dir: &Path,
) -> Result<Vec<MountSpec>, ConfigError> {
    let mut mounts = Vec::new();
    for mount in &service.volumes {
        mounts.push(resolve_mount(mount, resolved, project_dir));
    }
    for target in &service.tmpfs {
        mounts.push(MountSpec {
            kind: MountKind::Tmpfs,
            source: None,
            target: target.clone(),
            read_only: false,
        });
    }
    for reference in &service.configs {
        let path = resolved.config(&reference.source).ok_or_else(|| {
            ConfigError::UndeclaredReference {
                kind: "config",
                name: reference.source.clone(),
            }
        })?;
        mounts.push(MountSpec {
            kind: MountKind::Bind,
            source: Some(path.display().to_string()),
            target: reference
                .target
                .clone()
                .unwrap_or_else(|| format!("/{}", reference.source)),
            read_only: true,
        });
    }
    for reference in &service.secrets {
        let path = resolved.secret(&reference.source).ok_or_else(|| {
            ConfigError::UndeclaredReference {
                kind: "secret",
                name: reference.source.clone(),
            }
        })?;
        mounts.push(MountSpec {
            kind: MountKind::Bind,
            source: Some(path.display().to_string()),
            target: reference
                .target
                .clone()
                .unwrap_or_else(|| format!("/run/secrets/{}", reference.source)),
            read_only: true,
        });
    }
    Ok(mounts)
}

fn resolve_mount(
    mount: &MountSpec,
    resolved: &ResolvedResources,
    project_dir: &Path,
) -> MountSpec {
    let source = match mount.kind {
        MountKind::Bind => mount.source.as_ref().map(|source| {
            let path = Path::new(source);
            if path.is_absolute() {
                source.clone()
            } else {
                let relative = path.strip_prefix(".").unwrap_or(path);
                project_dir.join(relative).display().to_string()
            }
        }),
        MountKind::Volume => mount
            .source
            .as_ref()
            .map(|logical| resolved.volume(logical).unwrap_or(logical).to_string()),
        MountKind::Tmpfs => None,
    };
    MountSpec {
        kind: mount.kind,
        source,
        target: mount.target.clone(),
        read_only: mount.read_only,
    }
}

fn exposed_ports(service: &ServiceSpec) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for port in &service.ports {
        keys.insert(format!("{}/{}", port.target, port.protocol));
    }
    for entry in &service.expose {
        if entry.contains('/') {
            keys.insert(entry.clone());
        } else {
            keys.insert(format!("{}/tcp", entry));
        }
    }
    keys.into_iter().collect()
}

fn published_ports(service: &ServiceSpec) -> Vec<PublishedPort> {
    service
        .ports
        .iter()
        .map(|port| PublishedPort {
            container: format!("{}/{}", port.target, port.protocol),
            host_ip: port.host_ip.clone(),
            host_port: port.published,
        })
        .collect()
}

fn restart_policy(restart: Option<&str>) -> Result<Option<RestartPolicyKind>, ConfigError> {
    Ok(match restart {
        None | Some("") => None,
        Some("no") => Some(RestartPolicyKind::No),
        Some("always") => Some(RestartPolicyKind::Always),
        Some("on-failure") => Some(RestartPolicyKind::OnFailure),
        Some("unless-stopped") => Some(RestartPolicyKind::UnlessStopped),
        Some(other) => return Err(ConfigError::RestartPolicy(other.to_string())),
    })
}
