//! Idempotent provisioning of project-scoped shared resources.
//!
//! Networks and named volumes get a `{project}_{name}` runtime name and
//! are created if missing, labeled with the project so teardown can find
//! them. Configs and secrets are file-based: they resolve to absolute
//! host paths relative to the compose file's directory. The resulting
//! table is built once per run, before any container mutation, and is
//! read-only afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::{ComposeConfig, FileObjectSpec};
use crate::error::ResourceError;
use crate::fingerprint::LABEL_PROJECT;
use crate::runtime::ContainerRuntime;

/// Logical name of the network services attach to when they declare none.
pub const DEFAULT_NETWORK: &str = "default";

/// Mapping from logical resource names to runtime identifiers and
/// mount-ready paths.
#[derive(Debug, Clone, Default)]
pub struct ResolvedResources {
    networks: BTreeMap<String, String>,
    volumes: BTreeMap<String, String>,
    configs: BTreeMap<String, PathBuf>,
    secrets: BTreeMap<String, PathBuf>,
}

impl ResolvedResources {
    pub fn network(&self, logical: &str) -> Option<&str> {
        self.networks.get(logical).map(String::as_str)
    }

    pub fn volume(&self, logical: &str) -> Option<&str> {
        self.volumes.get(logical).map(String::as_str)
    }

    pub fn config(&self, logical: &str) -> Option<&Path> {
        self.configs.get(logical).map(PathBuf::as_path)
    }

    pub fn secret(&self, logical: &str) -> Option<&Path> {
        self.secrets.get(logical).map(PathBuf::as_path)
    }

    #[cfg(test)]
    pub fn with_network(mut self, logical: &str, name: &str) -> Self {
        self.networks.insert(logical.to_string(), name.to_string());
        self
    }

    #[cfg(test)]
    pub fn with_volume(mut self, logical: &str, name: &str) -> Self {
        self.volumes.insert(logical.to_string(), name.to_string());
        self
    }

    #[cfg(test)]
    pub fn with_config(mut self, logical: &str, path: &str) -> Self {
        self.configs.insert(logical.to_string(), PathBuf::from(path));
        self
    }

    #[cfg(test)]
    pub fn with_secret(mut self, logical: &str, path: &str) -> Self {
        self.secrets.insert(logical.to_string(), PathBuf::from(path));
        self
    }
}

/// Resolve every shared resource the configuration needs. Safe to call
/// every run: existing resources are left alone.
pub async fn resolve<R: ContainerRuntime>(
    runtime: &R,
    project: &str,
    config: &ComposeConfig,
) -> Result<ResolvedResources, ResourceError> {
    let mut resolved = ResolvedResources::default();
    let labels = project_labels(project);

    // Declared networks, service-referenced networks, and the implicit
    // default network all get provisioned.
    let mut wanted: BTreeSet<String> = config.networks.keys().cloned().collect();
    wanted.insert(DEFAULT_NETWORK.to_string());
    for service in &config.services {
        wanted.extend(service.networks.keys().cloned());
    }

    for logical in wanted {
        let spec = config.networks.get(&logical).cloned().unwrap_or_default();
        if spec.external {
            let name = spec.name.unwrap_or_else(|| logical.clone());
            debug!("Using external network {} as {}", name, logical);
            resolved.networks.insert(logical, name);
            continue;
        }
        let name = format!("{}_{}", project, logical);
        let driver = spec.driver.unwrap_or_else(|| "bridge".to_string());
        runtime.ensure_network(&name, &driver, &labels).await?;
        resolved.networks.insert(logical, name);
    }

    for (logical, spec) in &config.volumes {
        if spec.external {
            let name = spec.name.clone().unwrap_or_else(|| logical.clone());
            debug!("Using external volume {} as {}", name, logical);
            resolved.volumes.insert(logical.clone(), name);
            continue;
        }
        let name = format!("{}_{}", project, logical);
        runtime.ensure_volume(&name, &labels).await?;
        resolved.volumes.insert(logical.clone(), name);
    }

    for (logical, spec) in &config.configs {
        let path = file_object_path("config", logical, spec, &config.project_dir)?;
        resolved.configs.insert(logical.clone(), path);
    }
    for (logical, spec) in &config.secrets {
        let path = file_object_path("secret", logical, spec, &config.project_dir)?;
        resolved.secrets.insert(logical.clone(), path);
    }

    Ok(resolved)
}

fn file_object_path(
    kind: &'static str,
    name: &str,
    spec: &FileObjectSpec,
    project_dir: &Path,
) -> Result<PathBuf, ResourceError> {
    if spec.external {
        return Err(ResourceError::External {
            kind,
            name: name.to_string(),
        });
    }
    let file = spec.file.as_ref().ok_or_else(|| ResourceError::MissingFile {
        kind,
        name: name.to_string(),
    })?;
    let path = if file.is_absolute() {
        file.clone()
    } else {
        let relative = file.strip_prefix(".").unwrap_or(file);
        project_dir.join(relative)
    };
    if !path.is_file() {
        return Err(ResourceError::FileNotFound {
            kind,
            name: name.to_string(),
            path,
        });
    }
    Ok(path)
}

fn project_labels(project: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::resolve;
    use crate::config;
    use crate::error::ResourceError;
    use crate::runtime::fake::{FakeRuntime, Op};

    #[tokio::test]
    async fn provisions_scoped_networks_and_volumes() {
        let runtime = FakeRuntime::new();
        let config = config::from_str(
            "services:\n  web:\n    image: nginx\n    networks:\n      - front\nnetworks:\n  front:\nvolumes:\n  data:\n",
            PathBuf::from("/srv/app"),
        )
        .expect("parse");

        let resolved = resolve(&runtime, "demo", &config).await.expect("resolve");
        assert_eq!(resolved.network("front"), Some("demo_front"));
        assert_eq!(resolved.network("default"), Some("demo_default"));
        assert_eq!(resolved.volume("data"), Some("demo_data"));

        let ops = runtime.take_ops();
        assert!(ops.contains(&Op::EnsureNetwork("demo_front".to_string())));
        assert!(ops.contains(&Op::EnsureNetwork("demo_default".to_string())));
        assert!(ops.contains(&Op::EnsureVolume("demo_data".to_string())));
    }

    #[tokio::test]
    async fn external_networks_are_mapped_but_not_created() {
        let runtime = FakeRuntime::new();
        let config = config::from_str(
            "services:\n  web:\n    image: nginx\n    networks:\n      - shared\nnetworks:\n  shared:\n    external: true\n    name: corp-net\n",
            PathBuf::from("/srv/app"),
        )
        .expect("parse");

        let resolved = resolve(&runtime, "demo", &config).await.expect("resolve");
        assert_eq!(resolved.network("shared"), Some("corp-net"));
        assert!(!runtime
            .take_ops()
            .contains(&Op::EnsureNetwork("corp-net".to_string())));
    }

    #[tokio::test]
    async fn resolves_config_files_against_project_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut file = std::fs::File::create(tmp.path().join("app.conf")).expect("create");
        write!(file, "listen 80;").expect("write");

        let runtime = FakeRuntime::new();
        let config = config::from_str(
            "services:\n  web:\n    image: nginx\nconfigs:\n  app:\n    file: ./app.conf\n",
            tmp.path().to_path_buf(),
        )
        .expect("parse");

        let resolved = resolve(&runtime, "demo", &config).await.expect("resolve");
        assert_eq!(
            resolved.config("app"),
            Some(tmp.path().join("app.conf").as_path())
        );
    }

    #[tokio::test]
    async fn missing_config_file_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let runtime = FakeRuntime::new();
        let config = config::from_str(
            "services:\n  web:\n    image: nginx\nconfigs:\n  app:\n    file: ./absent.conf\n",
            tmp.path().to_path_buf(),
        )
        .expect("parse");

        let err = resolve(&runtime, "demo", &config)
            .await
            .expect_err("should fail");
        assert!(matches!(err, ResourceError::FileNotFound { kind: "config", .. }));
    }

    #[tokio::test]
    async fn external_secret_is_an_error() {
        let runtime = FakeRuntime::new();
        let config = config::from_str(
            "services:\n  web:\n    image: nginx\nsecrets:\n  token:\n    external: true\n",
            PathBuf::from("/srv/app"),
        )
        .expect("parse");

        let err = resolve(&runtime, "demo", &config)
            .await
            .expect_err("should fail");
        assert!(matches!(err, ResourceError::External { kind: "secret", .. }));
    }
}
