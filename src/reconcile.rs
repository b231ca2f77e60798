//! The reconciliation engine.
//!
//! One pass compares every desired service against the containers
//! observed for it and applies the difference: create when nothing
//! exists, keep when every container's recorded configuration matches,
//! replace the whole set when any container diverges. Containers whose
//! service no longer appears in the configuration are removed last.
//!
//! The pass is sequential and fail-fast: the first runtime failure
//! aborts it, leaving earlier mutations in place. Replacement is always
//! remove-then-create; a running container is never mutated in place.
//! Exited containers whose configuration still matches are left alone,
//! not restarted. Ordering between services (`depends_on`) is not
//! implemented.

use log::{debug, info};

use crate::config::{ComposeConfig, ServiceSpec};
use crate::error::ComposeError;
use crate::fingerprint::fingerprint;
use crate::materialize;
use crate::resources::{self, ResolvedResources};
use crate::runtime::{observed_state, ContainerRuntime};

/// Converge the runtime to the desired configuration. Shared resources
/// are resolved first; no container is touched if that fails.
pub async fn up<R: ContainerRuntime>(
    runtime: &R,
    project: &str,
    config: &ComposeConfig,
) -> Result<(), ComposeError> {
    let resolved = resources::resolve(runtime, project, config).await?;
    let mut observed = observed_state(runtime.list_containers(project).await?);

    for service in &config.services {
        let containers = observed.remove(&service.name).unwrap_or_default();

        if containers.is_empty() {
            create_service(runtime, project, config, service, &resolved).await?;
            continue;
        }

        let expected = fingerprint(service);
        let diverged = containers
            .iter()
            .any(|c| c.fingerprint.as_deref() != Some(expected.as_str()));
        if !diverged {
            debug!(
                "Service {} is up to date, keeping {} container(s)",
                service.name,
                containers.len()
            );
            continue;
        }

        // Any divergence replaces the whole container set for the
        // service; partial replacement is never attempted.
        info!(
            "Service {} diverged from its recorded configuration, replacing",
            service.name
        );
        for container in &containers {
            runtime.remove_container(&container.id).await?;
        }
        create_service(runtime, project, config, service, &resolved).await?;
    }

    // Whatever is left in the observed state has no desired service.
    for (name, orphans) in observed {
        info!(
            "Removing {} orphaned container(s) of service {}",
            orphans.len(),
            name
        );
        for container in orphans {
            runtime.remove_container(&container.id).await?;
        }
    }

    Ok(())
}

async fn create_service<R: ContainerRuntime>(
    runtime: &R,
    project: &str,
    config: &ComposeConfig,
    service: &ServiceSpec,
    resolved: &ResolvedResources,
) -> Result<(), ComposeError> {
    let (request, extra_networks) =
        materialize::container_request(service, resolved, project, &config.project_dir)?;

    let id = runtime.create_container(request).await?;
    for (network, attachment) in extra_networks {
        runtime.connect_network(&id, &network, attachment).await?;
    }
    runtime.start_container(&id).await?;

    info!("Created container {} for service {}", id, service.name);
    Ok(())
}
