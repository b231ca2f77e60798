//! Full project teardown.
//!
//! Removal order matters: containers consume networks and volumes, so
//! they go first, then volumes, then networks. Works from the project
//! label alone; the compose file does not need to load, or even exist.

use log::{debug, info};

use crate::error::ComposeError;
use crate::runtime::ContainerRuntime;

pub async fn down<R: ContainerRuntime>(runtime: &R, project: &str) -> Result<(), ComposeError> {
    let containers = runtime.list_containers(project).await?;
    info!(
        "Removing {} container(s) of project {}",
        containers.len(),
        project
    );
    for container in &containers {
        runtime.remove_container(&container.id).await?;
    }

    for volume in runtime.list_volumes(project).await? {
        debug!("Removing volume {}", volume);
        runtime.remove_volume(&volume).await?;
    }

    for network in runtime.list_networks(project).await? {
        debug!("Removing network {}", network);
        runtime.remove_network(&network).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::down;
    use crate::config;
    use crate::reconcile::up;
    use crate::runtime::fake::{FakeRuntime, Op};

    #[tokio::test]
    async fn removes_containers_then_volumes_then_networks() {
        let runtime = FakeRuntime::new();
        let config = config::from_str(
            "services:\n  web:\n    image: nginx\n    volumes:\n      - data:/srv\nvolumes:\n  data:\n",
            PathBuf::from("/srv/app"),
        )
        .expect("parse");
        up(&runtime, "demo", &config).await.expect("up");
        runtime.take_ops();

        down(&runtime, "demo").await.expect("down");

        let ops = runtime.take_ops();
        let remove_container = ops
            .iter()
            .position(|op| matches!(op, Op::Remove(_)))
            .expect("container removed");
        let remove_volume = ops
            .iter()
            .position(|op| matches!(op, Op::RemoveVolume(_)))
            .expect("volume removed");
        let remove_network = ops
            .iter()
            .position(|op| matches!(op, Op::RemoveNetwork(_)))
            .expect("network removed");
        assert!(remove_container < remove_volume);
        assert!(remove_volume < remove_network);
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn ignores_other_projects() {
        let runtime = FakeRuntime::new();
        runtime.seed_container("demo", "web", None, "running");
        runtime.seed_container("other", "web", None, "running");

        down(&runtime, "demo").await.expect("down");

        let remaining = runtime.containers();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].project, "other");
    }

    #[tokio::test]
    async fn down_on_an_empty_project_is_a_noop() {
        let runtime = FakeRuntime::new();
        down(&runtime, "demo").await.expect("down");
        assert!(runtime.take_ops().is_empty());
    }
}
