//! recompose entry point: converge a Compose file against the local
//! Docker daemon (`up`), or tear a project down (`down`).

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::info;

mod config;
mod error;
mod fingerprint;
mod materialize;
mod reconcile;
mod resources;
mod runtime;
mod teardown;

use config::Settings;
use runtime::DockerRuntime;

#[derive(Parser)]
#[command(
    name = "recompose",
    about = "Reconcile a Compose file against a local container runtime",
    version
)]
struct Cli {
    /// Compose file to load.
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Project name (default: the compose file's directory name).
    #[arg(short = 'n', long = "project-name", global = true)]
    project_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and start the declared services.
    Up,
    /// Remove the project's containers, volumes and networks.
    Down,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    let file = cli
        .file
        .or(settings.file)
        .unwrap_or_else(|| PathBuf::from("compose.yaml"));
    let project = match cli.project_name.or(settings.project_name) {
        Some(name) => name,
        None => default_project_name(&file)?,
    };

    let runtime = DockerRuntime::connect()?;

    match cli.command {
        Command::Up => {
            let config = config::load(&file)?;
            info!("Reconciling project {} from {}", project, file.display());
            reconcile::up(&runtime, &project, &config).await?;
        }
        Command::Down => {
            info!("Tearing down project {}", project);
            teardown::down(&runtime, &project).await?;
        }
    }

    Ok(())
}

/// Default project name: the compose file's containing directory. Only
/// the path is consulted, so `down` works without a readable file.
fn default_project_name(file: &Path) -> anyhow::Result<String> {
    let absolute = if file.is_absolute() {
        file.to_path_buf()
    } else {
        std::env::current_dir()?.join(file)
    };
    absolute
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("cannot derive a project name from {}", file.display()))
}
