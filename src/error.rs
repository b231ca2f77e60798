//! Error kinds surfaced by the loader, the resource resolver and the
//! runtime client. Every failure is terminal for the invocation that hit
//! it; there is no retry or rollback anywhere.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed or unreadable configuration. Raised before any runtime
/// mutation happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read compose file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse compose file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("service '{0}' has no body")]
    EmptyService(String),
    #[error("invalid byte size '{0}'")]
    ByteSize(String),
    #[error("unknown restart policy '{0}'")]
    RestartPolicy(String),
    #[error("service references undeclared {kind} '{name}'")]
    UndeclaredReference { kind: &'static str, name: String },
    #[error("cannot load settings: {0}")]
    Settings(#[from] figment::Error),
}

/// Failure to resolve or provision a shared resource (network, volume,
/// config or secret file). Raised before any container mutation.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{kind} '{name}' must declare a file")]
    MissingFile { kind: &'static str, name: String },
    #[error("{kind} file for '{name}' not found at {path}")]
    FileNotFound {
        kind: &'static str,
        name: String,
        path: PathBuf,
    },
    #[error("external {kind} '{name}' is not supported")]
    External { kind: &'static str, name: String },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A runtime client call failed. Aborts the remainder of the pass;
/// containers already mutated are left as-is.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime API error: {0}")]
    Api(#[from] bollard::errors::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
