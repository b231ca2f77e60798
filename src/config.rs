//! Compose file model and loader.
//!
//! The loader normalizes the various shorthand forms a compose file
//! allows (string-or-list commands, `KEY=VAL` environment lists, short
//! mount and port syntax, human-readable byte sizes) into one canonical
//! shape, so the rest of the tool never sees the YAML-level variants.
//! Maps are sorted; the service list keeps document order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tool-level settings, overridable via `recompose.toml` and
/// `COMPOSE_`-prefixed environment variables (`COMPOSE_FILE`,
/// `COMPOSE_PROJECT_NAME`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("recompose.toml"))
            .merge(Env::prefixed("COMPOSE_"))
            .extract()
            .map_err(ConfigError::Settings)
    }
}

/// A fully loaded compose file.
#[derive(Debug, Clone)]
pub struct ComposeConfig {
    /// Desired services, in the order they appear in the file.
    pub services: Vec<ServiceSpec>,
    pub networks: BTreeMap<String, NetworkSpec>,
    pub volumes: BTreeMap<String, VolumeSpec>,
    pub configs: BTreeMap<String, FileObjectSpec>,
    pub secrets: BTreeMap<String, FileObjectSpec>,
    /// Directory containing the compose file. Relative bind mounts and
    /// config/secret files resolve against this, not the process CWD.
    pub project_dir: PathBuf,
}

/// One desired service. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Taken from the key in the `services` mapping, not from the body.
    #[serde(skip_deserializing)]
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_command")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_command")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "de_string_map")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "de_string_map")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_mounts")]
    pub volumes: Vec<MountSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_string_or_list")]
    pub tmpfs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "de_networks")]
    pub networks: BTreeMap<String, EndpointSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_ports")]
    pub ports: Vec<PortSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_string_or_list")]
    pub expose: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_string_or_list")]
    pub dns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_string_or_list")]
    pub dns_search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "de_string_map")]
    pub sysctls: BTreeMap<String, String>,
    /// Shared memory size in bytes; accepts `"128m"`-style strings.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_bytes")]
    pub shm_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domainname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub tty: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stdin_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_file_refs")]
    pub configs: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de_file_refs")]
    pub secrets: Vec<FileRef>,
}

/// One mount of a service, already normalized from short or long syntax.
/// Bind sources may still be relative at this point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    pub kind: MountKind,
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
}

/// Per-network endpoint options of a service attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
}

/// One port exposure, normalized from short or long syntax. A port with
/// no published side is still exposed and published to an ephemeral host
/// port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSpec {
    pub target: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<u16>,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}

/// Service-level reference to a top-level config or secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeSpec {
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileObjectSpec {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub external: bool,
}

/// Raw file-level shape. Services stay untyped here so their document
/// order survives; everything else is order-insensitive.
#[derive(Debug, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: serde_yaml::Mapping,
    #[serde(default)]
    networks: BTreeMap<String, Option<NetworkSpec>>,
    #[serde(default)]
    volumes: BTreeMap<String, Option<VolumeSpec>>,
    #[serde(default)]
    configs: BTreeMap<String, Option<FileObjectSpec>>,
    #[serde(default)]
    secrets: BTreeMap<String, Option<FileObjectSpec>>,
}

/// Load a compose file from disk.
pub fn load(path: &Path) -> Result<ComposeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let canonical = path.canonicalize().map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let project_dir = canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    from_str(&text, project_dir)
}

/// Parse compose text against an explicit project directory.
pub fn from_str(text: &str, project_dir: PathBuf) -> Result<ComposeConfig, ConfigError> {
    let file: ComposeFile = serde_yaml::from_str(text)?;

    let mut services = Vec::with_capacity(file.services.len());
    for (key, value) in file.services {
        let name: String = serde_yaml::from_value(key)?;
        if value.is_null() {
            return Err(ConfigError::EmptyService(name));
        }
        let mut spec: ServiceSpec = serde_yaml::from_value(value)?;
        spec.name = name;
        services.push(spec);
    }

    Ok(ComposeConfig {
        services,
        networks: flatten(file.networks),
        volumes: flatten(file.volumes),
        configs: flatten(file.configs),
        secrets: flatten(file.secrets),
        project_dir,
    })
}

fn flatten<T: Default>(map: BTreeMap<String, Option<T>>) -> BTreeMap<String, T> {
    map.into_iter()
        .map(|(name, spec)| (name, spec.unwrap_or_default()))
        .collect()
}

/// Parse a human-readable byte size such as `"128m"` or `"2gb"` into a
/// byte count. Suffixes use a 1024 multiplier. An unparseable value is an
/// error, never a silent default.
pub fn parse_bytes(text: &str) -> Result<i64, ConfigError> {
    let trimmed = text.trim().to_ascii_lowercase();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(digits_end);
    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::ByteSize(text.to_string()))?;
    let multiplier: i64 = match suffix.trim() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        _ => return Err(ConfigError::ByteSize(text.to_string())),
    };
    Ok((value * multiplier as f64) as i64)
}

fn is_false(value: &bool) -> bool {
    !*value
}

// Short-syntax parsers. These return plain message strings; the
// deserializers wrap them into serde errors with YAML position info.

fn parse_mount(text: &str) -> Result<MountSpec, String> {
    let parts: Vec<&str> = text.split(':').collect();
    let (source, target, options) = match parts.len() {
        1 => (None, parts[0], None),
        2 => (Some(parts[0]), parts[1], None),
        3 => (Some(parts[0]), parts[1], Some(parts[2])),
        _ => return Err(format!("invalid mount '{}'", text)),
    };
    if target.is_empty() {
        return Err(format!("invalid mount '{}': empty target", text));
    }
    let read_only = match options {
        None | Some("rw") => false,
        Some("ro") => true,
        Some(other) => return Err(format!("invalid mount option '{}' in '{}'", other, text)),
    };
    let kind = match source {
        Some(s) if s.starts_with('/') || s.starts_with('.') || s.starts_with('~') => {
            MountKind::Bind
        }
        _ => MountKind::Volume,
    };
    Ok(MountSpec {
        kind,
        source: source.map(str::to_string),
        target: target.to_string(),
        read_only,
    })
}

fn parse_port(text: &str) -> Result<PortSpec, String> {
    let (spec, protocol) = match text.split_once('/') {
        Some((spec, proto)) => (spec, proto.to_string()),
        None => (text, "tcp".to_string()),
    };
    let parts: Vec<&str> = spec.split(':').collect();
    let (host_ip, published, target) = match parts.len() {
        1 => (None, None, parts[0]),
        2 => (None, Some(parts[0]), parts[1]),
        3 => (Some(parts[0]), Some(parts[1]), parts[2]),
        _ => return Err(format!("invalid port '{}'", text)),
    };
    let target: u16 = target
        .parse()
        .map_err(|_| format!("invalid container port in '{}'", text))?;
    let published = match published {
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| format!("invalid published port in '{}'", text))?,
        ),
        None => None,
    };
    Ok(PortSpec {
        target,
        published,
        protocol,
        host_ip: host_ip.map(str::to_string),
    })
}

// Deserialization helpers for the shorthand forms.

fn de_opt_command<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Shell(String),
        Exec(Vec<String>),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        // Shell form is split on whitespace; quoted arguments need the
        // list form.
        Some(Raw::Shell(text)) => Some(text.split_whitespace().map(str::to_string).collect()),
        Some(Raw::Exec(words)) => Some(words),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Accepts `{KEY: value}` maps (scalar or null values) and
/// `["KEY=value", "KEY"]` lists; yields a sorted map.
fn de_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Map(BTreeMap<String, Option<Scalar>>),
        List(Vec<String>),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Map(map) => map
            .into_iter()
            .map(|(k, v)| (k, v.map(|s| s.to_string()).unwrap_or_default()))
            .collect(),
        Raw::List(entries) => entries
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry, String::new()),
            })
            .collect(),
    })
}

fn de_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(Scalar),
        Many(Vec<Scalar>),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(value) => vec![value.to_string()],
        Raw::Many(values) => values.into_iter().map(|v| v.to_string()).collect(),
    })
}

fn de_mounts<'de, D>(deserializer: D) -> Result<Vec<MountSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Short(String),
        Long {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            source: Option<String>,
            target: String,
            #[serde(default)]
            read_only: bool,
        },
    }
    let mut mounts = Vec::new();
    for raw in Vec::<Raw>::deserialize(deserializer)? {
        mounts.push(match raw {
            Raw::Short(text) => parse_mount(&text).map_err(de::Error::custom)?,
            Raw::Long {
                kind,
                source,
                target,
                read_only,
            } => {
                let kind = match kind.as_str() {
                    "bind" => MountKind::Bind,
                    "volume" => MountKind::Volume,
                    "tmpfs" => MountKind::Tmpfs,
                    other => {
                        return Err(de::Error::custom(format!("unknown mount type '{}'", other)))
                    }
                };
                MountSpec {
                    kind,
                    source,
                    target,
                    read_only,
                }
            }
        });
    }
    Ok(mounts)
}

fn de_networks<'de, D>(deserializer: D) -> Result<BTreeMap<String, EndpointSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Map(BTreeMap<String, Option<EndpointSpec>>),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(names) => names
            .into_iter()
            .map(|name| (name, EndpointSpec::default()))
            .collect(),
        Raw::Map(map) => map
            .into_iter()
            .map(|(name, endpoint)| (name, endpoint.unwrap_or_default()))
            .collect(),
    })
}

fn de_ports<'de, D>(deserializer: D) -> Result<Vec<PortSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Short(String),
        Long {
            target: u16,
            #[serde(default)]
            published: Option<u16>,
            #[serde(default)]
            protocol: Option<String>,
            #[serde(default)]
            host_ip: Option<String>,
        },
    }
    let mut ports = Vec::new();
    for raw in Vec::<Raw>::deserialize(deserializer)? {
        ports.push(match raw {
            Raw::Number(target) => PortSpec {
                target,
                published: None,
                protocol: "tcp".to_string(),
                host_ip: None,
            },
            Raw::Short(text) => parse_port(&text).map_err(de::Error::custom)?,
            Raw::Long {
                target,
                published,
                protocol,
                host_ip,
            } => PortSpec {
                target,
                published,
                protocol: protocol.unwrap_or_else(|| "tcp".to_string()),
                host_ip,
            },
        });
    }
    Ok(ports)
}

fn de_file_refs<'de, D>(deserializer: D) -> Result<Vec<FileRef>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Short(String),
        Long {
            source: String,
            #[serde(default)]
            target: Option<String>,
        },
    }
    Ok(Vec::<Raw>::deserialize(deserializer)?
        .into_iter()
        .map(|raw| match raw {
            Raw::Short(source) => FileRef {
                source,
                target: None,
            },
            Raw::Long { source, target } => FileRef { source, target },
        })
        .collect())
}

fn de_opt_bytes<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Count(i64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Count(bytes)) => Some(bytes),
        Some(Raw::Text(text)) => Some(parse_bytes(&text).map_err(de::Error::custom)?),
    })
}
