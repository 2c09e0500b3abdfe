//! Process configuration: a TOML file layered under CLI flags and environment
//! variables, resolved once into immutable settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Database created on the destination when none is configured.
pub const DEFAULT_DATABASE: &str = "graphdb";
/// Graph collection recreated on every run when none is configured.
pub const DEFAULT_COLLECTION: &str = "Northwind";
/// Provisioned throughput (request units per second) for the collection.
pub const DEFAULT_THROUGHPUT: u32 = 400;
/// Concurrent workers per load phase.
pub const DEFAULT_WORKERS: usize = 4;

const MIN_THROUGHPUT: u32 = 400;

/// Connection settings for the source graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Bolt URI, e.g. `bolt://localhost:7687`.
    pub uri: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
}

/// Connection and provisioning settings for the destination graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSettings {
    /// Account endpoint, e.g. `https://acct.documents.azure.com:443/`.
    pub endpoint: String,
    /// Base64 master key.
    pub auth_key: String,
    /// Gremlin WebSocket endpoint.
    pub gremlin_endpoint: String,
    /// Database id.
    pub database: String,
    /// Graph collection id.
    pub collection: String,
}

/// Knobs the orchestrator reads while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Maximum concurrent workers per phase.
    pub workers: usize,
    /// Throughput provisioned on the recreated collection.
    pub throughput: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            throughput: DEFAULT_THROUGHPUT,
        }
    }
}

/// Values supplied on the command line or through the environment. Each one
/// wins over the matching file entry.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct Overrides {
    pub source_uri: Option<String>,
    pub source_user: Option<String>,
    pub source_password: Option<String>,
    pub endpoint: Option<String>,
    pub auth_key: Option<String>,
    pub gremlin_endpoint: Option<String>,
    pub database: Option<String>,
    pub collection: Option<String>,
    pub throughput: Option<u32>,
    pub workers: Option<usize>,
}

/// Contents of the TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    source: RawSource,
    #[serde(default)]
    destination: RawDestination,
    #[serde(default)]
    migration: RawMigration,
    #[serde(skip)]
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDestination {
    endpoint: Option<String>,
    auth_key: Option<String>,
    gremlin_endpoint: Option<String>,
    database: Option<String>,
    collection: Option<String>,
    throughput: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMigration {
    workers: Option<usize>,
}

impl FileConfig {
    /// Loads the config file at `explicit`, or at [`default_config_path`] when
    /// no path is given. A missing default file yields an empty config; a
    /// missing explicit file is an error.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                let mut config = read_file(&path)?;
                config.path = Some(path);
                Ok(config)
            }
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    let mut config = read_file(&path)?;
                    config.path = Some(path);
                    Ok(config)
                }
                _ => Ok(FileConfig::default()),
            },
        }
    }

    /// Parses config text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Path the config was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Merged configuration. Accessors validate only the part they return, so a
/// run that never touches the destination does not need its credentials.
#[derive(Debug, Clone)]
pub struct Settings {
    source_uri: Option<String>,
    source_user: Option<String>,
    source_password: Option<String>,
    endpoint: Option<String>,
    auth_key: Option<String>,
    gremlin_endpoint: Option<String>,
    database: Option<String>,
    collection: Option<String>,
    throughput: Option<u32>,
    workers: Option<usize>,
    file: Option<PathBuf>,
}

impl Settings {
    /// Layers `overrides` on top of `file`.
    pub fn merge(file: FileConfig, overrides: Overrides) -> Self {
        Self {
            source_uri: overrides.source_uri.or(file.source.uri),
            source_user: overrides.source_user.or(file.source.user),
            source_password: overrides.source_password.or(file.source.password),
            endpoint: overrides.endpoint.or(file.destination.endpoint),
            auth_key: overrides.auth_key.or(file.destination.auth_key),
            gremlin_endpoint: overrides
                .gremlin_endpoint
                .or(file.destination.gremlin_endpoint),
            database: overrides.database.or(file.destination.database),
            collection: overrides.collection.or(file.destination.collection),
            throughput: overrides.throughput.or(file.destination.throughput),
            workers: overrides.workers.or(file.migration.workers),
            file: file.path,
        }
    }

    /// Config file the settings were read from.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Source connection settings.
    pub fn source(&self) -> Result<SourceSettings, ConfigError> {
        let uri = required("source.uri", &self.source_uri)?;
        if !uri.contains("://") {
            return Err(ConfigError::Invalid {
                field: "source.uri",
                reason: format!("'{uri}' is not a URI"),
            });
        }
        Ok(SourceSettings {
            uri,
            user: required("source.user", &self.source_user)?,
            password: required("source.password", &self.source_password)?,
        })
    }

    /// Destination connection settings.
    pub fn destination(&self) -> Result<DestinationSettings, ConfigError> {
        let endpoint = required("destination.endpoint", &self.endpoint)?;
        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(ConfigError::Invalid {
                field: "destination.endpoint",
                reason: format!("'{endpoint}' must be an http(s) URL"),
            });
        }
        let gremlin_endpoint = match non_empty(&self.gremlin_endpoint) {
            Some(url) => url,
            None => derive_gremlin_endpoint(&endpoint).ok_or(ConfigError::Missing {
                field: "destination.gremlin_endpoint",
            })?,
        };
        if !gremlin_endpoint.starts_with("wss://") && !gremlin_endpoint.starts_with("ws://") {
            return Err(ConfigError::Invalid {
                field: "destination.gremlin_endpoint",
                reason: format!("'{gremlin_endpoint}' must be a ws(s) URL"),
            });
        }
        Ok(DestinationSettings {
            endpoint,
            auth_key: required("destination.auth_key", &self.auth_key)?,
            gremlin_endpoint,
            database: non_empty(&self.database).unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            collection: non_empty(&self.collection)
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
        })
    }

    /// Orchestrator settings.
    pub fn migration(&self) -> Result<MigrationConfig, ConfigError> {
        let workers = self.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                field: "migration.workers",
                reason: "must be at least 1".into(),
            });
        }
        let throughput = self.throughput.unwrap_or(DEFAULT_THROUGHPUT);
        if throughput < MIN_THROUGHPUT {
            return Err(ConfigError::Invalid {
                field: "destination.throughput",
                reason: format!("must be at least {MIN_THROUGHPUT}"),
            });
        }
        Ok(MigrationConfig {
            workers,
            throughput,
        })
    }

    /// Resolved values for display, secrets masked.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "<unset>".into());
        let mask = |value: &Option<String>| match value {
            Some(v) if !v.is_empty() => "********".to_string(),
            _ => "<unset>".to_string(),
        };
        let gremlin = non_empty(&self.gremlin_endpoint)
            .or_else(|| {
                non_empty(&self.endpoint).and_then(|endpoint| derive_gremlin_endpoint(&endpoint))
            })
            .unwrap_or_else(|| "<unset>".into());
        vec![
            (
                "config file",
                self.file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<none>".into()),
            ),
            ("source.uri", show(&self.source_uri)),
            ("source.user", show(&self.source_user)),
            ("source.password", mask(&self.source_password)),
            ("destination.endpoint", show(&self.endpoint)),
            ("destination.auth_key", mask(&self.auth_key)),
            ("destination.gremlin_endpoint", gremlin),
            (
                "destination.database",
                non_empty(&self.database).unwrap_or_else(|| DEFAULT_DATABASE.into()),
            ),
            (
                "destination.collection",
                non_empty(&self.collection).unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            ),
            (
                "destination.throughput",
                self.throughput.unwrap_or(DEFAULT_THROUGHPUT).to_string(),
            ),
            (
                "migration.workers",
                self.workers.unwrap_or(DEFAULT_WORKERS).to_string(),
            ),
        ]
    }
}

/// Maps a Cosmos DB account endpoint onto its Gremlin endpoint:
/// `https://acct.documents.azure.com:443/` becomes
/// `wss://acct.gremlin.cosmos.azure.com:443/`.
pub fn derive_gremlin_endpoint(endpoint: &str) -> Option<String> {
    let rest = endpoint.strip_prefix("https://")?;
    let (host, tail) = match rest.find([':', '/']) {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let account = host.strip_suffix(".documents.azure.com")?;
    if account.is_empty() {
        return None;
    }
    let tail = if tail.is_empty() { ":443/" } else { tail };
    Some(format!("wss://{account}.gremlin.cosmos.azure.com{tail}"))
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML or has unknown keys.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A required value was not supplied anywhere.
    #[error("missing required setting '{field}'")]
    Missing { field: &'static str },
    /// A value was supplied but is unusable.
    #[error("invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// `$XDG_CONFIG_HOME/neo2cosmos/config.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("neo2cosmos").join("config.toml"))
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(field: &'static str, value: &Option<String>) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing { field })
}
