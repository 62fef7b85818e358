use crate::conf::ConfigType;
use crate::scheduler;
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = include_str!("./default_config.toml");

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    pub general: General,
    pub development: Development,
    pub server: Server,
    pub scheduler: Scheduler,
    pub object_store: ObjectStore,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct General {
    /// The entire service's log level, including the worker pool.
    pub log_level: String,

    /// Controls how long the event bus will hold onto events before discarding them (in seconds).
    pub event_log_retention: u64,

    /// How often the background process for pruning events should run (in seconds).
    pub event_prune_interval: u64,

    /// How many worker tasks consume the dispatch queue concurrently.
    pub worker_pool_size: u64,

    /// Time in seconds the container executor will wait for a container to stop gracefully before
    /// it is forcefully killed.
    pub container_stop_timeout: u64,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Development {
    /// Tells the logging package to use human readable output instead of JSON.
    pub pretty_logging: bool,
}

/// Whether volume cleanup should be skipped after a run finishes so runs can be inspected on
/// disk. Reads the bare `ENV_TYPE` environment variable directly rather than through the
/// `DISCOVERY_`-prefixed figment overlay, matching the literal interface named in this crate's
/// environment contract: cleanup runs unless `ENV_TYPE=DEV`, and an unset `ENV_TYPE` defaults to
/// `"DEV"` exactly as the original does.
pub fn is_dev_environment() -> bool {
    std::env::var("ENV_TYPE").unwrap_or_else(|_| "DEV".to_string()) == "DEV"
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Server {
    /// Path to the sqlite database file backing the registry and run store.
    pub storage_path: String,

    /// Base host path under which per-run volume directories are created.
    pub volumes_path: String,

    /// In-container mount point for the run's volume.
    pub guest_volume_path: String,

    /// The total amount of results the registry will return when a limit is not given.
    pub storage_results_limit: u64,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Scheduler {
    pub engine: scheduler::Engine,
    pub docker: Option<scheduler::docker::Config>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct ObjectStore {
    /// Local filesystem root used by the in-process `object_store` backend.
    pub root: String,

    /// Url accepted by `object_store::parse_url`, if the deployment targets a remote store
    /// (e.g. `s3://bucket/prefix`). When empty, the local filesystem root above is used instead.
    pub url: Option<String>,
}

impl ConfigType for Config {
    fn default_config() -> &'static str {
        DEFAULT_CONFIG
    }

    // In debug builds we look in the user's home directory first so a developer's local config
    // never collides with a real deployment's `/etc` config.
    #[cfg(debug_assertions)]
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/discovery-schema/config.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".discovery-schema_dev.toml"));
            paths.push(home.join(".config/discovery-schema_dev.toml"));
        }
        paths
    }

    #[cfg(not(debug_assertions))]
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/discovery-schema/config.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".discovery-schema.toml"));
            paths.push(home.join(".config/discovery-schema.toml"));
        }
        paths
    }

    fn env_prefix() -> &'static str {
        "DISCOVERY_"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn loads_defaults_with_no_overrides() {
        let config = crate::conf::Configuration::<Config>::load(None).unwrap();
        assert_eq!(config.server.guest_volume_path, "/workspace");
        assert_eq!(config.scheduler.engine, scheduler::Engine::Docker);
    }
}
