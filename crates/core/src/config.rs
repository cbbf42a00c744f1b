//! Configuration types shared across crates.

use crate::class::ObjectClass;
use crate::violation::CheckKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Reconciliation engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent worker tasks.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// Number of storage clients in the pool. May be smaller than `num_threads`.
    #[serde(default = "default_num_clients")]
    pub num_clients: usize,
    /// Maximum time a worker waits for a pooled client, in seconds.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Attempts to create a client before the pool reports a fatal fault.
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    /// Attempts per object when transient protocol errors occur.
    #[serde(default = "default_max_object_attempts")]
    pub max_object_attempts: u32,
    /// Expected number of valid replicas per data object.
    #[serde(default = "default_expected_replicas")]
    pub expected_replicas: usize,
    /// Per-class overrides of `expected_replicas`.
    #[serde(default)]
    pub replicas_by_class: BTreeMap<ObjectClass, usize>,
    /// Attributes required in addition to the built-in tables, per class.
    #[serde(default)]
    pub extra_required_metadata: BTreeMap<ObjectClass, Vec<String>>,
    /// Checks to run. Empty means all.
    #[serde(default)]
    pub checks: Vec<CheckKind>,
    /// Allow repairs to replace existing values.
    #[serde(default)]
    pub overwrite: bool,
    /// Keep going after per-object failures (default: true).
    #[serde(default = "default_best_effort")]
    pub best_effort: bool,
    /// Abandon remaining work after this many seconds.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Value written to `dcterms:creator` when it is missing.
    #[serde(default = "default_creator")]
    pub creator: String,
    #[serde(default)]
    pub repair: RepairConfig,
}

/// Repair behaviour.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Plan repairs and report them as skipped without writing anything.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_num_threads() -> usize {
    4
}

fn default_num_clients() -> usize {
    4
}

fn default_acquire_timeout_secs() -> u64 {
    60
}

fn default_max_connect_attempts() -> u32 {
    3
}

fn default_max_object_attempts() -> u32 {
    3
}

fn default_expected_replicas() -> usize {
    crate::DEFAULT_REPLICATION_FACTOR
}

fn default_best_effort() -> bool {
    true
}

fn default_creator() -> String {
    crate::attributes::DEFAULT_CREATOR.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            num_clients: default_num_clients(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            max_connect_attempts: default_max_connect_attempts(),
            max_object_attempts: default_max_object_attempts(),
            expected_replicas: default_expected_replicas(),
            replicas_by_class: BTreeMap::new(),
            extra_required_metadata: BTreeMap::new(),
            checks: Vec::new(),
            overwrite: false,
            best_effort: default_best_effort(),
            run_timeout_secs: None,
            creator: default_creator(),
            repair: RepairConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Expected valid replica count for objects of a class.
    pub fn expected_replicas_for(&self, class: ObjectClass) -> usize {
        self.replicas_by_class
            .get(&class)
            .copied()
            .unwrap_or(self.expected_replicas)
    }

    /// The checks enabled for a run.
    pub fn enabled_checks(&self) -> Vec<CheckKind> {
        if self.checks.is_empty() {
            CheckKind::ALL.to_vec()
        } else {
            let mut checks = self.checks.clone();
            checks.sort();
            checks.dedup();
            checks
        }
    }

    /// Validate engine configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_threads == 0 {
            return Err("engine.num_threads must be at least 1".to_string());
        }
        if self.num_clients == 0 {
            return Err("engine.num_clients must be at least 1".to_string());
        }
        if self.max_connect_attempts == 0 {
            return Err("engine.max_connect_attempts must be at least 1".to_string());
        }
        if self.max_object_attempts == 0 {
            return Err("engine.max_object_attempts must be at least 1".to_string());
        }
        if self.expected_replicas == 0 {
            return Err("engine.expected_replicas must be at least 1".to_string());
        }
        if let Some((class, _)) = self.replicas_by_class.iter().find(|(_, n)| **n == 0) {
            return Err(format!(
                "engine.replicas_by_class.{class} must be at least 1"
            ));
        }
        if self.run_timeout_secs == Some(0) {
            return Err("engine.run_timeout_secs cannot be 0".to_string());
        }
        if self.creator.trim().is_empty() {
            return Err("engine.creator cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// A `baton-do` subprocess per client.
    Baton {
        /// Program to run.
        #[serde(default = "default_baton_program")]
        program: String,
        /// Extra arguments passed to the program.
        #[serde(default)]
        args: Vec<String>,
        /// Resource that receives new replicas.
        #[serde(default)]
        resource: Option<String>,
        /// Seconds to wait for a single response line.
        #[serde(default = "default_baton_timeout_secs")]
        timeout_secs: u64,
    },
    /// In-process zone, optionally seeded from a JSON snapshot.
    Memory {
        #[serde(default)]
        snapshot: Option<PathBuf>,
    },
}

fn default_baton_program() -> String {
    "baton-do".to_string()
}

fn default_baton_timeout_secs() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Baton {
            program: default_baton_program(),
            args: Vec::new(),
            resource: None,
            timeout_secs: default_baton_timeout_secs(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Baton {
                program,
                timeout_secs,
                ..
            } => {
                if program.trim().is_empty() {
                    return Err("storage.program cannot be empty".to_string());
                }
                if *timeout_secs == 0 {
                    return Err("storage.timeout_secs cannot be 0".to_string());
                }
                Ok(())
            }
            StorageConfig::Memory { .. } => Ok(()),
        }
    }
}

/// Warehouse configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WarehouseConfig {
    /// No warehouse. Every object is checked without a reference.
    #[default]
    None,
    /// SQLite snapshot of the warehouse tables.
    Sqlite { path: PathBuf },
    /// MySQL warehouse.
    Mysql {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_mysql_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer RODWATCH_WAREHOUSE__PASSWORD over storing in config.
        password: Option<String>,
        database: Option<String>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_mysql_port() -> Option<u16> {
    Some(3306)
}

fn default_max_connections() -> u32 {
    4
}

impl WarehouseConfig {
    /// Validate warehouse configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            WarehouseConfig::None | WarehouseConfig::Sqlite { .. } => Ok(()),
            WarehouseConfig::Mysql {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("warehouse.max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "mysql config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "mysql config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

impl AppConfig {
    /// Configuration for tests: in-memory storage and no warehouse.
    pub fn for_testing() -> Self {
        Self {
            engine: EngineConfig::default(),
            storage: StorageConfig::Memory { snapshot: None },
            warehouse: WarehouseConfig::None,
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> crate::Result<()> {
        self.engine
            .validate()
            .and_then(|_| self.storage.validate())
            .and_then(|_| self.warehouse.validate())
            .map_err(crate::Error::InvalidConfig)
    }
}
