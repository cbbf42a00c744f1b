//! Layered configuration: TOML file, then `RODWATCH_` environment variables,
//! then command-line flags.

use crate::RunArgs;
use anyhow::{Context, Result};
use clap::ValueEnum;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use rodwatch_core::config::{AppConfig, StorageConfig};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/rodwatch.toml";

/// Storage backend selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Baton,
    Memory,
}

/// Load configuration from an optional file and the environment.
///
/// A missing default file is not an error; a missing explicit file is.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(&path));
    } else if explicit.is_some() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    figment = figment.merge(Env::prefixed("RODWATCH_").ignore(&["CONFIG"]).split("__"));

    figment
        .extract()
        .map_err(|err| anyhow::anyhow!(err))
        .context("failed to load configuration")
}

/// Apply command-line overrides on top of loaded configuration.
pub fn apply_overrides(config: &mut AppConfig, args: &RunArgs) {
    let engine = &mut config.engine;
    if let Some(threads) = args.threads {
        engine.num_threads = threads;
    }
    if let Some(clients) = args.clients {
        engine.num_clients = clients;
    }
    if let Some(replicas) = args.num_replicas {
        engine.expected_replicas = replicas;
    }
    if !args.checks.is_empty() {
        engine.checks = args.checks.clone();
    }
    if args.overwrite {
        engine.overwrite = true;
    }
    if args.dry_run {
        engine.repair.dry_run = true;
    }
    if let Some(secs) = args.timeout {
        engine.run_timeout_secs = Some(secs);
    }

    match args.backend {
        Some(Backend::Baton) => {
            if !matches!(config.storage, StorageConfig::Baton { .. }) {
                config.storage = StorageConfig::default();
            }
        }
        Some(Backend::Memory) => {
            let existing = match &config.storage {
                StorageConfig::Memory { snapshot } => snapshot.clone(),
                StorageConfig::Baton { .. } => None,
            };
            config.storage = StorageConfig::Memory {
                snapshot: args.snapshot.clone().or(existing),
            };
        }
        None => {
            if let (Some(file), StorageConfig::Memory { snapshot }) =
                (&args.snapshot, &mut config.storage)
            {
                *snapshot = Some(file.clone());
            }
        }
    }
}
