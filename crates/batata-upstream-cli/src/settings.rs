//! Command line and configuration loading
//!
//! Sources, later ones winning: `conf/upstream.toml` (or `--config`),
//! `BATATA_UPSTREAM__*` environment variables, command line overrides.

use std::path::{Path, PathBuf};

use batata_upstream::model::DEFAULT_GROUP;
use batata_upstream::{RegistryConfig, RouteConfig};
use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "conf/upstream";
pub const ENV_PREFIX: &str = "BATATA_UPSTREAM";

/// Resolve registry services into upstream dial targets
#[derive(Debug, Parser)]
#[command(name = "batata-upstream", version)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long = "config", env = "BATATA_UPSTREAM_CONFIG")]
    pub config: Option<PathBuf>,
    /// Registry server address
    #[arg(long = "server")]
    pub server: Option<String>,
    /// Registry server port
    #[arg(long = "port")]
    pub port: Option<u16>,
    /// Namespaces to open clients for, comma separated
    #[arg(long = "namespaces", value_delimiter = ',')]
    pub namespaces: Vec<String>,
    #[arg(long = "username", env = "BATATA_UPSTREAM_USERNAME")]
    pub username: Option<String>,
    #[arg(long = "password", env = "BATATA_UPSTREAM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve one service and print its dial targets
    Resolve {
        #[arg(short = 's', long = "service")]
        service: String,
        #[arg(short = 'g', long = "group", default_value = DEFAULT_GROUP)]
        group: String,
        #[arg(short = 'n', long = "namespace", default_value = "")]
        namespace: String,
        #[arg(long = "cluster")]
        clusters: Vec<String>,
    },
    /// Resolve every configured route once
    Routes,
    /// Resolve every configured route repeatedly until interrupted
    Watch {
        /// Seconds between two rounds
        #[arg(long = "interval", default_value_t = 5)]
        interval: u64,
    },
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// `[logging]` section.
#[derive(Clone, Debug, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub file: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_level(),
            console: true,
            file: false,
        }
    }
}

/// Whole configuration of the tool.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub logging: LogSettings,
}

impl UpstreamConfig {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        load_from(cli.config.as_deref(), cli)
    }
}

/// `BATATA_UPSTREAM__REGISTRY__NAMESPACES=dev,prod` lists are split on commas.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("registry.namespaces")
}

fn load_from(path: Option<&Path>, cli: &Cli) -> anyhow::Result<UpstreamConfig> {
    load_with(path, environment(), cli)
}

fn load_with(path: Option<&Path>, env: Environment, cli: &Cli) -> anyhow::Result<UpstreamConfig> {
    let mut builder = Config::builder();
    builder = match path {
        Some(path) => builder.add_source(File::from(path)),
        None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
    };
    builder = builder.add_source(env);

    if let Some(server) = &cli.server {
        builder = builder.set_override("registry.ip_addr", server.as_str())?;
    }
    if let Some(port) = cli.port {
        builder = builder.set_override("registry.port", i64::from(port))?;
    }
    if !cli.namespaces.is_empty() {
        builder = builder.set_override("registry.namespaces", cli.namespaces.clone())?;
    }
    if let Some(username) = &cli.username {
        builder = builder.set_override("registry.username", username.as_str())?;
    }
    if let Some(password) = &cli.password {
        builder = builder.set_override("registry.password", password.as_str())?;
    }

    let config: UpstreamConfig = builder.build()?.try_deserialize()?;
    config.registry.validate()?;
    Ok(config)
}
