//! Console and rolling-file logging
//!
//! | Log File            | Component                        | Target Prefixes                        |
//! |---------------------|----------------------------------|----------------------------------------|
//! | batata-upstream.log | Root logger (all components)     | (all)                                  |
//! | registry.log        | Registry clients and their pool  | batata_upstream::nacos, ::pool         |
//! | upstream.log        | Cache, subscriptions, resolvers  | batata_upstream::cache, ::resolver, ::app |
//!
//! Files go to `~/batata/logs` unless `BATATA_UPSTREAM_LOG_DIR` or the
//! `[logging] dir` setting says otherwise.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::{Filter, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::settings::LogSettings;

const ROOT_LOG_FILE: &str = "batata-upstream.log";

struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "registry.log",
        targets: &["batata_upstream::nacos", "batata_upstream::pool"],
    },
    ComponentLogDef {
        file_name: "upstream.log",
        targets: &[
            "batata_upstream::cache",
            "batata_upstream::resolver",
            "batata_upstream::app",
        ],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/batata/logs", home))
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: false,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Build from the `[logging]` section; environment variables win.
    pub fn from_settings(settings: &LogSettings) -> Self {
        let log_dir = std::env::var("BATATA_UPSTREAM_LOG_DIR")
            .ok()
            .or_else(|| settings.dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);

        let level = std::env::var("BATATA_UPSTREAM_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .or_else(|| settings.level.parse().ok())
            .unwrap_or(Level::INFO);

        Self {
            log_dir,
            console_output: env_flag("BATATA_UPSTREAM_LOG_CONSOLE").unwrap_or(settings.console),
            console_level: level,
            file_logging: env_flag("BATATA_UPSTREAM_LOG_FILE").unwrap_or(settings.file),
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }
}

/// Keeps the non-blocking file writers alive; dropping it flushes them.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

fn file_layer<F>(
    config: &LoggingConfig,
    file_name: &str,
    filter: F,
    guards: &mut Vec<WorkerGuard>,
) -> Box<dyn Layer<Registry> + Send + Sync>
where
    F: Filter<Registry> + Send + Sync + 'static,
{
    let appender = RollingFileAppender::new(config.rotation.into(), &config.log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    Box::new(
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(filter),
    )
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level of the console and root file
/// layers. Component files take everything from their targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        layers.push(file_layer(config, ROOT_LOG_FILE, root_filter, &mut guards));

        for component in COMPONENT_LOGS {
            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }
            layers.push(file_layer(config, component.file_name, targets, &mut guards));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::debug!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}
