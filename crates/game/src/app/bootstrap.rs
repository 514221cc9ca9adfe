use std::env;
use std::fs;
use std::path::PathBuf;

use isoworld::{ConfigError, EntityRegistry, SavePaths, World, WorldConfig, WorldError};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub(crate) const SAVE_ROOT_ENV_VAR: &str = "ISOWORLD_SAVE_ROOT";
pub(crate) const SAVE_NAME_ENV_VAR: &str = "ISOWORLD_SAVE_NAME";
pub(crate) const CONFIG_ENV_VAR: &str = "ISOWORLD_CONFIG";
pub(crate) const TICKS_ENV_VAR: &str = "ISOWORLD_TICKS";

const DEFAULT_SAVE_ROOT: &str = "saves";
const DEFAULT_SAVE_NAME: &str = "default";
const DEFAULT_TICKS: u64 = 600;

#[derive(Debug, Error)]
pub(crate) enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("{var} must be a non-negative whole number, got {raw:?}")]
    InvalidTicks { var: &'static str, raw: String },
    #[error("{var} must not be empty")]
    EmptySaveName { var: &'static str },
    #[error("failed to read world config {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid world config {} at {json_path}: {source}", path.display())]
    ParseConfig {
        path: PathBuf,
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid world config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("failed to open world: {0}")]
    World(#[from] WorldError),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HarnessSettings {
    pub(crate) save_paths: SavePaths,
    pub(crate) config: WorldConfig,
    pub(crate) ticks: u64,
}

pub(crate) struct AppWiring {
    pub(crate) world: World,
    pub(crate) ticks: u64,
}

pub(crate) fn build_app() -> Result<AppWiring, StartupError> {
    init_tracing();
    info!("=== isoworld startup ===");

    let settings = resolve_settings(|var| env::var(var))?;
    info!(
        save = %settings.save_paths.root().display(),
        ticks = settings.ticks,
        chunk_size = settings.config.chunk_size,
        seed = settings.config.seed,
        "harness_settings_resolved"
    );
    wire(settings)
}

pub(crate) fn wire(settings: HarnessSettings) -> Result<AppWiring, StartupError> {
    let world = World::open(
        settings.save_paths,
        settings.config,
        EntityRegistry::with_builtin_kinds(),
    )?;
    Ok(AppWiring {
        world,
        ticks: settings.ticks,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Resolves harness settings through `lookup`, which behaves like
/// [`std::env::var`].
pub(crate) fn resolve_settings(
    lookup: impl Fn(&'static str) -> Result<String, env::VarError>,
) -> Result<HarnessSettings, StartupError> {
    let optional = |var: &'static str| match lookup(var) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(source) => Err(StartupError::EnvVar { var, source }),
    };

    let save_root = optional(SAVE_ROOT_ENV_VAR)?
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_ROOT));
    let save_name = optional(SAVE_NAME_ENV_VAR)?.unwrap_or_else(|| DEFAULT_SAVE_NAME.to_string());
    let save_name = save_name.trim();
    if save_name.is_empty() {
        return Err(StartupError::EmptySaveName {
            var: SAVE_NAME_ENV_VAR,
        });
    }

    let config = match optional(CONFIG_ENV_VAR)? {
        Some(path) => load_config(PathBuf::from(path))?,
        None => WorldConfig::default(),
    };

    let ticks = match optional(TICKS_ENV_VAR)? {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| StartupError::InvalidTicks {
                var: TICKS_ENV_VAR,
                raw,
            })?,
        None => DEFAULT_TICKS,
    };

    Ok(HarnessSettings {
        save_paths: SavePaths::new(save_root, save_name),
        config,
        ticks,
    })
}

pub(crate) fn load_config(path: PathBuf) -> Result<WorldConfig, StartupError> {
    let raw = fs::read_to_string(&path).map_err(|source| StartupError::ReadConfig {
        path: path.clone(),
        source,
    })?;
    let mut deserializer = serde_json::Deserializer::from_str(&raw);
    let config: WorldConfig =
        serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
            let json_path = error.path().to_string();
            StartupError::ParseConfig {
                path: path.clone(),
                json_path,
                source: error.into_inner(),
            }
        })?;
    config.validate()?;
    Ok(config)
}
