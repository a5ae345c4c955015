use crate::core::search::MAX_SEARCH_RESULTS;
use config::{Config, Environment};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix for environment overrides, e.g. SHELF__IDENTITY__USER_ID
const ENV_PREFIX: &str = "SHELF";

#[derive(Debug, Clone, Serialize, Deserialize, Default, Builder)]
pub struct FirestoreConfig {
    pub project_id: String,
    #[serde(default)]
    #[builder(default)]
    pub database_id: Option<String>,
    /// host:port of a local emulator, if any
    #[serde(default)]
    #[builder(default)]
    pub emulator_host: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub credentials_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[serde(default)]
#[builder(default)]
pub struct SearchConfig {
    /// Google books volumes endpoint
    pub endpoint: String,
    /// Clamped to [`MAX_SEARCH_RESULTS`]
    pub max_results: usize,
    /// Used in place of an empty query
    pub default_query: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.googleapis.com/books/v1/volumes".to_string(),
            max_results: MAX_SEARCH_RESULTS,
            default_query: "fiction".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl SearchConfig {
    pub fn effective_max_results(&self) -> usize {
        self.max_results.clamp(1, MAX_SEARCH_RESULTS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[serde(default)]
#[builder(default)]
pub struct FavoritesConfig {
    /// Top level collection holding one document per user
    pub users_collection: String,
    /// Per user sub collection holding one document per favorite
    pub favorites_collection: String,
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self {
            users_collection: "users".to_string(),
            favorites_collection: "favorites".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, Builder)]
#[serde(default)]
#[builder(default)]
pub struct IdentityConfig {
    /// Signed in user, none runs the app anonymously
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, Builder)]
#[builder(default)]
pub struct ShelfConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Favorites live in firestore when set, in process otherwise
    #[serde(default)]
    pub firestore: Option<FirestoreConfig>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub favorites: FavoritesConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSink {
    #[serde(flatten)]
    pub dest: LogType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogType {
    Stdout {
        #[serde(default = "default_true")]
        color: bool,
        #[serde(default)]
        json: bool,
        #[serde(default)]
        spans: bool,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        json: bool,
        #[serde(default)]
        rotation: FileRotation,
        #[serde(default)]
        max_files: usize,
        #[serde(default)]
        spans: bool,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub sinks: Vec<LogSink>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            sinks: vec![LogSink {
                dest: LogType::Stdout {
                    color: true,
                    json: false,
                    spans: false,
                },
            }],
        }
    }
}

impl LoggingConfig {
    /// Validates the logging configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.sinks.is_empty() {
            anyhow::bail!("At least one logging sink must be configured");
        }

        self.level.parse::<tracing::Level>().map_err(|_| {
            anyhow::anyhow!(
                "Invalid log level: '{}'. Valid levels: trace, debug, info, warn, error",
                self.level
            )
        })?;

        Ok(())
    }
}

impl ShelfConfig {
    /// Loads the yaml file at `path`, with SHELF__ prefixed
    /// environment variables taking precedence
    pub fn load(path: &PathBuf) -> Result<ShelfConfig, anyhow::Error> {
        let cfg = Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}
