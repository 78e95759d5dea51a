use std::env;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, File};
use dotenv::dotenv;
use secrecy::SecretString;

use crate::models::window::DEFAULT_WINDOW_HOURS;
use crate::utils::glucose::{MAX_PLAUSIBLE_MG_DL, MIN_PLAUSIBLE_MG_DL};

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub log_store: LogStoreSettings,
    #[serde(default)]
    pub health: HealthSettings,
    pub sync: SyncSettings,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct ApplicationSettings {
    pub log_level: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct LogStoreSettings {
    /// sqlx SQLite URL, e.g. `sqlite://glyco.db` or `sqlite::memory:`.
    pub database_url: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct HealthSettings {
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default = "default_min_glucose")]
    pub min_glucose_mg_dl: i32,
    #[serde(default = "default_max_glucose")]
    pub max_glucose_mg_dl: i32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            min_glucose_mg_dl: default_min_glucose(),
            max_glucose_mg_dl: default_max_glucose(),
        }
    }
}

fn default_window_hours() -> u32 {
    DEFAULT_WINDOW_HOURS
}

fn default_min_glucose() -> i32 {
    MIN_PLAUSIBLE_MG_DL
}

fn default_max_glucose() -> i32 {
    MAX_PLAUSIBLE_MG_DL
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct SyncSettings {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_insights")]
    pub max_insights: usize,
}

impl SyncSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            request_timeout_ms: default_timeout_ms(),
            max_insights: default_max_insights(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_insights() -> usize {
    5
}

/// Reads `configuration/` under the current directory.
pub fn get_config() -> Result<Settings, ConfigError> {
    let base_path = env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {}", e)))?;
    get_config_from(&base_path.join("configuration"))
}

/// Layers `base.yml`, `<APP_ENVIRONMENT>.yml` and `APP__*` variables.
pub fn get_config_from(configuration_directory: &Path) -> Result<Settings, ConfigError> {
    dotenv().ok();

    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let env_filename = format!("{}.yml", environment.as_str());
    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("base.yml")))
        .add_source(File::from(configuration_directory.join(env_filename)).required(false))
        .add_source(
            config::Environment::default()
                .prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let mut settings = config.try_deserialize::<Settings>()?;

    // Client key is injected by the build pipeline, never committed
    if let Ok(api_key) = env::var("SYNC_API_KEY") {
        settings.sync.api_key = Some(SecretString::new(api_key.into_boxed_str()));
    }

    Ok(settings)
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. \
                Use either `local` or `production`.",
                other
            )),
        }
    }
}
