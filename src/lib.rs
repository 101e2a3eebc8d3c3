pub mod api;
pub mod assembla;
pub mod build;
pub mod cause;
pub mod dispatch;
pub mod error;
pub mod invoke;
pub mod logging;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod utils;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use assembla::{AssemblaClient, DEFAULT_API_URL, OfflineRepositoryApi, RepositoryApi};
use dispatch::TriggerService;
use error::TriggerError;
use policy::{ActionFilter, TriggerConfig, TriggerOn};
use registry::JobId;
use scheduler::LocalScheduler;

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Build finished.  Tests PASSED.";
pub const DEFAULT_UNSTABLE_MESSAGE: &str = "Build finished.  Tests FAILED.";
pub const DEFAULT_FAILURE_MESSAGE: &str = "Build finished.  Tests FAILED.";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BUILDS: usize = 100;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TriggerSettings {
    #[serde(default)]
    pub assembla: AssemblaSettings,
    pub webhook_secret: Option<String>,
    #[serde(default = "default_max_builds")]
    pub max_builds: usize,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobDefinition>,
}

/// Global Assembla settings: bot credentials and build status messages.
///
/// The messages are stored for whoever reports build results back; the
/// trigger engine itself does not use them.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct AssemblaSettings {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub bot_api_key: String,
    #[serde(default, skip_serializing)]
    pub bot_api_secret: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_success_message")]
    pub success_message: String,
    #[serde(default = "default_unstable_message")]
    pub unstable_message: String,
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
}

impl Default for AssemblaSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            bot_api_key: String::new(),
            bot_api_secret: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            success_message: default_success_message(),
            unstable_message: default_unstable_message(),
            failure_message: default_failure_message(),
        }
    }
}

impl AssemblaSettings {
    /// Returns true if both bot credentials are set.
    pub fn has_credentials(&self) -> bool {
        !self.bot_api_key.is_empty() && !self.bot_api_secret.is_empty()
    }

    /// Credentials must be given together or not at all.
    pub fn validate(&self) -> Result<(), TriggerError> {
        match (self.bot_api_key.is_empty(), self.bot_api_secret.is_empty()) {
            (false, true) => Err(TriggerError::ConfigError(
                "You must provide an API secret for the bot user".to_string(),
            )),
            (true, false) => Err(TriggerError::ConfigError(
                "You must provide an API key for the bot user".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A build job and its Assembla trigger settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub space_name: String,
    #[serde(default)]
    pub repo_name: String,
    #[serde(default = "default_trigger_on")]
    pub trigger_on: Vec<TriggerOn>,
    #[serde(default = "default_true")]
    pub build_on_push: bool,
    #[serde(default)]
    pub quiet_period_secs: u64,
    /// Declared parameters and their default values
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Default for JobDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            space_name: String::new(),
            repo_name: String::new(),
            trigger_on: default_trigger_on(),
            build_on_push: true,
            quiet_period_secs: 0,
            parameters: BTreeMap::new(),
        }
    }
}

impl JobDefinition {
    pub fn id(&self) -> JobId {
        JobId::new(self.name.clone())
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            space_name: self.space_name.clone(),
            repo_name: self.repo_name.clone(),
            filter: ActionFilter::new(self.trigger_on.iter().copied()),
            build_on_push: self.build_on_push,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_trigger_on() -> Vec<TriggerOn> {
    ActionFilter::default().actions().collect()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_builds() -> usize {
    DEFAULT_MAX_BUILDS
}

fn default_success_message() -> String {
    DEFAULT_SUCCESS_MESSAGE.to_string()
}

fn default_unstable_message() -> String {
    DEFAULT_UNSTABLE_MESSAGE.to_string()
}

fn default_failure_message() -> String {
    DEFAULT_FAILURE_MESSAGE.to_string()
}

impl TriggerSettings {
    /// Rejects duplicate job names and half-configured credentials.
    pub fn validate(&self) -> Result<(), TriggerError> {
        self.assembla.validate()?;

        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(TriggerError::ConfigError("Job with empty name".to_string()));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(TriggerError::ConfigError(format!(
                    "Duplicate job name '{}'",
                    job.name
                )));
            }
        }
        Ok(())
    }

    /// Environment variables override the file's credentials.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ASSEMBLA_API_KEY") {
            self.assembla.bot_api_key = key;
        }
        if let Ok(secret) = std::env::var("ASSEMBLA_API_SECRET") {
            self.assembla.bot_api_secret = secret;
        }
    }
}

/// Parses and validates a configuration document.
pub fn parse_config(config_str: &str) -> Result<TriggerSettings, TriggerError> {
    let mut config: TriggerSettings = toml::from_str(config_str)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<TriggerSettings, TriggerError> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        TriggerError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    parse_config(&config_str).map_err(|e| {
        TriggerError::ConfigError(format!("Failed to load config file '{}': {}", path.display(), e))
    })
}

/// Async variant used by the reload endpoint
pub async fn reload_config(path: impl AsRef<Path>) -> Result<TriggerSettings, TriggerError> {
    let path = path.as_ref();
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        TriggerError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    parse_config(&config_str)
}

/// Builds the Assembla client, or the offline stand-in when no bot
/// credentials are configured.
pub async fn connect_repository_api(
    settings: &AssemblaSettings,
) -> Result<Arc<dyn RepositoryApi>, TriggerError> {
    if !settings.has_credentials() {
        warn!("No Assembla bot credentials configured; repository lookups run offline");
        return Ok(Arc::new(OfflineRepositoryApi));
    }

    let client = AssemblaClient::new(
        settings.api_url.clone(),
        Duration::from_secs(settings.request_timeout_secs),
    )?;
    client
        .authenticate(&settings.bot_api_key, &settings.bot_api_secret)
        .await?;
    Ok(Arc::new(client))
}

pub struct AppState {
    pub config: RwLock<TriggerSettings>,
    pub config_path: PathBuf,
    pub service: TriggerService,
    pub scheduler: Arc<LocalScheduler>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Re-registers triggers and job definitions from `new_config`.
    ///
    /// Job definitions are replaced before the bindings, so a newly bound job
    /// is already known when a lookup finds it.
    pub fn apply_config(&self, new_config: TriggerSettings) {
        let mut config = self.config.write().unwrap_or_else(|p| p.into_inner());
        self.scheduler.replace_jobs(&new_config.jobs);
        self.service.registry().sync(&config.jobs, &new_config.jobs);
        *config = new_config;
    }

    /// Applies a reloaded configuration.
    ///
    /// Changed `[assembla]` settings get a freshly connected repository API
    /// first. If that fails, nothing is applied.
    pub async fn reload(&self, new_config: TriggerSettings) -> Result<(), TriggerError> {
        let assembla_changed = {
            let config = self.config.read().unwrap_or_else(|p| p.into_inner());
            config.assembla != new_config.assembla
        };
        if assembla_changed {
            let api = connect_repository_api(&new_config.assembla).await?;
            self.service.replace_repository_api(api);
            info!("Repository API reconnected for {}", new_config.assembla.api_url);
        }
        self.apply_config(new_config);
        Ok(())
    }
}

pub type SharedState = Arc<AppState>;
