//! Assembla REST API access
//!
//! Only two capabilities are needed: checking the bot credentials and
//! resolving the repository tool (display name and url) a webhook refers to.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, TriggerError};

pub const DEFAULT_API_URL: &str = "https://api.assembla.com";

/// A repository tool registered in an Assembla space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceTool {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Remote lookups consumed by the trigger engine
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Checks and stores the credentials used for later calls.
    async fn authenticate(&self, key: &str, secret: &str) -> Result<()>;

    /// Finds the repository tool of `space_wiki_name` matching `repository`,
    /// which may be either the tool's url or its name.
    async fn resolve_repository_tool(
        &self,
        space_wiki_name: &str,
        repository: &str,
    ) -> Result<SpaceTool>;
}

#[derive(Clone)]
struct Credentials {
    key: String,
    secret: String,
}

/// HTTP client for the Assembla v1 API
pub struct AssemblaClient {
    http: reqwest::Client,
    base_url: String,
    credentials: RwLock<Option<Credentials>>,
}

impl AssemblaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("assembla_trigger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TriggerError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: RwLock::new(None),
        })
    }

    fn credentials(&self) -> Result<Credentials> {
        let guard = self
            .credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .clone()
            .ok_or_else(|| TriggerError::UpstreamLookup("client is not authenticated".to_string()))
    }

    /// Appends `segments` to the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            TriggerError::ConfigError(format!("Invalid API url '{}': {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                TriggerError::ConfigError(format!("API url '{}' cannot have a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str], credentials: &Credentials) -> Result<reqwest::Response> {
        let url = self.endpoint(segments)?;
        debug!("GET {}", url);

        let response = self
            .http
            .get(url.clone())
            .header("X-Api-Key", &credentials.key)
            .header("X-Api-Secret", &credentials.secret)
            .send()
            .await
            .map_err(|e| TriggerError::UpstreamLookup(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TriggerError::UpstreamLookup(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl RepositoryApi for AssemblaClient {
    async fn authenticate(&self, key: &str, secret: &str) -> Result<()> {
        let credentials = Credentials {
            key: key.to_string(),
            secret: secret.to_string(),
        };
        self.get(&["v1", "user.json"], &credentials).await?;

        let mut guard = self
            .credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(credentials);
        info!("Authenticated against {}", self.base_url);
        Ok(())
    }

    async fn resolve_repository_tool(
        &self,
        space_wiki_name: &str,
        repository: &str,
    ) -> Result<SpaceTool> {
        let credentials = self.credentials()?;
        let segments = ["v1", "spaces", space_wiki_name, "space_tools", "repo.json"];
        let tools: Vec<SpaceTool> = self
            .get(&segments, &credentials)
            .await?
            .json()
            .await
            .map_err(|e| {
                TriggerError::UpstreamLookup(format!("Invalid space tools response: {}", e))
            })?;

        find_tool(tools, repository).ok_or_else(|| {
            TriggerError::UpstreamLookup(format!(
                "No repository '{}' in space '{}'",
                repository, space_wiki_name
            ))
        })
    }
}

/// Picks the tool matching `repository` by url first, then by name.
pub fn find_tool(tools: Vec<SpaceTool>, repository: &str) -> Option<SpaceTool> {
    let by_url = tools.iter().position(|t| t.url == repository);
    let index = by_url.or_else(|| {
        tools
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(repository))
    })?;
    tools.into_iter().nth(index)
}

/// Stand-in used when no API credentials are configured.
///
/// Resolves every repository to a tool named after the space, with the
/// repository url as given by the webhook.
#[derive(Debug, Default, Clone)]
pub struct OfflineRepositoryApi;

#[async_trait]
impl RepositoryApi for OfflineRepositoryApi {
    async fn authenticate(&self, _key: &str, _secret: &str) -> Result<()> {
        warn!("Assembla API is disabled; credentials are ignored");
        Ok(())
    }

    async fn resolve_repository_tool(
        &self,
        space_wiki_name: &str,
        repository: &str,
    ) -> Result<SpaceTool> {
        Ok(SpaceTool {
            id: String::new(),
            name: space_wiki_name.to_string(),
            url: repository.to_string(),
        })
    }
}
