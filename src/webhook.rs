//! Webhook payload normalization
//!
//! Assembla delivers merge request and changeset notifications as loosely
//! structured JSON. Everything downstream works on [`WebhookEvent`], which is
//! produced by [`normalize`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{Result, TriggerError};

static MERGE_REQUEST_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)merge\s+request\s+#?(\d+)").expect("merge request id pattern is valid")
});

static MERGE_REQUEST_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*merge\s+request\s+#?\d+\s*:\s*").expect("merge request prefix pattern is valid")
});

/// What kind of object the notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MergeRequest,
    Changeset,
    Other,
}

impl EventKind {
    fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("merge request")
            || text.contains("merge_request")
            || text.contains("mergerequest")
        {
            EventKind::MergeRequest
        } else if text.contains("changeset") || text.contains("commit") || text.contains("push") {
            EventKind::Changeset
        } else {
            EventKind::Other
        }
    }
}

/// Merge request action as reported by Assembla
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRequestAction {
    Created,
    Updated,
    Reopened,
    Merged,
    Ignored,
    Unknown(String),
}

impl MergeRequestAction {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "created" => MergeRequestAction::Created,
            "updated" => MergeRequestAction::Updated,
            "reopened" => MergeRequestAction::Reopened,
            "merged" => MergeRequestAction::Merged,
            "ignored" => MergeRequestAction::Ignored,
            other => MergeRequestAction::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MergeRequestAction::Created => "created",
            MergeRequestAction::Updated => "updated",
            MergeRequestAction::Reopened => "reopened",
            MergeRequestAction::Merged => "merged",
            MergeRequestAction::Ignored => "ignored",
            MergeRequestAction::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, MergeRequestAction::Unknown(_))
    }
}

impl std::fmt::Display for MergeRequestAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version control backend a repository URL belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsKind {
    Git,
    Subversion,
    Perforce,
    Unknown,
}

impl VcsKind {
    pub fn detect(url: &str) -> Self {
        let url = url.trim().to_lowercase();
        let host = url_host(&url).unwrap_or_default();

        if url.starts_with("git@") || host.starts_with("git.") || host.contains("-git.") {
            VcsKind::Git
        } else if host.starts_with("subversion") || url.contains("/svn/") {
            VcsKind::Subversion
        } else if host.starts_with("perforce") {
            VcsKind::Perforce
        } else {
            VcsKind::Unknown
        }
    }
}

/// Host part of either a `scheme://host/path` or a `user@host:path` URL.
fn url_host(url: &str) -> Option<&str> {
    if let Some((_, rest)) = url.split_once("://") {
        let host = rest.split('/').next()?;
        Some(host.rsplit('@').next().unwrap_or(host))
    } else {
        let (user_host, _) = url.split_once(':')?;
        Some(user_host.rsplit('@').next().unwrap_or(user_host))
    }
}

/// Repository path of the URL, without host and without trailing slashes.
fn url_path(url: &str) -> Option<&str> {
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/').map(|(_, path)| path)?
    } else {
        url.split_once(':').map(|(_, path)| path)?
    };
    Some(path.trim_end_matches('/'))
}

/// Strips a Perforce depot suffix such as `:11601`.
fn strip_depot_suffix(path: &str) -> &str {
    match path.rsplit_once(':') {
        Some((head, depot)) if !depot.is_empty() && depot.bytes().all(|b| b.is_ascii_digit()) => {
            head
        }
        _ => path,
    }
}

/// Strips a git numeric revision suffix such as `.2`.
fn strip_numeric_suffix(name: &str) -> Option<&str> {
    match name.rsplit_once('.') {
        Some((head, digits)) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            Some(head)
        }
        _ => None,
    }
}

/// Extracts the space wiki name from any Assembla repository URL.
///
/// Handles git over ssh and http, subversion and perforce URLs, with `/` or
/// `^` as namespace separator. Returns `None` when nothing is left to call a
/// wiki name.
pub fn wiki_name_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    let vcs = VcsKind::detect(url);
    let path = strip_depot_suffix(url_path(url)?);

    let name = match path.rfind('^') {
        Some(idx) => &path[idx + 1..],
        None => path.rsplit('/').next().unwrap_or(path),
    };
    let name = name.strip_suffix(".git").unwrap_or(name);

    let name = match strip_numeric_suffix(name) {
        Some(stripped) => stripped,
        None => match vcs {
            VcsKind::Subversion | VcsKind::Perforce => {
                name.rsplit_once('.').map(|(head, _)| head).unwrap_or(name)
            }
            VcsKind::Git | VcsKind::Unknown => name,
        },
    };

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Parses the merge request id out of a title like `Merge Request 2945043: Fix bug`.
pub fn merge_request_id_from_title(title: &str) -> Option<u64> {
    MERGE_REQUEST_ID
        .captures(title)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSpace {
    Name(String),
    Detailed { name: String, id: Option<String> },
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    space: Option<RawSpace>,
    message_type: Option<String>,
    action: Option<String>,
    object: Option<String>,
    title: Option<String>,
    body: Option<String>,
    author: Option<String>,
    branch: Option<String>,
    #[serde(alias = "repository_url")]
    url: Option<String>,
    commit_id: Option<String>,
    repository: Option<String>,
    target_branch: Option<String>,
    source_space_id: Option<String>,
    target_space_id: Option<String>,
    source_repository_url: Option<String>,
    description: Option<String>,
}

/// Normalized, immutable view of one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookEvent {
    pub space_name: String,
    pub space_id: Option<String>,
    pub space_wiki_name: String,
    pub repository_url: String,
    pub repository_name: Option<String>,
    pub kind: EventKind,
    pub action: Option<MergeRequestAction>,
    pub commit_id: String,
    pub author: String,
    pub title: String,
    pub body: String,
    pub description: Option<String>,
    pub merge_request_id: Option<u64>,
    pub source_branch: String,
    pub target_branch: String,
    pub source_space_id: Option<String>,
    pub target_space_id: Option<String>,
    pub source_repository_url: Option<String>,
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    field.ok_or_else(|| TriggerError::malformed(format!("missing required field '{}'", name)))
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.trim().is_empty())
}

/// Parses a raw webhook body into a [`WebhookEvent`].
pub fn normalize(raw: &[u8]) -> Result<WebhookEvent> {
    let payload: RawPayload = serde_json::from_slice(raw)
        .map_err(|e| TriggerError::malformed(format!("invalid JSON body: {}", e)))?;
    WebhookEvent::from_raw(payload)
}

impl WebhookEvent {
    /// Same as [`normalize`], starting from an already parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let payload: RawPayload = serde_json::from_value(value)
            .map_err(|e| TriggerError::malformed(format!("unexpected payload shape: {}", e)))?;
        Self::from_raw(payload)
    }

    fn from_raw(payload: RawPayload) -> Result<Self> {
        let (space_name, space_id) = match payload.space {
            Some(RawSpace::Name(name)) => (name, None),
            Some(RawSpace::Detailed { name, id }) => (name, id),
            None => return Err(TriggerError::malformed("missing required field 'space'")),
        };

        let classifier = match (&payload.object, &payload.message_type) {
            (Some(object), _) => object.clone(),
            (None, Some(message_type)) => message_type.clone(),
            (None, None) => {
                return Err(TriggerError::malformed("missing required field 'message_type'"));
            }
        };
        let kind = EventKind::classify(&classifier);

        let title = required(payload.title, "title")?;
        let body = required(payload.body, "body")?;
        let author = required(payload.author, "author")?;
        let branch = required(payload.branch, "branch")?;
        let repository_url = required(payload.url, "url")?;
        let commit_id = required(payload.commit_id, "commit_id")?;

        // Always derived from the url; a `space.wiki_name` in the body is ignored.
        let space_wiki_name = wiki_name_from_url(&repository_url).ok_or_else(|| {
            TriggerError::malformed(format!(
                "cannot derive space wiki name from url '{}'",
                repository_url
            ))
        })?;

        let action = match kind {
            EventKind::MergeRequest => Some(match payload.action {
                Some(action) => MergeRequestAction::parse(&action),
                None => action_from_message_type(payload.message_type.as_deref().unwrap_or("")),
            }),
            EventKind::Changeset | EventKind::Other => None,
        };

        let merge_request_id = merge_request_id_from_title(&title);
        if kind == EventKind::MergeRequest && merge_request_id.is_none() {
            return Err(TriggerError::malformed(format!(
                "merge request id not found in title '{}'",
                title
            )));
        }

        let target_branch = non_empty(payload.target_branch).unwrap_or_else(|| branch.clone());

        let event = WebhookEvent {
            space_name,
            space_id,
            space_wiki_name,
            repository_url,
            repository_name: non_empty(payload.repository),
            kind,
            action,
            commit_id,
            author,
            title,
            body,
            description: non_empty(payload.description),
            merge_request_id,
            source_branch: branch,
            target_branch,
            source_space_id: non_empty(payload.source_space_id),
            target_space_id: non_empty(payload.target_space_id),
            source_repository_url: non_empty(payload.source_repository_url),
        };
        debug!("Normalized webhook event: {:?}", event);
        Ok(event)
    }

    pub fn is_merge_request_event(&self) -> bool {
        self.kind == EventKind::MergeRequest
    }

    pub fn is_changeset_event(&self) -> bool {
        self.kind == EventKind::Changeset
    }

    /// True for every recognized merge request action and for any changeset.
    pub fn should_trigger_build(&self) -> bool {
        match self.kind {
            EventKind::MergeRequest => self.action.as_ref().is_some_and(|a| a.is_known()),
            EventKind::Changeset => true,
            EventKind::Other => false,
        }
    }

    /// Name used to look up bindings in the trigger registry.
    pub fn repository_key(&self) -> &str {
        self.repository_name
            .as_deref()
            .unwrap_or(&self.space_wiki_name)
    }

    /// Title without the `Merge Request <id>:` prefix Assembla puts in front.
    pub fn merge_request_title(&self) -> &str {
        match MERGE_REQUEST_PREFIX.find(&self.title) {
            Some(prefix) => &self.title[prefix.end()..],
            None => &self.title,
        }
    }

    /// Repository the change comes from; differs from `repository_url` for forks.
    pub fn source_repository_url(&self) -> &str {
        self.source_repository_url
            .as_deref()
            .unwrap_or(&self.repository_url)
    }
}

/// Finds the action word in wording like `updated merge request`.
fn action_from_message_type(message_type: &str) -> MergeRequestAction {
    message_type
        .split_whitespace()
        .map(MergeRequestAction::parse)
        .find(MergeRequestAction::is_known)
        .unwrap_or_else(|| {
            let first = message_type.split_whitespace().next().unwrap_or("");
            MergeRequestAction::Unknown(first.to_lowercase())
        })
}
