//! Build causes
//!
//! A [`Cause`] is the audit record attached to every scheduled build. It is
//! built once per qualifying event and binding, and never changes afterwards.

use serde::Serialize;

use crate::assembla::SpaceTool;
use crate::webhook::{MergeRequestAction, WebhookEvent};

const ABBREVIATED_TITLE_LEN: usize = 30;

/// Provenance shared by every cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CauseDetails {
    pub source_repository_url: String,
    pub source_repository_name: String,
    pub source_branch: String,
    pub commit_id: String,
    pub title: String,
    pub description: Option<String>,
    pub source_space_id: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cause {
    MergeRequest {
        details: CauseDetails,
        merge_request_id: u64,
        target_repository_url: String,
        target_branch: String,
        action: MergeRequestAction,
    },
    Push {
        details: CauseDetails,
    },
}

fn source_space_id(event: &WebhookEvent) -> String {
    event
        .source_space_id
        .clone()
        .or_else(|| event.space_id.clone())
        .unwrap_or_else(|| event.space_wiki_name.clone())
}

impl Cause {
    /// Builds a merge request cause from the event and the resolved tools.
    ///
    /// Returns `None` when the event is not a merge request.
    pub fn from_merge_request(
        event: &WebhookEvent,
        source_tool: &SpaceTool,
        target_tool: &SpaceTool,
    ) -> Option<Self> {
        let merge_request_id = event.merge_request_id?;
        let action = event.action.clone()?;

        Some(Cause::MergeRequest {
            details: CauseDetails {
                source_repository_url: source_tool.url.clone(),
                source_repository_name: source_tool.name.clone(),
                source_branch: event.source_branch.clone(),
                commit_id: event.commit_id.clone(),
                title: event.merge_request_title().to_string(),
                description: event.description.clone(),
                source_space_id: source_space_id(event),
                author: event.author.clone(),
            },
            merge_request_id,
            target_repository_url: target_tool.url.clone(),
            target_branch: event.target_branch.clone(),
            action,
        })
    }

    /// Builds a push cause for a changeset on `tool`.
    pub fn from_push(event: &WebhookEvent, tool: &SpaceTool) -> Self {
        Cause::Push {
            details: CauseDetails {
                source_repository_url: tool.url.clone(),
                source_repository_name: tool.name.clone(),
                source_branch: event.source_branch.clone(),
                commit_id: event.commit_id.clone(),
                title: event.title.clone(),
                description: event.description.clone(),
                source_space_id: source_space_id(event),
                author: event.author.clone(),
            },
        }
    }

    pub fn details(&self) -> &CauseDetails {
        match self {
            Cause::MergeRequest { details, .. } | Cause::Push { details } => details,
        }
    }

    pub fn merge_request_id(&self) -> Option<u64> {
        match self {
            Cause::MergeRequest { merge_request_id, .. } => Some(*merge_request_id),
            Cause::Push { .. } => None,
        }
    }

    pub fn action(&self) -> Option<&MergeRequestAction> {
        match self {
            Cause::MergeRequest { action, .. } => Some(action),
            Cause::Push { .. } => None,
        }
    }

    pub fn target_repository_url(&self) -> &str {
        match self {
            Cause::MergeRequest {
                target_repository_url,
                ..
            } => target_repository_url,
            Cause::Push { details } => &details.source_repository_url,
        }
    }

    /// Pushes build the branch they landed on.
    pub fn target_branch(&self) -> &str {
        match self {
            Cause::MergeRequest { target_branch, .. } => target_branch,
            Cause::Push { details } => &details.source_branch,
        }
    }

    pub fn description(&self) -> &str {
        self.details().description.as_deref().unwrap_or("")
    }

    /// True when the change comes from a different repository than its target.
    pub fn is_from_fork(&self) -> bool {
        self.details().source_repository_url != self.target_repository_url()
    }

    pub fn abbreviated_title(&self) -> String {
        abbreviate(&self.details().title, ABBREVIATED_TITLE_LEN)
    }

    /// One line summary shown next to the build.
    pub fn short_description(&self) -> String {
        let details = self.details();
        match self {
            Cause::MergeRequest {
                merge_request_id,
                target_repository_url,
                target_branch,
                ..
            } => {
                if self.is_from_fork() {
                    format!(
                        "Assembla Merge Request #{}: {} - {}/{} => {}/{}",
                        merge_request_id,
                        self.abbreviated_title(),
                        details.source_repository_url,
                        details.source_branch,
                        target_repository_url,
                        target_branch
                    )
                } else {
                    format!(
                        "Assembla Merge Request #{}: {} - {}/{} => {}",
                        merge_request_id,
                        self.abbreviated_title(),
                        details.source_repository_url,
                        details.source_branch,
                        target_branch
                    )
                }
            }
            Cause::Push { .. } => format!(
                "Assembla Push to {}/{}: {}",
                details.source_repository_url,
                details.source_branch,
                self.abbreviated_title()
            ),
        }
    }
}

/// Shortens `text` to at most `max_len` characters, ending in `...` when cut.
fn abbreviate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_len.saturating_sub(3)).collect();
    short.push_str("...");
    short
}
