//! Webhook handler for Assembla merge request and changeset events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::error::{Result, TriggerError};
use crate::utils::{SIGNATURE_HEADER, verify_webhook_signature};

fn check_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(TriggerError::WebhookValidationFailed(
            "secret configured, but no signature header supplied".to_string(),
        ));
    };
    if !verify_webhook_signature(secret, body, signature) {
        return Err(TriggerError::WebhookValidationFailed(
            "signature mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Handles the Assembla webhook POST request.
///
/// Responds 400 for malformed payloads, 401 for bad signatures, 204 when no
/// job is bound to the repository and 200 with a per-job report otherwise.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let webhook_secret = {
        let config = state.config.read().unwrap_or_else(|p| p.into_inner());
        config.webhook_secret.clone().filter(|s| !s.is_empty())
    };

    if let Some(secret) = webhook_secret {
        if let Err(e) = check_signature(&secret, &headers, &body) {
            error!("{}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    debug!("Webhook body: {}", String::from_utf8_lossy(&body));

    let report = match state.service.handle_payload(&body).await {
        Ok(report) => report,
        Err(e) => {
            warn!("Rejected webhook: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    if report.bindings.is_empty() {
        info!(
            "No job handled event for repo '{}' (space '{}')",
            report.repository, report.space_wiki_name
        );
        return StatusCode::NO_CONTENT.into_response();
    }

    info!(
        "Event for repo '{}' scheduled {} of {} bound job(s)",
        report.repository,
        report.scheduled_count(),
        report.bindings.len()
    );
    Json(report).into_response()
}
