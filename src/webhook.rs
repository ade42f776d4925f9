//! Azure DevOps "pull request created/updated" service-hook payloads.

use serde::Deserialize;
use thiserror::Error;

use crate::devops::{DevOpsError, PrEvent};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Webhook payload is missing {0}")]
    Missing(&'static str),

    #[error("{0}")]
    Invalid(#[from] DevOpsError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    resource: Option<Resource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    #[serde(default)]
    pull_request_id: Option<u32>,
    #[serde(default)]
    repository: Option<Repository>,
    #[serde(default)]
    source_ref_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Repository {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    project: Option<Project>,
}

#[derive(Debug, Default, Deserialize)]
struct Project {
    #[serde(default)]
    id: Option<String>,
}

/// Parse and validate a service-hook body into the event that starts a
/// review run. Payloads without a positive PR id, a repository id or a
/// project id are rejected.
pub fn parse_payload(body: &str) -> Result<PrEvent, WebhookError> {
    let payload: Payload = serde_json::from_str(body)?;
    let resource = payload.resource.ok_or(WebhookError::Missing("resource"))?;
    let pull_request_id = resource
        .pull_request_id
        .ok_or(WebhookError::Missing("resource.pullRequestId"))?;
    let repository = resource
        .repository
        .ok_or(WebhookError::Missing("resource.repository"))?;
    let repository_id = repository
        .id
        .ok_or(WebhookError::Missing("resource.repository.id"))?;
    let project_id = repository
        .project
        .and_then(|p| p.id)
        .ok_or(WebhookError::Missing("resource.repository.project.id"))?;

    let event = PrEvent::new(
        pull_request_id,
        repository_id,
        project_id,
        resource.source_ref_name.unwrap_or_default(),
    )?;
    Ok(event)
}
