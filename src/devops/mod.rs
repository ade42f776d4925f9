pub mod changes;
pub mod types;

pub use types::{ChangeSet, ChangeType, ChangedFile, PrEvent};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::DevOpsSettings;
use crate::http::{build_url, HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::report::publish::{CommentPublisher, PublishError};
use types::{CommitChangesResponse, CommitListResponse};

const API_VERSION: &str = "7.1-preview.1";

/// Thread status "active"
const THREAD_STATUS_ACTIVE: u8 = 1;
/// Comment type "text"
const COMMENT_TYPE_TEXT: u8 = 1;

#[derive(Debug, Error)]
pub enum DevOpsError {
    #[error("Azure DevOps request failed: {0}")]
    Http(#[from] HttpError),

    #[error("Invalid pull request event: {0}")]
    InvalidEvent(&'static str),
}

/// Read access to a pull request's changes.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Fetch the reviewable files of the PR's latest commit. A PR without
    /// commits or without reviewable files yields an empty `ChangeSet`.
    async fn fetch_changes(&self, event: &PrEvent) -> Result<ChangeSet, DevOpsError>;
}

/// Azure DevOps Git REST client authenticated with a PAT.
pub struct DevOpsClient {
    http: Arc<dyn HttpClient>,
    settings: DevOpsSettings,
}

impl DevOpsClient {
    pub fn new(http: Arc<dyn HttpClient>, settings: DevOpsSettings) -> Self {
        Self { http, settings }
    }

    /// `{org}/_apis/git/repositories/{repo}/{rest..}?api-version=..`
    fn repo_url(&self, repository_id: &str, rest: &[&str]) -> Result<String, HttpError> {
        let mut segments = vec!["_apis", "git", "repositories", repository_id];
        segments.extend_from_slice(rest);
        build_url(&self.settings.org_url, &segments, &[("api-version", API_VERSION)])
    }

    fn threads_url(&self, event: &PrEvent) -> Result<String, HttpError> {
        let pr = event.pull_request_id.to_string();
        build_url(
            &self.settings.org_url,
            &[
                &event.project_id,
                "_apis",
                "git",
                "repositories",
                &event.repository_id,
                "pullRequests",
                &pr,
                "threads",
            ],
            &[("api-version", API_VERSION)],
        )
    }

    async fn send_authed(&self, request: HttpRequest) -> Result<HttpResponse, DevOpsError> {
        let response = self
            .http
            .send(request.basic_auth("", &self.settings.pat))
            .await?
            .error_for_status()?;
        Ok(response)
    }

    /// Post `markdown` as a new active thread on the PR.
    #[instrument(skip(self, markdown), fields(pr = event.pull_request_id, content_bytes = markdown.len()))]
    pub async fn create_thread(&self, event: &PrEvent, markdown: &str) -> Result<(), DevOpsError> {
        let payload = serde_json::json!({
            "comments": [ { "content": markdown, "commentType": COMMENT_TYPE_TEXT } ],
            "status": THREAD_STATUS_ACTIVE,
        });
        self.send_authed(HttpRequest::post_json(self.threads_url(event)?, payload))
            .await?;
        info!("posted review thread");
        Ok(())
    }
}

#[async_trait]
impl SourceControl for DevOpsClient {
    #[instrument(skip(self), fields(pr = event.pull_request_id, repo = %event.repository_id))]
    async fn fetch_changes(&self, event: &PrEvent) -> Result<ChangeSet, DevOpsError> {
        let pr = event.pull_request_id.to_string();

        debug!("listing PR commits");
        let commits: CommitListResponse = self
            .send_authed(HttpRequest::get(self.repo_url(
                &event.repository_id,
                &["pullrequests", &pr, "commits"],
            )?))
            .await?
            .json()?;

        let Some(latest) = commits.value.into_iter().next() else {
            warn!("pull request has no commits");
            return Ok(ChangeSet::empty(event));
        };
        debug!(commit = %latest.commit_id, "using latest commit");

        let diff: CommitChangesResponse = self
            .send_authed(HttpRequest::get(self.repo_url(
                &event.repository_id,
                &["commits", &latest.commit_id, "changes"],
            )?))
            .await?
            .json()?;
        let total = diff.changes.len();

        let mut change_set = ChangeSet::empty(event);
        change_set.commit_id = Some(latest.commit_id);
        for change in diff
            .changes
            .into_iter()
            .filter(|c| changes::is_reviewable(c, &self.settings.source_extensions))
        {
            debug!(path = %change.item.path, "fetching file content");
            let content = self
                .send_authed(HttpRequest::get(change.item.url.clone()).header("Accept", "text/plain"))
                .await?
                .body;
            change_set.files.push(ChangedFile {
                path: change.item.path,
                change_type: ChangeType::parse(&change.change_type),
                content,
            });
        }

        info!(
            total_changes = total,
            reviewable = change_set.files.len(),
            "fetched PR changes"
        );
        Ok(change_set)
    }
}

#[async_trait]
impl CommentPublisher for DevOpsClient {
    async fn publish(&self, event: &PrEvent, markdown: &str) -> Result<(), PublishError> {
        self.create_thread(event, markdown).await?;
        Ok(())
    }
}
