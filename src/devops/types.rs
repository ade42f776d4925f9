use serde::{Deserialize, Serialize};

use super::DevOpsError;

/// A pull request event that starts one review run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrEvent {
    pub pull_request_id: u32,
    pub repository_id: String,
    pub project_id: String,
    /// e.g. "refs/heads/feature/core/new-entity"
    #[serde(default)]
    pub source_ref_name: String,
}

impl PrEvent {
    /// Build an event, rejecting a zero PR id or blank repository/project ids.
    pub fn new(
        pull_request_id: u32,
        repository_id: impl Into<String>,
        project_id: impl Into<String>,
        source_ref_name: impl Into<String>,
    ) -> Result<Self, DevOpsError> {
        let event = Self {
            pull_request_id,
            repository_id: repository_id.into(),
            project_id: project_id.into(),
            source_ref_name: source_ref_name.into(),
        };
        if event.pull_request_id == 0 {
            return Err(DevOpsError::InvalidEvent("pullRequestId must be positive"));
        }
        if event.repository_id.trim().is_empty() {
            return Err(DevOpsError::InvalidEvent("repository id is empty"));
        }
        if event.project_id.trim().is_empty() {
            return Err(DevOpsError::InvalidEvent("project id is empty"));
        }
        Ok(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Edit,
    Delete,
    /// rename, branch, etc.
    Other(String),
}

impl ChangeType {
    /// Azure DevOps reports combined flags such as "edit, rename"; any
    /// change that includes a delete counts as a delete.
    pub fn parse(raw: &str) -> ChangeType {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("delete") {
            ChangeType::Delete
        } else if lower.contains("add") {
            ChangeType::Add
        } else if lower.contains("edit") {
            ChangeType::Edit
        } else {
            ChangeType::Other(raw.to_string())
        }
    }
}

/// A changed file whose content was fetched for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub change_type: ChangeType,
    pub content: String,
}

/// The reviewable changes of a pull request's latest commit.
/// Deleted and non-source files never make it in here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub pull_request_id: u32,
    pub repository_id: String,
    pub project_id: String,
    /// `None` when the PR has no commits
    pub commit_id: Option<String>,
    pub files: Vec<ChangedFile>,
}

impl ChangeSet {
    pub fn empty(event: &PrEvent) -> Self {
        Self {
            pull_request_id: event.pull_request_id,
            repository_id: event.repository_id.clone(),
            project_id: event.project_id.clone(),
            commit_id: None,
            files: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of files with the given change type.
    pub fn count(&self, change_type: &ChangeType) -> usize {
        self.files.iter().filter(|f| &f.change_type == change_type).count()
    }

    /// All files concatenated into one path-annotated blob.
    pub fn combined_code(&self) -> String {
        let mut code = String::new();
        for file in &self.files {
            code.push_str(&format!("--- FILE: {} ---\n", file.path));
            code.push_str(&file.content);
            if !file.content.ends_with('\n') {
                code.push('\n');
            }
            code.push_str("--- END OF FILE ---\n");
        }
        code
    }
}

// Azure DevOps REST shapes

#[derive(Debug, Deserialize)]
pub(crate) struct CommitListResponse {
    #[serde(default)]
    pub value: Vec<Commit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Commit {
    pub commit_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitChangesResponse {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Change {
    pub item: Item,
    #[serde(default)]
    pub change_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Item {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_folder: bool,
}
