use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::state::{FetchedChanges, Step, StepKind, StepOutput};
use crate::devops::{ChangeType, DevOpsError, SourceControl};
use crate::report::{render_comment, CommentPublisher, PublishError};
use crate::review::{infer_layer, layer_from_ref, parse_lenient, AnalysisError, CodeAnalyzer};

#[derive(Debug, Error)]
pub enum StepError {
    #[error("Failed to fetch PR changes: {0}")]
    Changes(#[from] DevOpsError),

    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Failed to publish comment: {0}")]
    Publish(#[from] PublishError),

    #[error("{step} timed out after {secs}s")]
    Timeout { step: StepKind, secs: u64 },
}

/// Side-effecting work behind each step.
#[async_trait]
pub trait Activities: Send + Sync {
    async fn execute(&self, step: &Step) -> Result<StepOutput, StepError>;
}

/// Production activities: Azure DevOps, the analyzer and a publisher.
pub struct ReviewActivities {
    source: Arc<dyn SourceControl>,
    analyzer: CodeAnalyzer,
    publisher: Arc<dyn CommentPublisher>,
    footer: String,
}

impl ReviewActivities {
    pub fn new(
        source: Arc<dyn SourceControl>,
        analyzer: CodeAnalyzer,
        publisher: Arc<dyn CommentPublisher>,
        footer: impl Into<String>,
    ) -> Self {
        Self {
            source,
            analyzer,
            publisher,
            footer: footer.into(),
        }
    }
}

#[async_trait]
impl Activities for ReviewActivities {
    #[instrument(skip_all, fields(step = %step.kind()))]
    async fn execute(&self, step: &Step) -> Result<StepOutput, StepError> {
        match step {
            Step::FetchChanges { event } => {
                let change_set = self.source.fetch_changes(event).await?;
                if change_set.is_empty() {
                    info!(commit = ?change_set.commit_id, "no reviewable source files changed");
                } else {
                    info!(
                        files = change_set.files.len(),
                        added = change_set.count(&ChangeType::Add),
                        edited = change_set.count(&ChangeType::Edit),
                        "fetched reviewable changes"
                    );
                }
                Ok(StepOutput::Changes(FetchedChanges {
                    paths: change_set.files.iter().map(|f| f.path.clone()).collect(),
                    code: change_set.combined_code(),
                    commit_id: change_set.commit_id,
                }))
            }
            Step::InferLayer { code } => {
                let layer = infer_layer(code);
                info!(%layer, "inferred layer from changed paths");
                Ok(StepOutput::Layer(Some(layer)))
            }
            Step::LayerFromRef { source_ref } => {
                let layer = layer_from_ref(source_ref);
                info!(source_ref = %source_ref, layer = ?layer, "read layer from branch name");
                Ok(StepOutput::Layer(layer))
            }
            Step::Analyze { code, layer } => {
                let analysis = self.analyzer.analyze(code, *layer).await?;
                Ok(StepOutput::Analysis(analysis))
            }
            Step::PostComment { event, analysis } => {
                let result = parse_lenient(analysis);
                if result.is_inconclusive() {
                    warn!("posting inconclusive review");
                }
                let markdown = render_comment(&result, &self.footer);
                self.publisher.publish(event, &markdown).await?;
                info!(verdict = ?result.violation_found, violations = result.violations.len(), "published review");
                Ok(StepOutput::CommentPosted)
            }
        }
    }
}
