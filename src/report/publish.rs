use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::devops::{DevOpsError, PrEvent};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to create PR thread: {0}")]
    Thread(#[from] DevOpsError),

    #[error("Failed to write comment file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Destination for a rendered review comment.
///
/// Publishing is not idempotent: every call creates a new, visible comment.
#[async_trait]
pub trait CommentPublisher: Send + Sync {
    async fn publish(&self, event: &PrEvent, markdown: &str) -> Result<(), PublishError>;
}

/// Dry-run publisher: prints the comment to stdout, or writes it to a file
/// when a path is given.
pub struct MarkdownPublisher {
    output: Option<PathBuf>,
}

impl MarkdownPublisher {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self { output }
    }
}

#[async_trait]
impl CommentPublisher for MarkdownPublisher {
    #[instrument(skip(self, markdown), fields(pr = event.pull_request_id))]
    async fn publish(&self, event: &PrEvent, markdown: &str) -> Result<(), PublishError> {
        match &self.output {
            None => {
                debug!("writing comment to terminal");
                println!("{}", markdown);
            }
            Some(path) => {
                debug!(path = %path.display(), "writing comment to file");
                tokio::fs::write(path, markdown).await?;
            }
        }
        Ok(())
    }
}
