//! Durable review run: fetch changes, pick the layer, analyze, comment.
//!
//! Every completed step is appended to a [`Journal`] before the next one
//! starts. Re-running with the same journal replays the recorded outputs
//! through [`reduce`] and executes only what is left, so a comment that
//! was already posted is never posted again.

pub mod activities;
pub mod journal;
pub mod state;

pub use activities::{Activities, ReviewActivities, StepError};
pub use journal::{FileJournal, Journal, JournalError, MemoryJournal};
pub use state::Outcome;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{LayerSource, PipelineConfig};
use crate::devops::PrEvent;
use state::{recorded_changes, reduce, Next, ReplayError, Step, StepKind, StepOutput, StepRecord};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("Journal does not match this run: {0}")]
    Replay(#[from] ReplayError),

    #[error("Run failed while {stage}: {source}")]
    StepFailed {
        stage: &'static str,
        #[source]
        source: StepError,
    },
}

pub struct Orchestrator {
    activities: Arc<dyn Activities>,
    layer_source: LayerSource,
    analysis_attempts: u32,
    step_timeout: Duration,
}

impl Orchestrator {
    pub fn new(activities: Arc<dyn Activities>, config: &PipelineConfig) -> Self {
        Self {
            activities,
            layer_source: config.layer_source,
            analysis_attempts: config.analysis_attempts.max(1),
            step_timeout: Duration::from_secs(config.step_timeout_secs.max(1)),
        }
    }

    /// Drive the run for `event` to an outcome, resuming from `journal`.
    ///
    /// Dropping this future (Ctrl-C) leaves the journal at a step boundary,
    /// or with one partially written entry that the next `load` discards.
    #[instrument(skip_all, fields(pr = event.pull_request_id, repo = %event.repository_id))]
    pub async fn run(&self, event: &PrEvent, journal: &mut dyn Journal) -> Result<Outcome, PipelineError> {
        let mut history = journal.load().await?;
        if !history.is_empty() {
            let fetched = recorded_changes(&history);
            info!(
                entries = history.len(),
                commit = ?fetched.and_then(|c| c.commit_id.as_deref()),
                files = fetched.map_or(0, |c| c.paths.len()),
                "resuming from journal"
            );
            if let Some(fetched) = fetched {
                debug!(paths = ?fetched.paths, "recorded changed files");
            }
        }

        loop {
            let stage = reduce(event, self.layer_source, &history)?;
            let step = match stage.next(event, self.layer_source) {
                Next::Run(step) => step,
                Next::Done(outcome) => {
                    info!(?outcome, "review run finished");
                    return Ok(outcome);
                }
            };

            debug!(stage = stage.name(), step = %step.kind(), "executing step");
            let output = match self.execute_with_retry(&step).await {
                Ok(output) => output,
                Err(source) => {
                    error!(stage = stage.name(), error = %source, "review run failed");
                    return Err(PipelineError::StepFailed {
                        stage: stage.name(),
                        source,
                    });
                }
            };

            let record = StepRecord::new(event, step.kind(), output);
            journal.append(&record).await?;
            history.push(record);
        }
    }

    async fn execute_with_retry(&self, step: &Step) -> Result<StepOutput, StepError> {
        // Posting a comment is not idempotent, so only analysis is retried.
        let attempts = match step.kind() {
            StepKind::Analyze => self.analysis_attempts,
            _ => 1,
        };

        let mut attempt = 1;
        loop {
            match self.execute_once(step).await {
                Ok(output) => return Ok(output),
                Err(e) if attempt < attempts => {
                    warn!(step = %step.kind(), attempt, attempts, error = %e, "step failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_once(&self, step: &Step) -> Result<StepOutput, StepError> {
        tokio::time::timeout(self.step_timeout, self.activities.execute(step))
            .await
            .map_err(|_| StepError::Timeout {
                step: step.kind(),
                secs: self.step_timeout.as_secs(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchSettings;
    use crate::devops::{ChangeSet, ChangeType, ChangedFile, DevOpsError, SourceControl};
    use crate::http::tests::FakeHttp;
    use crate::http::HttpError;
    use crate::report::{CommentPublisher, PublishError};
    use crate::review::context::tests::FixedContext;
    use crate::review::context::ContextRetriever;
    use crate::review::model::tests::ScriptedModel;
    use crate::review::{CodeAnalyzer, ContextLimits, Layer, PromptAssembler, SearchContextRetriever};
    use async_trait::async_trait;
    use super::state::tests::{analysis, changes, event, layer, posted};
    use std::sync::Mutex;

    const CLEAN: &str = r#"{"violationFound":false,"violations":[],"explanation":"Layering respected."}"#;
    const VIOLATIONS: &str = r#"{
        "violationFound": true,
        "violations": [
            {
                "rule": "Core must not reference EF",
                "principle": "Onion",
                "severity": "high",
                "lines": [3],
                "evidence": "using Microsoft.EntityFrameworkCore;",
                "suggestion": "Move persistence to Infrastructure"
            }
        ],
        "explanation": "Core depends on EF."
    }"#;

    struct FakeSource {
        change_set: ChangeSet,
        calls: Mutex<usize>,
    }

    impl FakeSource {
        fn with_files(files: &[(&str, &str)]) -> Self {
            let mut change_set = ChangeSet::empty(&event());
            change_set.commit_id = Some("abc".to_string());
            change_set.files = files
                .iter()
                .map(|(path, content)| ChangedFile {
                    path: path.to_string(),
                    change_type: ChangeType::Edit,
                    content: content.to_string(),
                })
                .collect();
            Self {
                change_set,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SourceControl for FakeSource {
        async fn fetch_changes(&self, _event: &PrEvent) -> Result<ChangeSet, DevOpsError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.change_set.clone())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        fail: bool,
        attempts: Mutex<Vec<String>>,
    }

    impl RecordingPublisher {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommentPublisher for RecordingPublisher {
        async fn publish(&self, _event: &PrEvent, markdown: &str) -> Result<(), PublishError> {
            self.attempts.lock().unwrap().push(markdown.to_string());
            if self.fail {
                return Err(PublishError::FileWrite(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            Ok(())
        }
    }

    struct Slow;

    #[async_trait]
    impl Activities for Slow {
        async fn execute(&self, _step: &Step) -> Result<StepOutput, StepError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(StepOutput::CommentPosted)
        }
    }

    fn orchestrator(
        source: Arc<FakeSource>,
        retriever: Arc<dyn ContextRetriever>,
        model: Arc<ScriptedModel>,
        publisher: Arc<RecordingPublisher>,
        config: &PipelineConfig,
    ) -> Orchestrator {
        let analyzer = CodeAnalyzer::new(
            retriever,
            PromptAssembler::new("rules", "gpt-4o"),
            model,
            config.strict_contract,
        );
        let activities = ReviewActivities::new(source, analyzer, publisher, config.footer.clone());
        Orchestrator::new(Arc::new(activities), config)
    }

    fn core_source() -> Arc<FakeSource> {
        Arc::new(FakeSource::with_files(&[(
            "/Shop.Core/Order.cs",
            "namespace Shop.Core;\nusing Microsoft.EntityFrameworkCore;\npublic class Order {}",
        )]))
    }

    #[tokio::test]
    async fn test_search_outage_still_completes_review() {
        let search_http = Arc::new(FakeHttp::new().fail(HttpError::Timeout {
            url: "https://search.example.com".to_string(),
        }));
        let retriever = Arc::new(SearchContextRetriever::new(
            search_http.clone(),
            Some(SearchSettings {
                endpoint: "https://search.example.com".to_string(),
                index: "arch-docs".to_string(),
                api_key: "search-key".to_string(),
                api_version: "2023-11-01".to_string(),
            }),
            ContextLimits::default(),
        ));
        let model = Arc::new(ScriptedModel::new(&[CLEAN]));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut journal = MemoryJournal::new();

        let outcome = orchestrator(
            core_source(),
            retriever,
            model.clone(),
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut journal)
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(search_http.sent().len(), 1);
        let requests = model.requests.lock().unwrap();
        assert!(!requests[0]
            .messages
            .iter()
            .any(|m| m.content.starts_with("Project context")));
        assert!(requests[0].messages.last().unwrap().content.starts_with("Layer=Core."));

        let posts = publisher.attempts();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].starts_with("✅ **No Architecture Violations Found**."));
        assert_eq!(journal.load().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_violations_are_rendered_into_comment() {
        let model = Arc::new(ScriptedModel::new(&[VIOLATIONS]));
        let publisher = Arc::new(RecordingPublisher::default());
        let context = Arc::new(FixedContext::new("Core has no outward dependencies."));

        let outcome = orchestrator(
            core_source(),
            context.clone(),
            model,
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut MemoryJournal::new())
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(*context.layers.lock().unwrap(), vec![Layer::Core]);
        let comment = &publisher.attempts()[0];
        assert!(comment.starts_with("❌ **Architecture Violations Found**:"));
        assert!(comment.contains("1. **Core must not reference EF** · _Onion_ · **HIGH** · Lines: 3"));
        assert!(comment.ends_with("_Reviewed by Architecture Review Assistant_\n"));
    }

    #[tokio::test]
    async fn test_no_reviewable_changes_skips_analysis() {
        let source = Arc::new(FakeSource::with_files(&[]));
        let model = Arc::new(ScriptedModel::new(&[CLEAN]));
        let publisher = Arc::new(RecordingPublisher::default());

        let outcome = orchestrator(
            source.clone(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut MemoryJournal::new())
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::NoChanges);
        assert_eq!(source.calls(), 1);
        assert_eq!(model.calls(), 0);
        assert!(publisher.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_branch_without_layer_ends_without_comment() {
        let config = PipelineConfig {
            layer_source: LayerSource::Branch,
            ..PipelineConfig::default()
        };
        let event = PrEvent::new(42, "repo", "proj", "refs/heads/feature/orders").unwrap();
        let model = Arc::new(ScriptedModel::new(&[CLEAN]));
        let publisher = Arc::new(RecordingPublisher::default());

        let outcome = orchestrator(
            core_source(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &config,
        )
        .run(&event, &mut MemoryJournal::new())
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::NoLayer);
        assert_eq!(model.calls(), 0);
        assert!(publisher.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_branch_layer_overrides_paths() {
        let config = PipelineConfig {
            layer_source: LayerSource::Branch,
            ..PipelineConfig::default()
        };
        let event = PrEvent::new(42, "repo", "proj", "refs/heads/infrastructure/db").unwrap();
        let context = Arc::new(FixedContext::new(""));

        orchestrator(
            core_source(),
            context.clone(),
            Arc::new(ScriptedModel::new(&[CLEAN])),
            Arc::new(RecordingPublisher::default()),
            &config,
        )
        .run(&event, &mut MemoryJournal::new())
        .await
        .unwrap();

        assert_eq!(*context.layers.lock().unwrap(), vec![Layer::Infrastructure]);
    }

    #[tokio::test]
    async fn test_finished_journal_replays_without_side_effects() {
        let source = core_source();
        let model = Arc::new(ScriptedModel::new(&[CLEAN]));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut journal = MemoryJournal::new();
        for record in [
            changes("--- FILE: /Shop.Core/Order.cs ---\n"),
            layer(StepKind::InferLayer, Some(Layer::Core)),
            analysis(CLEAN),
            posted(),
        ] {
            journal.append(&record).await.unwrap();
        }

        let outcome = orchestrator(
            source.clone(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut journal)
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(source.calls(), 0);
        assert_eq!(model.calls(), 0);
        assert!(publisher.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_resume_runs_only_remaining_step() {
        let source = core_source();
        let model = Arc::new(ScriptedModel::new(&[]));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut journal = MemoryJournal::new();
        for record in [
            changes("--- FILE: /Shop.Core/Order.cs ---\n"),
            layer(StepKind::InferLayer, Some(Layer::Core)),
            analysis(VIOLATIONS),
        ] {
            journal.append(&record).await.unwrap();
        }

        orchestrator(
            source.clone(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut journal)
        .await
        .unwrap();

        assert_eq!(source.calls(), 0);
        assert_eq!(model.calls(), 0);
        assert_eq!(publisher.attempts().len(), 1);
        assert_eq!(journal.load().await.unwrap().last(), Some(&posted()));
    }

    #[tokio::test]
    async fn test_contract_violation_is_retried() {
        let model = Arc::new(ScriptedModel::new(&["not json", CLEAN]));
        let mut journal = MemoryJournal::new();

        let outcome = orchestrator(
            core_source(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            Arc::new(RecordingPublisher::default()),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut journal)
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(model.calls(), 2);
        assert_eq!(journal.load().await.unwrap()[2], analysis(CLEAN));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_run() {
        let model = Arc::new(ScriptedModel::new(&["not json", "still not json"]));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut journal = MemoryJournal::new();

        let err = orchestrator(
            core_source(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut journal)
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StepFailed {
                stage: "Analyzing",
                source: StepError::Analysis(_)
            }
        ));
        assert_eq!(model.calls(), 2);
        assert!(publisher.attempts().is_empty());
        assert_eq!(journal.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lenient_contract_posts_inconclusive_comment() {
        let config = PipelineConfig {
            strict_contract: false,
            ..PipelineConfig::default()
        };
        let model = Arc::new(ScriptedModel::new(&["not json"]));
        let publisher = Arc::new(RecordingPublisher::default());

        let outcome = orchestrator(
            core_source(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &config,
        )
        .run(&event(), &mut MemoryJournal::new())
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(model.calls(), 1);
        assert!(publisher.attempts()[0].starts_with("⚠️ **Analysis Inconclusive**"));
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_retried() {
        let publisher = Arc::new(RecordingPublisher::failing());
        let mut journal = MemoryJournal::new();

        let err = orchestrator(
            core_source(),
            Arc::new(FixedContext::new("")),
            Arc::new(ScriptedModel::new(&[CLEAN])),
            publisher.clone(),
            &PipelineConfig {
                analysis_attempts: 5,
                ..PipelineConfig::default()
            },
        )
        .run(&event(), &mut journal)
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StepFailed {
                stage: "PostingComment",
                source: StepError::Publish(_)
            }
        ));
        assert_eq!(publisher.attempts().len(), 1);
        assert_eq!(journal.load().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_slow_step_times_out() {
        let orchestrator = Orchestrator {
            activities: Arc::new(Slow),
            layer_source: LayerSource::Changes,
            analysis_attempts: 1,
            step_timeout: Duration::from_millis(20),
        };

        let err = orchestrator
            .run(&event(), &mut MemoryJournal::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StepFailed {
                stage: "FetchingChanges",
                source: StepError::Timeout {
                    step: StepKind::FetchChanges,
                    ..
                }
            }
        ));
    }

    #[tokio::test]
    async fn test_mismatched_journal_is_rejected() {
        let mut journal = MemoryJournal::new();
        journal.append(&posted()).await.unwrap();

        let err = orchestrator(
            core_source(),
            Arc::new(FixedContext::new("")),
            Arc::new(ScriptedModel::new(&[])),
            Arc::new(RecordingPublisher::default()),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut journal)
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Replay(_)));
    }

    #[tokio::test]
    async fn test_journal_of_another_pull_request_is_rejected() {
        let source = core_source();
        let model = Arc::new(ScriptedModel::new(&[CLEAN]));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut journal = MemoryJournal::new();
        for record in [
            changes("--- FILE: /Shop.Core/Order.cs ---\n"),
            layer(StepKind::InferLayer, Some(Layer::Core)),
            analysis(CLEAN),
            posted(),
        ] {
            journal.append(&record).await.unwrap();
        }

        let other = PrEvent::new(43, "other-repo", "proj", "").unwrap();
        let err = orchestrator(
            source.clone(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&other, &mut journal)
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Replay(ReplayError::OtherRun {
                index: 0,
                pull_request_id: 42,
                ..
            })
        ));
        assert_eq!(source.calls(), 0);
        assert_eq!(model.calls(), 0);
        assert!(publisher.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_torn_file_journal_resumes_at_interrupted_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut complete = String::new();
        for record in [
            changes("--- FILE: /Shop.Core/Order.cs ---\n"),
            layer(StepKind::InferLayer, Some(Layer::Core)),
        ] {
            complete.push_str(&serde_json::to_string(&record).unwrap());
            complete.push('\n');
        }
        let torn = serde_json::to_string(&analysis(VIOLATIONS)).unwrap();
        std::fs::write(&path, format!("{}{}", complete, &torn[..torn.len() / 2])).unwrap();

        let source = core_source();
        let model = Arc::new(ScriptedModel::new(&[CLEAN]));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut journal = FileJournal::new(&path);

        let outcome = orchestrator(
            source.clone(),
            Arc::new(FixedContext::new("")),
            model.clone(),
            publisher.clone(),
            &PipelineConfig::default(),
        )
        .run(&event(), &mut journal)
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(source.calls(), 0);
        assert_eq!(model.calls(), 1);
        assert_eq!(publisher.attempts().len(), 1);
        let history = FileJournal::new(&path).load().await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], analysis(CLEAN));
    }

    #[test]
    fn test_zero_step_timeout_is_clamped() {
        let config = PipelineConfig {
            step_timeout_secs: 0,
            ..PipelineConfig::default()
        };
        let orchestrator = Orchestrator::new(Arc::new(Slow), &config);
        assert_eq!(orchestrator.step_timeout, Duration::from_secs(1));
    }
}
