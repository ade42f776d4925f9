//! Pure sequencing logic for a review run.
//!
//! [`reduce`] folds the recorded step log into the current [`Stage`];
//! [`Stage::next`] names the one step to run next. Nothing here does
//! I/O, so replaying the same log always lands on the same stage.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LayerSource;
use crate::devops::PrEvent;
use crate::review::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    FetchChanges,
    InferLayer,
    LayerFromRef,
    Analyze,
    PostComment,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepKind::FetchChanges => "FetchChanges",
            StepKind::InferLayer => "InferLayer",
            StepKind::LayerFromRef => "LayerFromRef",
            StepKind::Analyze => "Analyze",
            StepKind::PostComment => "PostComment",
        };
        f.write_str(name)
    }
}

/// A step call together with its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    FetchChanges { event: PrEvent },
    InferLayer { code: String },
    LayerFromRef { source_ref: String },
    Analyze { code: String, layer: Layer },
    PostComment { event: PrEvent, analysis: String },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::FetchChanges { .. } => StepKind::FetchChanges,
            Step::InferLayer { .. } => StepKind::InferLayer,
            Step::LayerFromRef { .. } => StepKind::LayerFromRef,
            Step::Analyze { .. } => StepKind::Analyze,
            Step::PostComment { .. } => StepKind::PostComment,
        }
    }
}

/// Output of the changes step as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedChanges {
    pub commit_id: Option<String>,
    pub paths: Vec<String>,
    /// Path-annotated concatenation of the reviewable files
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum StepOutput {
    Changes(FetchedChanges),
    Layer(Option<Layer>),
    /// Raw model JSON
    Analysis(String),
    CommentPosted,
}

/// One completed step, stamped with the pull request it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub pull_request_id: u32,
    pub repository_id: String,
    pub step: StepKind,
    pub output: StepOutput,
}

impl StepRecord {
    pub fn new(event: &PrEvent, step: StepKind, output: StepOutput) -> Self {
        Self {
            pull_request_id: event.pull_request_id,
            repository_id: event.repository_id.clone(),
            step,
            output,
        }
    }

    fn belongs_to(&self, event: &PrEvent) -> bool {
        self.pull_request_id == event.pull_request_id && self.repository_id == event.repository_id
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Completed,
    /// No reviewable source files changed
    NoChanges,
    /// The branch name named no layer
    NoLayer,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("journal entry {index} records {recorded} but the run expects {expected}")]
    UnexpectedStep {
        index: usize,
        expected: StepKind,
        recorded: StepKind,
    },

    #[error("journal entry {index} for {step} holds the wrong kind of output")]
    UnexpectedOutput { index: usize, step: StepKind },

    #[error("journal continues after the run finished at entry {index}")]
    AfterTerminal { index: usize },

    #[error("journal entry {index} belongs to PR #{pull_request_id} in {repository_id}")]
    OtherRun {
        index: usize,
        pull_request_id: u32,
        repository_id: String,
    },
}

/// What a stage asks for next.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Run(Step),
    Done(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    FetchingChanges,
    InferringLayer { code: String },
    /// Includes the optional context retrieval
    Analyzing { code: String, layer: Layer },
    PostingComment { analysis: String },
    Completed,
    NoChanges,
    NoLayer,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::FetchingChanges => "FetchingChanges",
            Stage::InferringLayer { .. } => "InferringLayer",
            Stage::Analyzing { .. } => "Analyzing",
            Stage::PostingComment { .. } => "PostingComment",
            Stage::Completed => "Completed",
            Stage::NoChanges => "NoChanges",
            Stage::NoLayer => "NoLayer",
        }
    }

    /// The step this stage waits on, or the outcome once the run has
    /// finished.
    pub fn next(&self, event: &PrEvent, layer_source: LayerSource) -> Next {
        let step = match self {
            Stage::FetchingChanges => Step::FetchChanges {
                event: event.clone(),
            },
            Stage::InferringLayer { code } => match layer_source {
                LayerSource::Changes => Step::InferLayer { code: code.clone() },
                LayerSource::Branch => Step::LayerFromRef {
                    source_ref: event.source_ref_name.clone(),
                },
            },
            Stage::Analyzing { code, layer } => Step::Analyze {
                code: code.clone(),
                layer: *layer,
            },
            Stage::PostingComment { analysis } => Step::PostComment {
                event: event.clone(),
                analysis: analysis.clone(),
            },
            Stage::Completed => return Next::Done(Outcome::Completed),
            Stage::NoChanges => return Next::Done(Outcome::NoChanges),
            Stage::NoLayer => return Next::Done(Outcome::NoLayer),
        };
        Next::Run(step)
    }

    /// Advance past the step recorded at `index`.
    fn apply(
        self,
        event: &PrEvent,
        layer_source: LayerSource,
        index: usize,
        record: &StepRecord,
    ) -> Result<Stage, ReplayError> {
        if !record.belongs_to(event) {
            return Err(ReplayError::OtherRun {
                index,
                pull_request_id: record.pull_request_id,
                repository_id: record.repository_id.clone(),
            });
        }
        let Next::Run(step) = self.next(event, layer_source) else {
            return Err(ReplayError::AfterTerminal { index });
        };
        let expected = step.kind();
        if record.step != expected {
            return Err(ReplayError::UnexpectedStep {
                index,
                expected,
                recorded: record.step,
            });
        }

        match (self, &record.output) {
            (Stage::FetchingChanges, StepOutput::Changes(changes)) => {
                if changes.code.trim().is_empty() {
                    Ok(Stage::NoChanges)
                } else {
                    Ok(Stage::InferringLayer {
                        code: changes.code.clone(),
                    })
                }
            }
            (Stage::InferringLayer { code }, StepOutput::Layer(layer)) => Ok(match layer {
                Some(layer) => Stage::Analyzing {
                    code,
                    layer: *layer,
                },
                None => Stage::NoLayer,
            }),
            (Stage::Analyzing { .. }, StepOutput::Analysis(analysis)) => Ok(Stage::PostingComment {
                analysis: analysis.clone(),
            }),
            (Stage::PostingComment { .. }, StepOutput::CommentPosted) => Ok(Stage::Completed),
            _ => Err(ReplayError::UnexpectedOutput {
                index,
                step: record.step,
            }),
        }
    }
}

/// The changes recorded by an earlier run, if it got that far.
pub fn recorded_changes(history: &[StepRecord]) -> Option<&FetchedChanges> {
    history.iter().find_map(|record| match &record.output {
        StepOutput::Changes(changes) => Some(changes),
        _ => None,
    })
}

/// Fold a step log into the stage it leads to.
pub fn reduce(
    event: &PrEvent,
    layer_source: LayerSource,
    history: &[StepRecord],
) -> Result<Stage, ReplayError> {
    history
        .iter()
        .enumerate()
        .try_fold(Stage::FetchingChanges, |stage, (index, record)| {
            stage.apply(event, layer_source, index, record)
        })
}
