use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::context::ContextRetriever;
use super::contract::{validate_strict, ContractViolation};
use super::layer::Layer;
use super::model::{ModelClient, ModelError};
use super::prompt::{AnalysisRequest, PromptAssembler};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

/// The analysis step: context retrieval, prompt assembly, model call and
/// output validation.
pub struct CodeAnalyzer {
    retriever: Arc<dyn ContextRetriever>,
    assembler: PromptAssembler,
    model: Arc<dyn ModelClient>,
    strict: bool,
}

impl CodeAnalyzer {
    /// With `strict` set, output that breaks the contract fails the step.
    /// Otherwise it is passed through for the lenient parser to report as
    /// inconclusive.
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        assembler: PromptAssembler,
        model: Arc<dyn ModelClient>,
        strict: bool,
    ) -> Self {
        Self {
            retriever,
            assembler,
            model,
            strict,
        }
    }

    /// Review `code` as `layer` and return the model's raw JSON verdict.
    #[instrument(skip(self, code), fields(layer = %layer, code_bytes = code.len()))]
    pub async fn analyze(&self, code: &str, layer: Layer) -> Result<String, AnalysisError> {
        let context = self.retriever.context_for_layer(layer).await;
        let request = AnalysisRequest::new(code, layer, context);
        let chat = self.assembler.assemble(&request);
        debug!(
            messages = chat.messages.len(),
            with_context = request.context().is_some(),
            "assembled review prompt"
        );

        let raw = self.model.complete(&chat).await?;
        if self.strict {
            if let Err(violation) = validate_strict(&raw) {
                warn!(error = %violation, "model response broke the output contract");
                return Err(violation.into());
            }
        }

        info!("received analysis from model");
        Ok(raw)
    }
}
