use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::layer::Layer;
use crate::config::{SearchConfig, SearchSettings};
use crate::http::{build_url, HttpClient, HttpError, HttpRequest};

/// Source of layer-scoped reference material for the prompt.
///
/// Retrieval is best effort: implementations return an empty string
/// instead of an error, and the review continues without context.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn context_for_layer(&self, layer: Layer) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_docs: usize,
    pub max_chars_per_doc: usize,
    pub max_total_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for ContextLimits {
    fn from(config: &SearchConfig) -> Self {
        Self {
            max_docs: config.max_docs,
            max_chars_per_doc: config.max_chars_per_doc,
            max_total_chars: config.max_total_chars,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchDocument {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchDocument>,
}

/// Azure AI Search retriever over an index whose documents carry a `layer`
/// field.
pub struct SearchContextRetriever {
    http: Arc<dyn HttpClient>,
    settings: Option<SearchSettings>,
    limits: ContextLimits,
}

impl SearchContextRetriever {
    /// `settings == None` disables retrieval.
    pub fn new(http: Arc<dyn HttpClient>, settings: Option<SearchSettings>, limits: ContextLimits) -> Self {
        Self {
            http,
            settings,
            limits,
        }
    }

    async fn search(&self, settings: &SearchSettings, layer: Layer) -> Result<Vec<SearchDocument>, HttpError> {
        let url = build_url(
            &settings.endpoint,
            &["indexes", &settings.index, "docs", "search"],
            &[("api-version", &settings.api_version)],
        )?;
        let body = serde_json::json!({
            "search": "*",
            "top": self.limits.max_docs,
            "filter": format!("layer eq '{}'", layer),
            "select": "id,path,layer,content",
        });
        let request = HttpRequest::post_json(url, body).header("api-key", &settings.api_key);
        let response: SearchResponse = self.http.send(request).await?.error_for_status()?.json()?;
        Ok(response.value)
    }
}

#[async_trait]
impl ContextRetriever for SearchContextRetriever {
    #[instrument(skip(self), fields(layer = %layer))]
    async fn context_for_layer(&self, layer: Layer) -> String {
        let Some(settings) = &self.settings else {
            info!("search index not configured; skipping context retrieval");
            return String::new();
        };

        match self.search(settings, layer).await {
            Ok(documents) => {
                debug!(documents = documents.len(), "search returned documents");
                let context = assemble_context(&documents, &self.limits);
                if context.is_empty() {
                    info!("no usable context documents for layer");
                } else {
                    info!(context_chars = context.chars().count(), "retrieved layer context");
                }
                context
            }
            Err(e) => {
                warn!(error = %e, "context retrieval failed; continuing without context");
                String::new()
            }
        }
    }
}

/// Join search hits into one context block within `limits`.
///
/// Each document loses a leading `<!-- ... -->` marker line, is cut to
/// `max_chars_per_doc` characters and is skipped when empty. Assembly stops
/// at the first document that would push the total past `max_total_chars`.
pub fn assemble_context(documents: &[SearchDocument], limits: &ContextLimits) -> String {
    let mut out = String::new();
    let mut total = 0usize;

    for doc in documents.iter().take(limits.max_docs) {
        let body = truncate_chars(strip_marker(&doc.content).trim(), limits.max_chars_per_doc).trim_end();
        if body.is_empty() {
            continue;
        }

        let path = doc.path.trim();
        let section = if path.is_empty() {
            format!("{}\n\n", body)
        } else {
            format!("### {}\n{}\n\n", path, body)
        };
        let section_chars = section.chars().count();
        if total + section_chars > limits.max_total_chars {
            debug!(path, "context budget reached");
            break;
        }
        out.push_str(&section);
        total += section_chars;
    }

    out.truncate(out.trim_end().len());
    out
}

fn strip_marker(content: &str) -> &str {
    let trimmed = content.trim_start();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    let first = first.trim();
    if first.starts_with("<!--") && first.ends_with("-->") {
        rest
    } else {
        content
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
