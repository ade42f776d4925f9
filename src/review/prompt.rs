use serde::{Deserialize, Serialize};

use super::layer::Layer;
use crate::config::Config;

/// Version tag the model is asked to echo in `meta.promptVersion`.
pub const PROMPT_VERSION: &str = "2";

/// Output contract appended to the rule set.
pub const DEFAULT_SCHEMA: &str = r#"Respond with a single JSON object and nothing else, using exactly this shape:
{
  "violationFound": boolean,
  "violations": [
    {
      "rule": string,
      "principle": string,
      "severity": "low" | "medium" | "high",
      "lines": [int],
      "evidence": string,
      "suggestion": string
    }
  ],
  "explanation": string,
  "meta": { "layer": string, "promptVersion": string }
}
"violationFound" and "explanation" are required. When no rule is broken, set "violationFound" to false and return an empty "violations" array."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
}

/// A complete chat-completion call. Serializes to the request body; the
/// deployment travels in the URL instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    #[serde(skip)]
    pub deployment: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

/// A worked example: code shown to the model and the verdict it should give.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FewShotExample {
    pub input: String,
    pub output: String,
}

/// Built-in example pair: one compliant, one violating.
pub fn default_examples() -> Vec<FewShotExample> {
    vec![
        FewShotExample {
            input: "CORRECT (Application -> interface via DI):\n\
                    public class OrderService { private readonly IOrderRepository _repo; \
                    public OrderService(IOrderRepository repo) { _repo = repo; } }"
                .to_string(),
            output: format!(
                r#"{{"violationFound":false,"violations":[],"explanation":"Service depends on interface via DI.","meta":{{"layer":"Application","promptVersion":"{}"}}}}"#,
                PROMPT_VERSION
            ),
        },
        FewShotExample {
            input: "WRONG (Application -> concrete repo):\n\
                    public class WrongService { public Product Get(int id) { \
                    var repo = new ProductRepository(); return repo.GetById(id); } }"
                .to_string(),
            output: format!(
                r#"{{"violationFound":true,"violations":[{{"rule":"Service uses concrete repository","principle":"Onion/DI","severity":"high","lines":[1,2,3],"evidence":"new ProductRepository() inside Application service","suggestion":"Inject IProductRepository via constructor and depend on Core interface only"}}],"explanation":"Direct repo instantiation in Application.","meta":{{"layer":"Application","promptVersion":"{}"}}}}"#,
                PROMPT_VERSION
            ),
        },
    ]
}

/// The input of one model call. Built once per analysis and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    code: String,
    layer: Layer,
    context: Option<String>,
}

impl AnalysisRequest {
    /// A blank `context` is stored as no context.
    pub fn new(code: impl Into<String>, layer: Layer, context: impl Into<String>) -> Self {
        let context = context.into();
        Self {
            code: code.into(),
            layer,
            context: if context.trim().is_empty() {
                None
            } else {
                Some(context)
            },
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

/// Builds the fixed review conversation: rules, optional context, example
/// pairs, then the code under review.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    rules: String,
    schema: String,
    examples: Vec<FewShotExample>,
    code_fence: String,
    deployment: String,
    temperature: f32,
    max_tokens: u32,
}

impl PromptAssembler {
    pub fn new(rules: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            rules: rules.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            examples: default_examples(),
            code_fence: "csharp".to_string(),
            deployment: deployment.into(),
            temperature: 0.1,
            max_tokens: 800,
        }
    }

    pub fn from_config(config: &Config, rules: String) -> Self {
        let mut assembler = Self::new(rules, config.model.deployment.clone());
        if let Some(schema) = config.prompt.schema.as_ref().filter(|s| !s.trim().is_empty()) {
            assembler.schema = schema.clone();
        }
        if let Some(examples) = config.prompt.examples.as_ref() {
            assembler.examples = examples.clone();
        }
        assembler.code_fence = config.prompt.code_fence.clone();
        assembler.temperature = config.model.temperature;
        assembler.max_tokens = config.model.max_tokens;
        assembler
    }

    pub fn assemble(&self, request: &AnalysisRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(3 + self.examples.len() * 2);
        messages.push(ChatMessage::system(format!(
            "{}\n\n{}",
            self.rules.trim_end(),
            self.schema
        )));

        if let Some(context) = request.context() {
            messages.push(ChatMessage::system(format!(
                "Project context (layer = {}):\n{}",
                request.layer(),
                context
            )));
        }

        for example in &self.examples {
            messages.push(ChatMessage::user(example.input.clone()));
            messages.push(ChatMessage::assistant(example.output.clone()));
        }

        messages.push(ChatMessage::user(format!(
            "Layer={}. Analyze ONLY the following code against the rules above. Output JSON only.\n\n```{}\n{}\n```",
            request.layer(),
            self.code_fence,
            request.code().trim_end()
        )));

        ChatRequest {
            deployment: self.deployment.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat::JsonObject,
        }
    }
}
