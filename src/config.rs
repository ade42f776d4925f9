use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::review::prompt::FewShotExample;

/// Default configuration file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".arch-reviewer.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required configuration: {}", .keys.join(", "))]
    Missing { keys: Vec<String> },
}

/// Top-level configuration loaded from `.arch-reviewer.toml`.
/// Every section is optional in the file; secrets usually come from the
/// environment instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devops: DevOpsConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub prompt: PromptConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

/// Azure DevOps organisation access.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevOpsConfig {
    /// e.g. https://dev.azure.com/my-org. Falls back to AZURE_DEVOPS_ORG_URL.
    pub org_url: Option<String>,
    /// Personal access token. Falls back to AZURE_DEVOPS_PAT.
    pub pat: Option<String>,
    /// File extensions that count as reviewable source
    pub source_extensions: Vec<String>,
}

impl Default for DevOpsConfig {
    fn default() -> Self {
        Self {
            org_url: None,
            pat: None,
            source_extensions: vec![".cs".to_string()],
        }
    }
}

/// Azure OpenAI chat-completion deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: String,
    pub api_version: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: "gpt-4o".to_string(),
            api_version: "2024-02-01".to_string(),
            temperature: 0.1,
            max_tokens: 800,
        }
    }
}

/// Rule text and few-shot material for the review prompt.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Inline rule set. Takes precedence over `rules_file`.
    pub rules: Option<String>,
    pub rules_file: Option<PathBuf>,
    /// Overrides the built-in JSON schema description
    pub schema: Option<String>,
    /// Overrides the built-in compliant/violating example pair
    pub examples: Option<Vec<FewShotExample>>,
    /// Language tag of the code fence around the reviewed code
    pub code_fence: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            rules: None,
            rules_file: None,
            schema: None,
            examples: None,
            code_fence: "csharp".to_string(),
        }
    }
}

/// Azure AI Search index holding per-layer reference documents.
/// Leaving it unconfigured disables context retrieval.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: Option<String>,
    pub index: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    pub max_docs: usize,
    pub max_chars_per_doc: usize,
    pub max_total_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            index: None,
            api_key: None,
            api_version: "2023-11-01".to_string(),
            max_docs: 4,
            max_chars_per_doc: 6000,
            max_total_chars: 14000,
        }
    }
}

/// How the pipeline decides which layer a PR belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerSource {
    /// Scan changed file paths
    #[default]
    Changes,
    /// Read the layer from the source branch name
    Branch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub layer_source: LayerSource,
    /// Attempts for the analysis step before the run fails
    pub analysis_attempts: u32,
    pub step_timeout_secs: u64,
    /// When false the analysis step passes malformed model output through
    /// and the comment reports the review as inconclusive.
    pub strict_contract: bool,
    pub footer: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            layer_source: LayerSource::Changes,
            analysis_attempts: 2,
            step_timeout_secs: 120,
            strict_contract: true,
            footer: "Reviewed by Architecture Review Assistant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

/// Validated Azure DevOps credentials.
#[derive(Debug, Clone)]
pub struct DevOpsSettings {
    pub org_url: String,
    pub pat: String,
    pub source_extensions: Vec<String>,
}

/// Validated model endpoint.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

/// Validated search index access.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub endpoint: String,
    pub index: String,
    pub api_key: String,
    pub api_version: String,
}

impl Config {
    /// Load configuration from `path`, or from `.arch-reviewer.toml` in the
    /// current directory when no path is given. A missing default file
    /// yields the default config; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from(default_path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from a specific path without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Fill unset values from environment variables. Values from the
    /// config file win.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.as_deref().map_or(true, |s| s.trim().is_empty()) {
                if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
                    *slot = Some(v);
                }
            }
        }

        fill(&mut self.devops.org_url, lookup("AZURE_DEVOPS_ORG_URL"));
        fill(&mut self.devops.pat, lookup("AZURE_DEVOPS_PAT"));
        fill(&mut self.model.endpoint, lookup("AZURE_OPENAI_ENDPOINT"));
        fill(&mut self.model.api_key, lookup("AZURE_OPENAI_KEY"));
        fill(&mut self.prompt.rules, lookup("ANALYSIS_SYSTEM_PROMPT"));
        fill(&mut self.search.endpoint, lookup("AZURE_SEARCH_ENDPOINT"));
        fill(&mut self.search.index, lookup("AZURE_SEARCH_INDEX"));
        fill(&mut self.search.api_key, lookup("AZURE_SEARCH_API_KEY"));
        if let Some(deployment) = lookup("AZURE_OPENAI_DEPLOYMENT").filter(|d| !d.trim().is_empty()) {
            self.model.deployment = deployment;
        }
    }

    /// Check every value a review run cannot start without and report all
    /// of the missing ones at once.
    pub fn check_required(&self) -> Result<(), ConfigError> {
        let mut keys = Vec::new();
        let mut need = |present: bool, key: &str| {
            if !present {
                keys.push(key.to_string());
            }
        };

        need(is_set(&self.devops.org_url), "devops.org_url (AZURE_DEVOPS_ORG_URL)");
        need(is_set(&self.devops.pat), "devops.pat (AZURE_DEVOPS_PAT)");
        need(is_set(&self.model.endpoint), "model.endpoint (AZURE_OPENAI_ENDPOINT)");
        need(is_set(&self.model.api_key), "model.api_key (AZURE_OPENAI_KEY)");
        let rules_key = match (&self.prompt.rules, &self.prompt.rules_file) {
            (rules, Some(path)) if !is_set(rules) => format!("prompt.rules_file ({})", path.display()),
            _ => "prompt.rules (ANALYSIS_SYSTEM_PROMPT)".to_string(),
        };
        need(self.rules().is_ok(), &rules_key);

        if keys.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing { keys })
        }
    }

    pub fn devops_settings(&self) -> Result<DevOpsSettings, ConfigError> {
        Ok(DevOpsSettings {
            org_url: required(&self.devops.org_url, "devops.org_url")?
                .trim_end_matches('/')
                .to_string(),
            pat: required(&self.devops.pat, "devops.pat")?,
            source_extensions: self.devops.source_extensions.clone(),
        })
    }

    pub fn model_settings(&self) -> Result<ModelSettings, ConfigError> {
        Ok(ModelSettings {
            endpoint: required(&self.model.endpoint, "model.endpoint")?
                .trim_end_matches('/')
                .to_string(),
            api_key: required(&self.model.api_key, "model.api_key")?,
            deployment: self.model.deployment.clone(),
            api_version: self.model.api_version.clone(),
        })
    }

    /// Search settings, or `None` when the index is not fully configured.
    pub fn search_settings(&self) -> Option<SearchSettings> {
        Some(SearchSettings {
            endpoint: self.search.endpoint.clone().filter(|s| !s.trim().is_empty())?,
            index: self.search.index.clone().filter(|s| !s.trim().is_empty())?,
            api_key: self.search.api_key.clone().filter(|s| !s.trim().is_empty())?,
            api_version: self.search.api_version.clone(),
        })
    }

    /// Resolve the rule text: inline rules first, then `rules_file`.
    /// A blank rules file counts as missing.
    pub fn rules(&self) -> Result<String, ConfigError> {
        if let Some(rules) = self.prompt.rules.as_ref().filter(|r| !r.trim().is_empty()) {
            return Ok(rules.clone());
        }
        let Some(path) = &self.prompt.rules_file else {
            return Err(ConfigError::Missing {
                keys: vec!["prompt.rules".to_string()],
            });
        };
        let rules = fs::read_to_string(path)?;
        if rules.trim().is_empty() {
            return Err(ConfigError::Missing {
                keys: vec![format!("prompt.rules_file ({})", path.display())],
            });
        }
        Ok(rules)
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn required(value: &Option<String>, key: &str) -> Result<String, ConfigError> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing {
            keys: vec![key.to_string()],
        })
}
