pub mod analyzer;
pub mod context;
pub mod contract;
pub mod layer;
pub mod model;
pub mod prompt;

pub use analyzer::{AnalysisError, CodeAnalyzer};
pub use context::{ContextLimits, SearchContextRetriever};
pub use contract::parse_lenient;
pub use layer::{infer_layer, layer_from_ref, Layer};
pub use model::AzureOpenAiClient;
pub use prompt::PromptAssembler;
