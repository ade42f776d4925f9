use serde::{Deserialize, Serialize};

/// Architectural tier the conformance rules are scoped to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    WebApiServer,
    #[default]
    Application,
    Infrastructure,
    Core,
}

impl Layer {
    /// Marker match order: the first layer found in this order wins.
    pub const PRIORITY: [Layer; 4] = [
        Layer::WebApiServer,
        Layer::Application,
        Layer::Infrastructure,
        Layer::Core,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::WebApiServer => "WebApiServer",
            Layer::Application => "Application",
            Layer::Infrastructure => "Infrastructure",
            Layer::Core => "Core",
        }
    }

    /// Case-insensitive lookup by layer name.
    pub fn from_name(name: &str) -> Option<Layer> {
        Layer::PRIORITY
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the layer of a path-annotated code blob.
///
/// Looks for `/Project.Layer/` or `/Layer/` path markers, ignoring case,
/// in [`Layer::PRIORITY`] order. Blank input or no marker gives
/// `Application`.
pub fn infer_layer(code: &str) -> Layer {
    if code.trim().is_empty() {
        return Layer::default();
    }
    let haystack = code.to_ascii_lowercase();
    Layer::PRIORITY
        .into_iter()
        .find(|layer| mentions_layer(&haystack, &layer.as_str().to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Layer named by a branch ref such as `refs/heads/feature/core/orders`,
/// taken from the first path segment that is a layer name.
pub fn layer_from_ref(source_ref: &str) -> Option<Layer> {
    source_ref.split('/').find_map(Layer::from_name)
}

fn mentions_layer(haystack: &str, layer: &str) -> bool {
    if haystack.contains(&format!("/{}/", layer)) {
        return true;
    }

    // Namespaced form: the segment before ".layer/" must be a non-empty
    // project name starting right after a '/'.
    let needle = format!(".{}/", layer);
    haystack.match_indices(&needle).any(|(idx, _)| {
        let before = &haystack[..idx];
        match before.rfind('/') {
            Some(slash) => {
                let project = &before[slash + 1..];
                !project.is_empty() && !project.chars().any(char::is_whitespace)
            }
            None => false,
        }
    })
}
