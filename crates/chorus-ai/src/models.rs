//! Models chorus ships prices and capabilities for

use crate::{CostInfo, Model, Provider};

/// Model used when neither the config nor the command line names one
pub const DEFAULT_MODEL_ID: &str = "o3-mini";

/// id, display name, provider, reasoning, (input, output, cache read) $/Mtok
type Entry = (&'static str, &'static str, Provider, bool, (f64, f64, f64));

const KNOWN_MODELS: &[Entry] = &[
    ("o3-mini", "o3-mini", Provider::OpenAI, true, (1.1, 4.4, 0.55)),
    ("o4-mini", "o4-mini", Provider::OpenAI, true, (1.1, 4.4, 0.275)),
    ("gpt-4o", "GPT-4o", Provider::OpenAI, false, (2.5, 10.0, 1.25)),
    ("gpt-4o-mini", "GPT-4o mini", Provider::OpenAI, false, (0.15, 0.6, 0.075)),
    (
        "llama-3.3-70b-versatile",
        "Llama 3.3 70B",
        Provider::Groq,
        false,
        (0.59, 0.79, 0.0),
    ),
];

fn build(entry: &Entry) -> Model {
    let (id, name, provider, reasoning, (input, output, cache_read)) = *entry;
    Model {
        id: id.to_string(),
        name: name.to_string(),
        provider,
        base_url: provider.default_base_url().to_string(),
        reasoning,
        cost: CostInfo {
            input,
            output,
            cache_read,
        },
    }
}

/// A registered model, if the id is known
pub fn get_model_by_id(id: &str) -> Option<Model> {
    KNOWN_MODELS.iter().find(|entry| entry.0 == id).map(build)
}

/// Resolve a model for `provider`.
///
/// Unknown ids get a zero-cost, non-reasoning definition at the provider's
/// default URL. `base_url` overrides the URL either way.
pub fn resolve_model(provider: Provider, id: &str, base_url: Option<&str>) -> Model {
    let mut model = get_model_by_id(id).unwrap_or_else(|| Model {
        id: id.to_string(),
        name: id.to_string(),
        provider,
        base_url: provider.default_base_url().to_string(),
        reasoning: false,
        cost: CostInfo::default(),
    });
    if let Some(url) = base_url {
        model.base_url = url.trim_end_matches('/').to_string();
    }
    model
}
