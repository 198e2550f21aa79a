//! VLM provider interface and adapters.
//!
//! Providers are stateless: one image in, one JSON verdict out, under a hard
//! per-call timeout. Retry and backoff live in the perception loop, never
//! here. The per-provider request shapes differ; each adapter is a thin
//! translation onto the shared [`VlmProvider`] trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use pmcp_config_data::{ProviderKind, ReasoningConfig};
use pmcp_types::{RuleEvaluation, SceneAnalysis, WatchRule};

mod anthropic;
mod gemini;
pub mod json_extract;
mod openai;
pub mod prompts;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Hard per-call deadline.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("provider HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
    #[error("provider returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("provider returned unusable JSON: {0}")]
    BadJson(String),
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider is not configured")]
    NotConfigured,
}

impl ProviderError {
    /// Whether this failure is the `provider_bad_json` taxonomy kind (it is
    /// still treated as a provider error for backoff purposes).
    pub fn is_bad_json(&self) -> bool {
        matches!(self, ProviderError::BadJson(_))
    }
}

/// Capability interface over VLM providers.
#[async_trait]
pub trait VlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;

    async fn analyze_scene(&self, image_jpeg: &[u8], prior_context: &str)
        -> Result<SceneAnalysis>;

    async fn evaluate_rules(
        &self,
        image_jpeg: &[u8],
        rules: &[WatchRule],
        scene_context: &str,
    ) -> Result<Vec<RuleEvaluation>>;
}

/// Construct a provider from the reasoning config; `None` means client-side
/// mode (no provider).
pub fn build_provider(cfg: &ReasoningConfig) -> Result<Option<Arc<dyn VlmProvider>>> {
    let api_key = cfg.api_key.clone().unwrap_or_default();
    let provider: Arc<dyn VlmProvider> = match cfg.provider {
        ProviderKind::None => return Ok(None),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            api_key,
            cfg.model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
        )?),
        ProviderKind::Openai => Arc::new(OpenAiProvider::new(
            api_key,
            cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            None,
        )?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(
            api_key,
            cfg.model
                .clone()
                .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
        )?),
        ProviderKind::OpenaiCompatible => Arc::new(OpenAiProvider::new(
            api_key,
            cfg.model.clone().unwrap_or_else(|| "default".to_string()),
            cfg.base_url.clone(),
        )?),
    };
    Ok(Some(provider))
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?)
}

pub(crate) fn encode_image(image_jpeg: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(image_jpeg)
}

/// Parse the model's text into a [`SceneAnalysis`].
pub(crate) fn parse_scene_analysis(text: &str) -> Result<SceneAnalysis> {
    let value = json_extract::extract_json(text)
        .map_err(|_| ProviderError::BadJson(snippet(text)))?;
    serde_json::from_value(value).map_err(|_| ProviderError::BadJson(snippet(text)))
}

/// Parse the model's text into rule evaluations. Entries naming unknown
/// rules are kept; the rules engine drops them later.
pub(crate) fn parse_rule_evaluations(text: &str) -> Result<Vec<RuleEvaluation>> {
    let value = json_extract::extract_json(text)
        .map_err(|_| ProviderError::BadJson(snippet(text)))?;
    // Some models wrap the array in {"evaluations": [...]}.
    let array = match &value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(map) => map
            .get("evaluations")
            .or_else(|| map.get("results"))
            .cloned()
            .unwrap_or(value),
        _ => value,
    };
    serde_json::from_value(array).map_err(|_| ProviderError::BadJson(snippet(text)))
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_analysis_parses_partial_fields() {
        let a = parse_scene_analysis("{\"summary\": \"a room\"}").unwrap();
        assert_eq!(a.summary.as_deref(), Some("a room"));
        assert!(a.people_count.is_none());
    }

    #[test]
    fn rule_evaluations_accept_wrapped_array() {
        let direct = parse_rule_evaluations(
            "[{\"rule_id\":\"r_1\",\"triggered\":true,\"confidence\":0.9,\"reasoning\":\"x\"}]",
        )
        .unwrap();
        assert_eq!(direct.len(), 1);

        let wrapped = parse_rule_evaluations(
            "{\"evaluations\":[{\"rule_id\":\"r_1\",\"triggered\":false,\"confidence\":0.2}]}",
        )
        .unwrap();
        assert_eq!(wrapped.len(), 1);
        assert!(!wrapped[0].triggered);
    }

    #[test]
    fn prose_is_bad_json() {
        let err = parse_scene_analysis("I cannot see anything").unwrap_err();
        assert!(err.is_bad_json());
    }

    #[test]
    fn none_provider_builds_to_client_mode() {
        let cfg = ReasoningConfig::default();
        assert!(build_provider(&cfg).unwrap().is_none());
    }

    #[test]
    fn anthropic_provider_builds() {
        let cfg = ReasoningConfig {
            provider: ProviderKind::Anthropic,
            api_key: Some("sk-test".into()),
            model: None,
            base_url: None,
        };
        let provider = build_provider(&cfg).unwrap().unwrap();
        assert_eq!(provider.provider_name(), "anthropic");
        assert_eq!(provider.model_name(), "claude-sonnet-4-5");
    }
}
