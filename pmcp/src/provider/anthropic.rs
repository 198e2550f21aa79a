use async_trait::async_trait;
use serde_json::{json, Value};

use pmcp_types::{RuleEvaluation, SceneAnalysis, WatchRule};

use super::{
    encode_image, http_client, parse_rule_evaluations, parse_scene_analysis, prompts,
    ProviderError, Result, VlmProvider,
};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Anthropic Messages API adapter.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            api_key,
            model,
            client: http_client()?,
        })
    }

    async fn complete(&self, image_jpeg: &[u8], prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": prompts::SCENE_SYSTEM,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/jpeg",
                            "data": encode_image(image_jpeg),
                        },
                    },
                    { "type": "text", "text": prompt },
                ],
            }],
        });

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        let text = value["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::BadJson("missing content[0].text".into()))?;
        Ok(text.to_string())
    }
}

#[async_trait]
impl VlmProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn analyze_scene(
        &self,
        image_jpeg: &[u8],
        prior_context: &str,
    ) -> Result<SceneAnalysis> {
        let text = self
            .complete(image_jpeg, &prompts::scene_prompt(prior_context))
            .await?;
        parse_scene_analysis(&text)
    }

    async fn evaluate_rules(
        &self,
        image_jpeg: &[u8],
        rules: &[WatchRule],
        scene_context: &str,
    ) -> Result<Vec<RuleEvaluation>> {
        let text = self
            .complete(image_jpeg, &prompts::rules_prompt(rules, scene_context))
            .await?;
        parse_rule_evaluations(&text)
    }
}
