use async_trait::async_trait;
use serde_json::{json, Value};

use pmcp_types::{RuleEvaluation, SceneAnalysis, WatchRule};

use super::{
    encode_image, http_client, parse_rule_evaluations, parse_scene_analysis, prompts,
    ProviderError, Result, VlmProvider,
};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini `generateContent` adapter.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            api_key,
            model,
            client: http_client()?,
        })
    }

    async fn complete(&self, image_jpeg: &[u8], prompt: &str) -> Result<String> {
        let url = format!("{BASE_URL}/{}:generateContent", self.model);
        let body = json!({
            "system_instruction": {
                "parts": [{ "text": prompts::SCENE_SYSTEM }],
            },
            "contents": [{
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "image/jpeg",
                            "data": encode_image(image_jpeg),
                        },
                    },
                    { "text": prompt },
                ],
            }],
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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
        let text = value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::BadJson("missing candidates[0].content.parts[0].text".into())
            })?;
        Ok(text.to_string())
    }
}

#[async_trait]
impl VlmProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        "gemini"
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
