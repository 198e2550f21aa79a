use async_trait::async_trait;
use serde_json::{json, Value};

use pmcp_types::{RuleEvaluation, SceneAnalysis, WatchRule};

use super::{
    encode_image, http_client, parse_rule_evaluations, parse_scene_analysis, prompts,
    ProviderError, Result, VlmProvider,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_TOKENS: u32 = 1024;

/// OpenAI chat-completions adapter; with a custom `base_url` it doubles as
/// the generic OpenAI-compatible provider (Ollama, llama.cpp, vLLM, ...).
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    compatible: bool,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Result<Self> {
        let compatible = base_url.is_some();
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            api_key,
            model,
            base_url,
            compatible,
            client: http_client()?,
        })
    }

    async fn complete(&self, image_jpeg: &[u8], prompt: &str) -> Result<String> {
        let data_url = format!("data:image/jpeg;base64,{}", encode_image(image_jpeg));
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [
                { "role": "system", "content": prompts::SCENE_SYSTEM },
                {
                    "role": "user",
                    "content": [
                        { "type": "image_url", "image_url": { "url": data_url } },
                        { "type": "text", "text": prompt },
                    ],
                },
            ],
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::BadJson("missing choices[0].message.content".into())
            })?;
        Ok(text.to_string())
    }
}

#[async_trait]
impl VlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        if self.compatible {
            "openai_compatible"
        } else {
            "openai"
        }
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
