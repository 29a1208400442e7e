use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

const TEMPERATURE: f64 = 0.3;

/// Narrow contract over the external language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the assistant message content, or `None` when the provider
    /// answered without content.
    async fn complete(&self, system: &str, user: &str) -> Result<Option<String>>;
}

/// Chat-completions client requesting JSON-structured output.
pub struct OpenAiChat {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_url(DEFAULT_LLM_API_URL, api_key, model)
    }

    pub fn with_url(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        OpenAiChat {
            client: Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<Option<String>> {
        let body = json!({
            "model": self.model,
            "temperature": TEMPERATURE,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response: Value = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.get("error").is_some() {
            let message = response["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(anyhow::anyhow!(message));
        }

        Ok(response["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(|content| content.to_string()))
    }
}
