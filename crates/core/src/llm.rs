use async_trait::async_trait;

use crate::{
    config::{AppConfig, LlmSettings},
    error::{PipelineError, Result},
};

/// One chat-completions call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Command name used to pick per-command model overrides.
    pub command: &'static str,
    pub system: String,
    pub user: String,
    pub temperature: f64,
    /// Ask for a JSON object response.
    pub json: bool,
}

impl ChatRequest {
    pub fn new(command: &'static str, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            command,
            system: system.into(),
            user: user.into(),
            temperature: 0.7,
            json: false,
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` client.
///
/// Settings are resolved per request so `[llm.commands.*]` overrides apply.
pub struct ChatClient {
    client: reqwest::Client,
    config: AppConfig,
}

impl ChatClient {
    pub fn new(config: AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn body(settings: &LlmSettings, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": settings.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
        });
        if request.json {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let settings = self.config.llm_for(request.command)?;
        tracing::debug!(command = request.command, model = %settings.model, "chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", settings.base_url))
            .bearer_auth(&settings.api_key)
            .json(&Self::body(&settings, &request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::external(
                "chat-completions",
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }

        let response = response.json::<serde_json::Value>().await?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                PipelineError::external("chat-completions", format!("Invalid API response: {response}"))
            })?;

        Ok(content.to_string())
    }
}

/// Drop a surrounding markdown code fence, if any.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
