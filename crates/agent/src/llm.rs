use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use sokoni_core::config::{LlmConfig, LlmProvider};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm response malformed: {0}")]
    Malformed(String),
}

/// Reasoning/vision model contract: prompt text in, raw completion out.
/// Everything downstream treats the completion as untrusted data.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, image_url: Option<&str>) -> Result<String, LlmError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

/// The structured shape the model is prompted to produce. Parsing is
/// forgiving: a malformed completion degrades to `ModelReply::fallback`
/// rather than an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub reply_text: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub actions: Vec<ToolInvocation>,
    #[serde(default)]
    pub entities: Value,
}

impl ModelReply {
    pub fn fallback() -> Self {
        Self {
            reply_text: "I'm sorry, I didn't quite catch that. Could you say it again?".to_string(),
            intent: None,
            actions: Vec::new(),
            entities: Value::Null,
        }
    }
}

/// Strip the markdown code fences some models wrap around JSON output.
pub fn clean_json_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

pub fn parse_model_reply(raw: &str) -> ModelReply {
    match serde_json::from_str::<ModelReply>(clean_json_fences(raw)) {
        Ok(reply) => reply,
        Err(error) => {
            warn!(event_name = "llm.reply_malformed", error = %error, "model reply did not parse; using fallback");
            ModelReply::fallback()
        }
    }
}

/// Parse an arbitrary JSON object out of a completion, used for the
/// routing decision and entity extraction payloads.
pub fn parse_json_object(raw: &str) -> Result<Value, LlmError> {
    let value: Value = serde_json::from_str(clean_json_fences(raw))
        .map_err(|error| LlmError::Malformed(error.to_string()))?;
    if !value.is_object() {
        return Err(LlmError::Malformed("expected a JSON object".to_string()));
    }
    Ok(value)
}

/// HTTP client for the configured provider. Request shapes differ per
/// provider; the rest of the engine only ever sees the raw completion.
pub struct HttpLlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    api_key: Option<SecretString>,
    base_url: Option<String>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Request(error.to_string()))?;

        Ok(Self {
            http,
            provider: config.provider,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LlmError::Request("llm api key is not configured".to_string()))
    }

    fn request_parts(
        &self,
        prompt: &str,
        image_url: Option<&str>,
    ) -> Result<(String, Value, Vec<(String, String)>), LlmError> {
        let key = self.api_key()?;
        match self.provider {
            LlmProvider::Gemini => {
                let base = self
                    .base_url
                    .as_deref()
                    .unwrap_or("https://generativelanguage.googleapis.com");
                let url = format!(
                    "{base}/v1beta/models/{model}:generateContent?key={key}",
                    model = self.model
                );
                let mut parts = vec![json!({ "text": prompt })];
                if let Some(image_url) = image_url {
                    parts.push(json!({
                        "file_data": { "mime_type": "image/jpeg", "file_uri": image_url }
                    }));
                }
                let body = json!({ "contents": [{ "parts": parts }] });
                Ok((url, body, Vec::new()))
            }
            LlmProvider::OpenAi => {
                let base = self.base_url.as_deref().unwrap_or("https://api.openai.com");
                let url = format!("{base}/v1/chat/completions");
                let content = match image_url {
                    Some(image_url) => json!([
                        { "type": "text", "text": prompt },
                        { "type": "image_url", "image_url": { "url": image_url } },
                    ]),
                    None => Value::String(prompt.to_string()),
                };
                let body = json!({
                    "model": self.model,
                    "messages": [{ "role": "user", "content": content }],
                });
                let headers = vec![("Authorization".to_string(), format!("Bearer {key}"))];
                Ok((url, body, headers))
            }
            LlmProvider::Anthropic => {
                let base = self.base_url.as_deref().unwrap_or("https://api.anthropic.com");
                let url = format!("{base}/v1/messages");
                let content = match image_url {
                    Some(image_url) => json!([
                        { "type": "text", "text": prompt },
                        { "type": "image", "source": { "type": "url", "url": image_url } },
                    ]),
                    None => Value::String(prompt.to_string()),
                };
                let body = json!({
                    "model": self.model,
                    "max_tokens": 1024,
                    "messages": [{ "role": "user", "content": content }],
                });
                let headers = vec![
                    ("x-api-key".to_string(), key.to_string()),
                    ("anthropic-version".to_string(), "2023-06-01".to_string()),
                ];
                Ok((url, body, headers))
            }
        }
    }

    fn extract_text(&self, payload: &Value) -> Result<String, LlmError> {
        let text = match self.provider {
            LlmProvider::Gemini => payload
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(Value::as_str),
            LlmProvider::OpenAi => {
                payload.pointer("/choices/0/message/content").and_then(Value::as_str)
            }
            LlmProvider::Anthropic => payload.pointer("/content/0/text").and_then(Value::as_str),
        };

        text.map(str::to_owned)
            .ok_or_else(|| LlmError::Malformed("completion payload had no text".to_string()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, prompt: &str, image_url: Option<&str>) -> Result<String, LlmError> {
        let (url, body, headers) = self.request_parts(prompt, image_url)?;

        let mut last_error = LlmError::Request("no attempts made".to_string());
        for attempt in 0..=self.max_retries {
            let mut request = self.http.post(&url).json(&body);
            for (name, value) in &headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let payload: Value = response
                        .json()
                        .await
                        .map_err(|error| LlmError::Malformed(error.to_string()))?;
                    return self.extract_text(&payload);
                }
                Ok(response) => {
                    last_error =
                        LlmError::Request(format!("provider returned {}", response.status()));
                }
                Err(error) => {
                    last_error = LlmError::Request(error.to_string());
                }
            }

            if attempt < self.max_retries {
                warn!(
                    event_name = "llm.retry",
                    attempt,
                    max_retries = self.max_retries,
                    error = %last_error,
                    "llm call failed; retrying"
                );
                tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{LlmClient, LlmError};

    /// Scripted model client: pops one canned completion per call, and
    /// fails once the script is exhausted.
    pub struct ScriptedLlmClient {
        completions: Mutex<VecDeque<Result<String, String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlmClient {
        pub fn with_script(completions: Vec<Result<String, String>>) -> Self {
            Self { completions: Mutex::new(completions.into()), prompts: Mutex::new(Vec::new()) }
        }

        pub fn failing() -> Self {
            Self::with_script(Vec::new())
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn generate(
            &self,
            prompt: &str,
            _image_url: Option<&str>,
        ) -> Result<String, LlmError> {
            self.prompts.lock().await.push(prompt.to_string());
            match self.completions.lock().await.pop_front() {
                Some(Ok(completion)) => Ok(completion),
                Some(Err(error)) => Err(LlmError::Request(error)),
                None => Err(LlmError::Request("script exhausted".to_string())),
            }
        }
    }
}
