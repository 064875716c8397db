//! OpenAI-compatible chat completions client (batch only).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use ragline_core::config::OpenAiConfig;
use ragline_core::SamplingParameters;

use crate::error::LlmError;
use crate::model::CompletionModel;
use crate::prompt::{ChatMessage, Prompt};

/// Sampling parameters derived from the `[openai]` section.
pub fn sampling(config: &OpenAiConfig) -> SamplingParameters {
    SamplingParameters {
        temperature: config.temperature,
        top_p: Some(config.top_p),
        top_k: None,
        max_tokens: config.max_tokens,
        stream: false,
        repeat_penalty: None,
        frequency_penalty: Some(config.frequency_penalty),
        presence_penalty: Some(config.presence_penalty),
        stop: Vec::new(),
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/v1/chat/completions` server.
pub struct OpenAiModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenAiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiModel {
    pub fn new(config: &OpenAiConfig, request_timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("cannot build HTTP client: {e}")))?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            base_url: base.strip_suffix("/v1").unwrap_or(base).to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn request_body(&self, prompt: &Prompt, sampling: &SamplingParameters) -> ChatCompletionRequest<'_> {
        ChatCompletionRequest {
            model: &self.model,
            messages: prompt.to_messages(),
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            max_tokens: sampling.max_tokens,
            frequency_penalty: sampling.frequency_penalty,
            presence_penalty: sampling.presence_penalty,
            stop: sampling.stop.clone(),
            stream: false,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl CompletionModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn connect(&self) -> Result<(), LlmError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .authorized(self.http.get(&url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::Http {
                status: response.status().as_u16(),
                body: "model listing failed".into(),
            })
        }
    }

    #[instrument(skip(self, prompt, sampling), fields(model = %self.model))]
    async fn complete(
        &self,
        prompt: &Prompt,
        sampling: &SamplingParameters,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(prompt, sampling);
        let response = self.authorized(self.http.post(&url)).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".into()))?;
        debug!(chars = content.len(), "Completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> OpenAiModel {
        OpenAiModel::new(
            &OpenAiConfig {
                base_url: "https://api.example.com/v1/".into(),
                api_key: "sk-secret".into(),
                model: "gpt-4o-mini".into(),
                ..OpenAiConfig::default()
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_normalized() {
        assert_eq!(model().base_url, "https://api.example.com");
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", model());
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_request_body_shape() {
        let m = model();
        let s = sampling(&OpenAiConfig::default());
        let body = serde_json::to_value(m.request_body(&Prompt::bare("sys", "hello"), &s)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["frequency_penalty"], 0.0);
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi there"));
    }

    #[test]
    fn test_sampling_from_config() {
        let s = sampling(&OpenAiConfig::default());
        assert!(!s.stream);
        assert!(s.top_k.is_none());
        assert!(s.repeat_penalty.is_none());
        assert_eq!(s.presence_penalty, Some(0.0));
    }

    #[tokio::test]
    async fn test_complete_unreachable_server() {
        let m = OpenAiModel::new(
            &OpenAiConfig {
                base_url: "http://127.0.0.1:9".into(),
                ..OpenAiConfig::default()
            },
            Duration::from_secs(2),
        )
        .unwrap();
        let result = m
            .complete(&Prompt::bare("s", "u"), &SamplingParameters::default())
            .await;
        assert!(result.is_err());
    }
}
