//! Ollama native API client (`/api/generate`, `/api/tags`).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::unfold;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use ragline_core::config::OllamaConfig;
use ragline_core::SamplingParameters;

use crate::error::LlmError;
use crate::model::{CompletionModel, FragmentStream, StreamingModel};
use crate::prompt::Prompt;

/// Sampling parameters derived from the `[ollama]` section.
pub fn sampling(config: &OllamaConfig, stream: bool) -> SamplingParameters {
    SamplingParameters {
        temperature: config.temperature,
        top_p: Some(config.top_p),
        top_k: Some(config.top_k),
        max_tokens: config.num_predict,
        stream,
        repeat_penalty: Some(config.repeat_penalty),
        frequency_penalty: None,
        presence_penalty: None,
        stop: config.stop.clone(),
    }
}

#[derive(Debug, Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    num_predict: u32,
    num_ctx: u32,
    #[serde(skip_serializing_if = "no_stop_words")]
    stop: &'a [String],
}

fn no_stop_words(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Client for one model on an Ollama server.
#[derive(Debug)]
pub struct OllamaModel {
    http: reqwest::Client,
    probe: reqwest::Client,
    base_url: String,
    model: String,
    num_ctx: u32,
}

impl OllamaModel {
    pub fn new(config: &OllamaConfig, request_timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("cannot build HTTP client: {e}")))?;
        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            probe,
            base_url: normalize_base_url(&config.base_url),
            model: config.model.clone(),
            num_ctx: config.num_ctx,
        })
    }

    fn request<'a>(
        &'a self,
        prompt: &Prompt,
        sampling: &'a SamplingParameters,
        stream: bool,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt: prompt.render(),
            stream,
            options: GenerateOptions {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k,
                repeat_penalty: sampling.repeat_penalty,
                num_predict: sampling.max_tokens,
                num_ctx: self.num_ctx,
                stop: &sampling.stop,
            },
        }
    }

    async fn post_generate(
        &self,
        body: &GenerateRequest<'_>,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn connect(&self) -> Result<(), LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.probe.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(LlmError::Http {
                status: response.status().as_u16(),
                body: "tag listing failed".into(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let installed = body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .any(|name| model_matches(name, &self.model))
            })
            .unwrap_or(false);
        if installed {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!(
                "model {} is not installed on {}",
                self.model, self.base_url
            )))
        }
    }

    #[instrument(skip(self, prompt, sampling), fields(model = %self.model))]
    async fn complete(
        &self,
        prompt: &Prompt,
        sampling: &SamplingParameters,
    ) -> Result<String, LlmError> {
        let body = self.request(prompt, sampling, false);
        let response = self.post_generate(&body).await?;
        let line: GenerateLine = response.json().await?;
        if let Some(error) = line.error {
            return Err(LlmError::InvalidResponse(error));
        }
        debug!(chars = line.response.len(), "Completion received");
        Ok(line.response)
    }
}

#[async_trait]
impl StreamingModel for OllamaModel {
    async fn complete_stream(
        &self,
        prompt: &Prompt,
        sampling: &SamplingParameters,
    ) -> Result<FragmentStream, LlmError> {
        let body = self.request(prompt, sampling, true);
        let response = self.post_generate(&body).await?;
        Ok(Box::pin(ndjson_fragments(response.bytes_stream())))
    }
}

/// Parse Ollama's newline-delimited JSON stream into text fragments.
///
/// The stream ends at the first `"done": true` line. A transport error, an
/// `error` field, or end of input before `done` yields one `Err` and ends.
pub fn ndjson_fragments(
    bytes_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<String, LlmError>> + Send {
    let state = (Box::pin(bytes_stream), Vec::<u8>::new(), false);

    unfold(state, |(mut stream, mut buffer, finished)| async move {
        if finished {
            return None;
        }
        loop {
            if let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let parsed = match decode_line(&line) {
                    Ok(line) if line.is_empty() => continue,
                    Ok(line) => parse_line(line),
                    Err(e) => Err(e),
                };
                return Some(match parsed {
                    Ok((text, done)) => (Ok(text), (stream, buffer, done)),
                    Err(e) => (Err(e), (stream, buffer, true)),
                });
            }

            match stream.next().await {
                Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    return Some((Err(LlmError::Stream(e.to_string())), (stream, buffer, true)));
                }
                None => {
                    let rest = std::mem::take(&mut buffer);
                    let parsed = match decode_line(&rest) {
                        Ok(line) if line.is_empty() => {
                            Err(LlmError::Stream("stream ended before completion".into()))
                        }
                        Ok(line) => match parse_line(line) {
                            Ok((text, true)) => Ok(text),
                            Ok((_, false)) => {
                                Err(LlmError::Stream("stream ended before completion".into()))
                            }
                            Err(e) => Err(e),
                        },
                        Err(e) => Err(e),
                    };
                    return Some((parsed, (stream, buffer, true)));
                }
            }
        }
    })
}

/// Lines are decoded only once complete, so a character split across
/// network chunks survives.
fn decode_line(line: &[u8]) -> Result<&str, LlmError> {
    std::str::from_utf8(line)
        .map(str::trim)
        .map_err(|e| LlmError::InvalidResponse(format!("stream line is not UTF-8: {e}")))
}

fn parse_line(line: &str) -> Result<(String, bool), LlmError> {
    let parsed: GenerateLine = serde_json::from_str(line).map_err(|e| {
        warn!(line, "Unparsable line in generation stream");
        LlmError::InvalidResponse(e.to_string())
    })?;
    if let Some(error) = parsed.error {
        return Err(LlmError::Stream(error));
    }
    Ok((parsed.response, parsed.done))
}

/// `llama3` matches an installed `llama3:latest`.
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || (!wanted.contains(':') && installed.strip_suffix(":latest") == Some(wanted))
}

fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn raw(parts: Vec<Vec<u8>>) -> Vec<Result<Bytes, reqwest::Error>> {
        parts.into_iter().map(|p| Ok(Bytes::from(p))).collect()
    }

    fn bytes(parts: &[&str]) -> Vec<Result<Bytes, reqwest::Error>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect()
    }

    async fn parse(parts: &[&str]) -> Vec<Result<String, LlmError>> {
        ndjson_fragments(stream::iter(bytes(parts))).collect().await
    }

    #[tokio::test]
    async fn test_ndjson_lines_split_across_chunks() {
        let items = parse(&[
            "{\"response\":\"Hel\",\"done\":false}\n{\"resp",
            "onse\":\"lo\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ])
        .await;
        let texts: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["Hel", "lo", ""]);
    }

    #[tokio::test]
    async fn test_ndjson_multibyte_char_split_across_chunks() {
        let line = "{\"response\":\"caf\u{e9}\",\"done\":true}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let parts = vec![line[..split].to_vec(), line[split..].to_vec()];

        let items: Vec<_> = ndjson_fragments(stream::iter(raw(parts))).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "caf\u{e9}");
    }

    #[tokio::test]
    async fn test_ndjson_invalid_utf8_is_invalid_response() {
        let items: Vec<_> = ndjson_fragments(stream::iter(raw(vec![vec![0xFF, 0xFE, b'\n']])))
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_ndjson_final_line_without_newline() {
        let items = parse(&["{\"response\":\"a\",\"done\":false}\n{\"response\":\"b\",\"done\":true}"]).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_ndjson_stops_after_done() {
        let items = parse(&[
            "{\"response\":\"a\",\"done\":true}\n{\"response\":\"ignored\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_ndjson_truncated_stream_is_error() {
        let items = parse(&["{\"response\":\"a\",\"done\":false}\n"]).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(LlmError::Stream(_))));
    }

    #[tokio::test]
    async fn test_ndjson_error_field_ends_stream() {
        let items = parse(&[
            "{\"response\":\"a\",\"done\":false}\n{\"error\":\"out of memory\"}\n{\"response\":\"b\"}\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        match &items[1] {
            Err(LlmError::Stream(msg)) => assert_eq!(msg, "out of memory"),
            other => panic!("expected stream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ndjson_garbage_is_invalid_response() {
        let items = parse(&["not json\n"]).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_model_matches() {
        assert!(model_matches("llama3:latest", "llama3"));
        assert!(model_matches("gemma3:1b", "gemma3:1b"));
        assert!(!model_matches("gemma3:4b", "gemma3:1b"));
        assert!(!model_matches("llama3:8b", "llama3"));
    }

    #[test]
    fn test_sampling_from_config() {
        let config = OllamaConfig::default();
        let s = sampling(&config, true);
        assert_eq!(s.temperature, config.temperature);
        assert_eq!(s.top_k, Some(config.top_k));
        assert_eq!(s.repeat_penalty, Some(config.repeat_penalty));
        assert_eq!(s.max_tokens, config.num_predict);
        assert!(s.stream);
        assert!(s.frequency_penalty.is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let model = OllamaModel::new(
            &OllamaConfig {
                base_url: "http://ollama:11434/v1/".into(),
                ..OllamaConfig::default()
            },
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(model.base_url, "http://ollama:11434");

        let s = sampling(&OllamaConfig::default(), false);
        let body = serde_json::to_value(model.request(&Prompt::bare("sys", "hi"), &s, false))
            .unwrap();
        assert_eq!(body["model"], "gemma3:1b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_ctx"], 8192);
        assert!(body["options"].get("stop").is_none());
        assert!(body["prompt"].as_str().unwrap().ends_with("hi"));
    }

    #[tokio::test]
    async fn test_connect_unreachable_server() {
        let model = OllamaModel::new(
            &OllamaConfig {
                base_url: "http://127.0.0.1:9".into(),
                ..OllamaConfig::default()
            },
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(model.connect().await.is_err());
    }
}
