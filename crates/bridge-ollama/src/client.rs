use std::{pin::Pin, time::Duration};

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::{ChatMessage, OllamaError};

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

#[derive(Debug, Clone)]
/// Connection settings for an [`OllamaClient`].
pub struct OllamaConfig {
    pub host: String,
    pub default_model: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone)]
/// Lightweight async client for the Ollama REST API.
///
/// One shared `reqwest::Client` backs all calls; the configured timeout
/// bounds every request including streaming reads.
pub struct OllamaClient {
    http: reqwest::Client,
    host: String,
    default_model: String,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, OllamaError> {
        let timeout_secs = config.request_timeout_secs.max(1);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            http,
            host: config.host.trim_end_matches('/').to_string(),
            default_model: config.default_model,
            timeout_secs,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Opens a streaming chat completion against `/api/chat`.
    ///
    /// The returned [`ChatStream`] yields incremental text tokens; it is
    /// finite and not restartable. A non-success status or unreachable
    /// server fails with a typed error before any token is produced.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> Result<ChatStream, OllamaError> {
        let url = format!("{}/api/chat", self.host);
        let model = model.unwrap_or(&self.default_model);
        tracing::debug!(%url, %model, turns = messages.len(), "ollama chat request");

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "model": model,
                "messages": messages,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|error| classify_transport_error(error, &self.host, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::HttpStatus {
                status: status.as_u16(),
                body: preview_for_error(&body),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));

        Ok(ChatStream {
            stream: Box::pin(stream),
            buffer: String::new(),
            done: false,
            host: self.host.clone(),
            timeout_secs: self.timeout_secs,
        })
    }

    /// Non-streaming convenience wrapper: concatenates the full stream.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> Result<String, OllamaError> {
        let mut stream = self.chat_stream(messages, model).await?;
        let mut text = String::new();
        while let Some(token) = stream.next_token().await? {
            text.push_str(&token);
        }
        Ok(text)
    }

    /// Lists model names available on the server, in server order.
    pub async fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|error| classify_transport_error(error, &self.host, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::HttpStatus {
                status: status.as_u16(),
                body: preview_for_error(&body),
            });
        }

        let tags: ModelTagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|model| model.name).collect())
    }

    /// Health probe: true when the server answers `GET /` below 500.
    /// Swallows all errors to `false`; never fails.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/", self.host);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().as_u16() < 500,
            Err(error) => {
                tracing::warn!(%error, host = %self.host, "ollama health check failed");
                false
            }
        }
    }
}

/// Incremental token stream over an `/api/chat` NDJSON response body.
pub struct ChatStream {
    stream: ByteStream,
    buffer: String,
    done: bool,
    host: String,
    timeout_secs: u64,
}

impl ChatStream {
    /// Pulls the next text token, or `None` once the stream has ended
    /// (explicit `"done": true` marker or connection close).
    ///
    /// Malformed individual lines are logged and skipped, never fatal;
    /// transport failures mid-stream abort with a typed error.
    pub async fn next_token(&mut self) -> Result<Option<String>, OllamaError> {
        loop {
            while let Some(pos) = self.buffer.find('\n') {
                let line = self.buffer[..pos].trim().to_string();
                self.buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                let token = self.apply_line(&line);
                if token.is_some() {
                    return Ok(token);
                }
                if self.done {
                    return Ok(None);
                }
            }

            if self.done {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    let fragment = std::str::from_utf8(&chunk).map_err(|error| {
                        OllamaError::InvalidResponse(format!(
                            "invalid UTF-8 in streaming response: {error}"
                        ))
                    })?;
                    self.buffer.push_str(fragment);
                }
                Some(Err(error)) => {
                    return Err(classify_transport_error(error, &self.host, self.timeout_secs));
                }
                None => {
                    self.done = true;
                    let trailing = self.buffer.trim().to_string();
                    self.buffer.clear();
                    if !trailing.is_empty() {
                        if let Some(token) = self.apply_line(&trailing) {
                            return Ok(Some(token));
                        }
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn apply_line(&mut self, line: &str) -> Option<String> {
        let chunk: StreamChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(error) => {
                tracing::warn!(%error, "skipping malformed ollama stream line");
                return None;
            }
        };

        if chunk.done {
            self.done = true;
        }

        chunk
            .message
            .and_then(|message| message.content)
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelTagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

fn classify_transport_error(error: reqwest::Error, host: &str, timeout_secs: u64) -> OllamaError {
    if error.is_timeout() {
        return OllamaError::Timeout {
            seconds: timeout_secs,
        };
    }
    if error.is_connect() {
        return OllamaError::Unreachable {
            host: host.to_string(),
        };
    }
    OllamaError::Http(error)
}

fn preview_for_error(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_PREVIEW_CHARS {
        return body.to_string();
    }
    body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect()
}
