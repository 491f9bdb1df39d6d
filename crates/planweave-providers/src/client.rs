//! Streaming chat-completion client
//!
//! One HTTP+SSE implementation covers every OpenAI-compatible provider in
//! the catalog; which endpoint a call hits is decided entirely by the
//! `AvailableModel` passed in (base URL + API-key environment variable).

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::catalog::AvailableModel;
use crate::chat::{ChatRequest, Completion, StreamChunk};
use crate::error::{ProviderError, ProviderResult};

/// A stream of chat-completion chunks
pub type ChunkStream = BoxStream<'static, ProviderResult<StreamChunk>>;

/// Capability the pipeline needs from a model backend
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Open a streaming chat completion
    async fn stream_chat(
        &self,
        model: &AvailableModel,
        request: ChatRequest,
    ) -> ProviderResult<ChunkStream>;

    /// Run a non-streaming chat completion
    async fn complete(
        &self,
        model: &AvailableModel,
        request: ChatRequest,
    ) -> ProviderResult<Completion>;
}

/// HTTP client for OpenAI-compatible providers
///
/// Shared across the process; `reqwest::Client` carries the connection pool.
pub struct HttpChatClient {
    client: Client,
    request_timeout: Duration,
    max_retries: usize,
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MAX_RETRIES: usize = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

impl HttpChatClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a client with a custom per-request deadline
    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            request_timeout,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn api_key(model: &AvailableModel) -> ProviderResult<String> {
        std::env::var(&model.api_key_env_var).map_err(|_| {
            ProviderError::Config(format!("{} is not set", model.api_key_env_var))
        })
    }

    fn request_body(model: &AvailableModel, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model.model_name,
            "messages": request.messages,
            "temperature": request.sampling.temperature,
            "top_p": request.sampling.top_p,
            "stream": request.stream,
        });
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> =
                request.tools.iter().map(|t| t.to_wire()).collect();
            body["tools"] = serde_json::json!(tools);
        }
        if let Some(name) = &request.tool_choice {
            body["tool_choice"] = serde_json::json!({
                "type": "function",
                "function": {"name": name},
            });
        }
        body
    }

    /// Send the request, retrying transient network failures
    async fn send(
        &self,
        model: &AvailableModel,
        request: &ChatRequest,
    ) -> ProviderResult<reqwest::Response> {
        let api_key = Self::api_key(model)?;
        let body = Self::request_body(model, request);
        let url = format!("{}/chat/completions", model.base_url);

        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(&url)
                .bearer_auth(&api_key)
                .header("Content-Type", "application/json")
                .timeout(self.request_timeout)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let text = response.text().await.unwrap_or_default();
                    error!(model = %model.model_name, %status, "provider returned error");
                    return Err(Self::map_status(status.as_u16(), &text));
                }
                Err(err) => {
                    let mapped = ProviderError::from(err);
                    let transient = matches!(mapped, ProviderError::Network(_));
                    if !transient || attempt > self.max_retries {
                        return Err(mapped);
                    }
                    warn!(
                        model = %model.model_name,
                        attempt,
                        "transient network error, retrying: {mapped}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    fn map_status(status: u16, body: &str) -> ProviderError {
        match status {
            401 | 403 => ProviderError::Auth,
            429 => ProviderError::RateLimited(60),
            400 if body.contains("reduce the length")
                || body.contains("maximum context length") =>
            {
                ProviderError::ContextTooLarge
            }
            _ => ProviderError::Provider(format!("status {status}: {body}")),
        }
    }
}

impl Default for HttpChatClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one SSE line into a chunk
///
/// Returns `None` for non-data lines and the `[DONE]` marker.
pub fn parse_sse_line(line: &str) -> Option<ProviderResult<StreamChunk>> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.trim() == "[DONE]" {
        return None;
    }
    Some(
        serde_json::from_str::<StreamChunk>(data)
            .map_err(|e| ProviderError::Protocol(format!("bad stream chunk: {e}"))),
    )
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn stream_chat(
        &self,
        model: &AvailableModel,
        request: ChatRequest,
    ) -> ProviderResult<ChunkStream> {
        debug!(model = %model.model_name, "opening chat completion stream");
        let response = self.send(model, &request.streaming()).await?;

        let (tx, rx) = mpsc::channel::<ProviderResult<StreamChunk>>(32);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(err) => {
                        let _ = tx.send(Err(ProviderError::from(err))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&piece));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end().to_string();
                    buffer.drain(..=line_end);

                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(parsed) = parse_sse_line(&line) {
                        if tx.send(parsed).await.is_err() {
                            // receiver dropped: stream cancelled
                            return;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn complete(
        &self,
        model: &AvailableModel,
        request: ChatRequest,
    ) -> ProviderResult<Completion> {
        debug!(model = %model.model_name, "running chat completion");
        let response = self.send(model, &request).await?;
        let completion = response.json::<Completion>().await?;
        if completion.choices.is_empty() {
            return Err(ProviderError::Protocol(
                "completion returned no choices".to_string(),
            ));
        }
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::chat::{ChatMessage, SamplingConfig, ToolDefinition};

    fn request() -> ChatRequest {
        ChatRequest::new(
            vec![ChatMessage::user("hello")],
            SamplingConfig::new(0.3, 0.3),
        )
    }

    #[test]
    fn parse_sse_data_line() {
        let parsed = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"x"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.content(), Some("x"));
    }

    #[test]
    fn parse_sse_skips_done_and_comments() {
        assert!(parse_sse_line("data: [DONE]").is_none());
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("event: ping").is_none());
    }

    #[test]
    fn parse_sse_rejects_malformed_json() {
        let parsed = parse_sse_line("data: {not json").unwrap();
        assert!(matches!(parsed, Err(ProviderError::Protocol(_))));
    }

    #[test]
    fn request_body_includes_tools_when_present() {
        let catalog = ModelCatalog::builtin();
        let model = catalog.get("gpt-4o-mini").unwrap();
        let request = request().with_tool(ToolDefinition {
            name: "describe_plan".to_string(),
            description: "d".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        });
        let body = HttpChatClient::request_body(model, &request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["tools"][0]["function"]["name"], "describe_plan");
        assert_eq!(body["tool_choice"]["function"]["name"], "describe_plan");
    }

    #[test]
    fn request_body_omits_tools_when_absent() {
        let catalog = ModelCatalog::builtin();
        let model = catalog.get("gpt-4o-mini").unwrap();
        let body = HttpChatClient::request_body(model, &request());
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            HttpChatClient::map_status(401, ""),
            ProviderError::Auth
        ));
        assert!(matches!(
            HttpChatClient::map_status(429, ""),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            HttpChatClient::map_status(400, "please reduce the length of the messages"),
            ProviderError::ContextTooLarge
        ));
        assert!(matches!(
            HttpChatClient::map_status(500, "boom"),
            ProviderError::Provider(_)
        ));
    }
}
