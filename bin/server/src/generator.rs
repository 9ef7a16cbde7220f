//! OpenAI-compatible response generator.
//!
//! Works with OpenAI, OpenRouter, Ollama, and other `/chat/completions`
//! endpoints. Streaming responses arrive as server-sent events and are
//! turned into text fragments as they come in.

use crate::config::GeneratorConfig;
use async_trait::async_trait;
use colloquy_conversation::{
    EchoGenerator, FragmentStream, GeneratorError, Message, ResponseGenerator, Role,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Builds the generator described by `config`.
///
/// Without a base URL the server answers with [`EchoGenerator`].
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build_generator(
    config: &GeneratorConfig,
) -> Result<Arc<dyn ResponseGenerator>, GeneratorError> {
    match &config.base_url {
        Some(base_url) if !base_url.trim().is_empty() => {
            Ok(Arc::new(OpenAiGenerator::new(base_url, config)?))
        }
        _ => {
            tracing::warn!("No GENERATOR__BASE_URL configured, echoing questions back");
            Ok(Arc::new(EchoGenerator))
        }
    }
}

/// Generator backed by an OpenAI-compatible chat completions API.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    temperature: f32,
    stream: bool,
}

impl OpenAiGenerator {
    /// Creates a generator for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GeneratorError::RequestFailed {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            stream: config.stream,
        })
    }

    fn chat_request<'a>(
        &'a self,
        input: &'a str,
        history: &'a [Message],
        stream: bool,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &self.system_prompt,
        });
        messages.extend(history.iter().map(|m| ChatMessage {
            role: match m.role {
                Role::Human => "user",
                Role::Assistant => "assistant",
            },
            content: &m.content,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: input,
        });

        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response, GeneratorError> {
        let mut builder = self.client.post(&self.url).json(request);

        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                endpoint = %self.url,
                status = %status,
                body = %body,
                "Chat completion endpoint returned error"
            );
            return Err(GeneratorError::RequestFailed {
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ResponseGenerator for OpenAiGenerator {
    async fn generate(&self, input: &str, history: &[Message]) -> Result<String, GeneratorError> {
        let request = self.chat_request(input, history, false);
        let response = self.send(&request).await?;

        let completion: ChatCompletion =
            response
                .json()
                .await
                .map_err(|e| GeneratorError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GeneratorError::InvalidResponse {
                reason: "no choices in completion".to_string(),
            })
    }

    async fn generate_stream(
        &self,
        input: &str,
        history: &[Message],
    ) -> Result<FragmentStream, GeneratorError> {
        if !self.stream {
            let response = self.generate(input, history).await?;
            return Ok(stream::once(async move { Ok::<_, GeneratorError>(response) }).boxed());
        }

        let request = self.chat_request(input, history, true);
        let response = self.send(&request).await?;

        let state = SseState {
            inner: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(request_error))
                .boxed(),
            buffer: Vec::new(),
            done: false,
        };

        Ok(stream::unfold(state, next_fragment).boxed())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// What a single SSE line contributes to the response.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    /// Text to forward.
    Fragment(String),
    /// The `[DONE]` marker.
    Done,
    /// Blank lines, comments, other fields and empty deltas.
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, GeneratorError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let payload: ChunkPayload =
        serde_json::from_str(data).map_err(|e| GeneratorError::InvalidResponse {
            reason: format!("malformed stream chunk: {}", e),
        })?;

    let text: String = payload
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    if text.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Fragment(text))
    }
}

struct SseState {
    inner: BoxStream<'static, Result<Vec<u8>, GeneratorError>>,
    buffer: Vec<u8>,
    done: bool,
}

async fn next_fragment(mut state: SseState) -> Option<(Result<String, GeneratorError>, SseState)> {
    loop {
        if state.done {
            return None;
        }

        if let Some(end) = state.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = state.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            match parse_sse_line(line.trim_end_matches(['\r', '\n'])) {
                Ok(SseLine::Fragment(text)) => return Some((Ok(text), state)),
                Ok(SseLine::Done) => {
                    state.done = true;
                    return None;
                }
                Ok(SseLine::Skip) => continue,
                Err(e) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
            }
        }

        match state.inner.next().await {
            Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
            Some(Err(e)) => {
                state.done = true;
                return Some((Err(e), state));
            }
            None if state.buffer.is_empty() => return None,
            // Last line without a trailing newline.
            None => state.buffer.push(b'\n'),
        }
    }
}

fn request_error(e: reqwest::Error) -> GeneratorError {
    if e.is_timeout() {
        GeneratorError::Timeout
    } else {
        GeneratorError::RequestFailed {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;
    use colloquy_conversation::collect_fragments;

    fn config(stream: bool) -> GeneratorConfig {
        GeneratorConfig {
            stream,
            system_prompt: "Be brief.".to_string(),
            ..GeneratorConfig::default()
        }
    }

    /// Serves `router` on an ephemeral port and returns its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn parses_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseLine::Fragment("Hel".to_string())
        );
    }

    #[test]
    fn skips_role_only_delta_and_comments() {
        let role = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role).unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message").unwrap(), SseLine::Skip);
    }

    #[test]
    fn recognizes_done_marker() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
    }

    #[test]
    fn malformed_chunk_is_invalid_response() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(GeneratorError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn request_carries_system_prompt_and_history() {
        let generator = OpenAiGenerator::new("http://localhost/v1/", &config(false)).unwrap();
        let history = vec![Message::assistant("Hi!", 0), Message::human("Who?", 1)];

        let request = serde_json::to_value(generator.chat_request("Why?", &history, true)).unwrap();

        assert_eq!(generator.url, "http://localhost/v1/chat/completions");
        assert_eq!(request["stream"], true);
        let roles: Vec<&str> = request["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["system", "assistant", "user", "user"]);
        assert_eq!(request["messages"][0]["content"], "Be brief.");
        assert_eq!(request["messages"][3]["content"], "Why?");
    }

    #[tokio::test]
    async fn missing_base_url_falls_back_to_echo() {
        let generator = build_generator(&GeneratorConfig::default()).unwrap();
        assert_eq!(
            generator.generate("hello", &[]).await.unwrap(),
            "You said: hello"
        );
    }

    #[tokio::test]
    async fn generates_complete_response() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|| async {
                axum::Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "Forty-two."}}]
                }))
            }),
        ))
        .await;

        let generator = OpenAiGenerator::new(&base, &config(false)).unwrap();
        assert_eq!(generator.generate("q", &[]).await.unwrap(), "Forty-two.");

        let fragments = generator.generate_stream("q", &[]).await.unwrap();
        assert_eq!(collect_fragments(fragments).await.unwrap(), "Forty-two.");
    }

    #[tokio::test]
    async fn streams_fragments_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Forty\"}}]}\r\n\r\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"-two.\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let base = serve(Router::new().route(
            "/chat/completions",
            post(move || async move { ([("content-type", "text/event-stream")], body) }),
        ))
        .await;

        let generator = OpenAiGenerator::new(&base, &config(true)).unwrap();
        let fragments: Vec<_> = generator
            .generate_stream("q", &[])
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            fragments,
            vec![Ok("Forty".to_string()), Ok("-two.".to_string())]
        );
    }

    #[tokio::test]
    async fn error_status_is_request_failed() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
        ))
        .await;

        let generator = OpenAiGenerator::new(&base, &config(false)).unwrap();
        let err = generator.generate("q", &[]).await.unwrap_err();
        assert!(matches!(err, GeneratorError::RequestFailed { .. }));
    }
}
