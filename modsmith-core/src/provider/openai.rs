//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI, vLLM, Ollama, llama.cpp server and other
//! OpenAI-compatible APIs.

use super::sse::{SseDecoder, SseEvent};
use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = build_client(&config, 120)?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or("https://api.openai.com/v1")
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAIRequest {
        OpenAIRequest {
            model: request.model.clone().unwrap_or_else(|| self.default_model().to_string()),
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stream: Some(stream),
            stop: request.stop.clone(),
        }
    }

    async fn send(&self, body: &OpenAIRequest) -> std::result::Result<reqwest::Response, ProviderError> {
        let mut req = self.client
            .post(format!("{}/chat/completions", self.base_url()))
            .json(body);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, text, retry_after));
        }

        Ok(response)
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("gpt-4o")
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        let body = self.build_request(&request, false);
        let response = self.send(&body).await?;

        let api_response: OpenAIResponse = response.json().await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        api_response.into_completion()
    }

    async fn stream(&self, request: CompletionRequest) -> std::result::Result<StreamReceiver, ProviderError> {
        let body = self.build_request(&request, true);
        let response = self.send(&body).await?;

        let stream = async_stream::stream! {
            use futures_util::StreamExt;

            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield StreamChunk::Error(e.to_string());
                        return;
                    }
                };

                for event in decoder.push(&bytes) {
                    for chunk in stream_chunks(&event) {
                        let finished = chunk.is_final();
                        yield chunk;
                        if finished {
                            return;
                        }
                    }
                }
            }
        };

        Ok(StreamReceiver::new(stream))
    }
}

/// Chunks carried by one chat-completions stream event
fn stream_chunks(event: &SseEvent) -> Vec<StreamChunk> {
    if event.data == "[DONE]" {
        return vec![StreamChunk::Done { finish_reason: FinishReason::Stop, usage: None }];
    }

    let Ok(chunk) = serde_json::from_str::<OpenAIStreamChunk>(&event.data) else {
        return Vec::new();
    };
    let Some(choice) = chunk.choices.first() else {
        return Vec::new();
    };

    let mut chunks = Vec::new();
    if let Some(content) = &choice.delta.content {
        if !content.is_empty() {
            chunks.push(StreamChunk::Text(content.clone()));
        }
    }
    if let Some(reason) = &choice.finish_reason {
        chunks.push(StreamChunk::Done {
            finish_reason: FinishReason::parse(reason),
            usage: chunk.usage.as_ref().map(OpenAIUsage::to_usage),
        });
    }
    chunks
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl From<&ChatMessage> for OpenAIMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

impl OpenAIResponse {
    fn into_completion(self) -> std::result::Result<CompletionResponse, ProviderError> {
        let choice = self.choices.into_iter().next()
            .ok_or_else(|| ProviderError::Other("No choices in response".into()))?;

        Ok(CompletionResponse {
            id: self.id,
            model: self.model,
            content: choice.message.content,
            finish_reason: choice.finish_reason.as_deref()
                .map(FinishReason::parse)
                .unwrap_or(FinishReason::Unknown),
            usage: self.usage.as_ref().map(OpenAIUsage::to_usage).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl OpenAIUsage {
    fn to_usage(&self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let provider = OpenAIProvider::new(ProviderConfig::local(DEFAULT_LOCAL_URL, "codellama:7b")).unwrap();
        let request = CompletionRequest::new(vec![ChatMessage::user("create an emerald block")])
            .with_temperature(0.7);

        let body = serde_json::to_value(provider.build_request(&request, false)).unwrap();
        assert_eq!(body["model"], "codellama:7b");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], false);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let raw = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "codellama:7b",
            "choices": [{
                "message": { "role": "assistant", "content": "public class A {}" },
                "finish_reason": "length"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17 }
        });
        let parsed: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let completion = parsed.into_completion().unwrap();

        assert_eq!(completion.content.as_deref(), Some("public class A {}"));
        assert_eq!(completion.finish_reason, FinishReason::Length);
        assert_eq!(completion.usage.total_tokens, 17);
    }

    fn data(payload: &str) -> SseEvent {
        SseEvent { event: None, data: payload.to_string() }
    }

    #[test]
    fn test_stream_events_to_chunks() {
        let text = stream_chunks(&data(r#"{"choices":[{"delta":{"content":"public class "},"finish_reason":null}]}"#));
        assert!(matches!(text.as_slice(), [StreamChunk::Text(t)] if t == "public class "));

        // Role-only opening delta and keepalive noise carry nothing
        assert!(stream_chunks(&data(r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#)).is_empty());
        assert!(stream_chunks(&data("not json")).is_empty());
        assert!(stream_chunks(&data(r#"{"choices":[]}"#)).is_empty());

        let last = stream_chunks(&data(
            r#"{"choices":[{"delta":{"content":"}"},"finish_reason":"length"}],"usage":{"prompt_tokens":9,"completion_tokens":3,"total_tokens":12}}"#,
        ));
        assert_eq!(last.len(), 2);
        assert!(matches!(&last[0], StreamChunk::Text(t) if t == "}"));
        match &last[1] {
            StreamChunk::Done { finish_reason, usage } => {
                assert_eq!(*finish_reason, FinishReason::Length);
                assert_eq!(usage.as_ref().map(|u| u.total_tokens), Some(12));
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_done_marker() {
        let chunks = stream_chunks(&data("[DONE]"));
        assert!(matches!(
            chunks.as_slice(),
            [StreamChunk::Done { finish_reason: FinishReason::Stop, usage: None }]
        ));
        assert!(chunks[0].is_final());
    }

    #[test]
    fn test_empty_choices_is_an_error() {
        let parsed: OpenAIResponse =
            serde_json::from_value(serde_json::json!({ "choices": [] })).unwrap();
        assert!(parsed.into_completion().is_err());
    }
}
