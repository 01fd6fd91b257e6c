use crate::error::{GenerationError, Result};
use crate::llm_provider::*;
use async_trait::async_trait;
use fahari_core::{AiConfig, DEFAULT_BASE_URL};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Configuration for the Gemini provider
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key for the Generative Language API
    pub api_key: SecretString,
    /// Model to use (e.g., "gemini-3-flash-preview")
    pub model: String,
    /// REST base URL, without a trailing slash
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
        }
    }

    pub fn from_ai_config(config: &AiConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            GenerationError::Configuration(
                "Gemini API key not found. Set 'api_key' under [ai] in the config file \
                 or the GEMINI_API_KEY environment variable"
                    .to_string(),
            )
        })?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
        })
    }
}

/// Google Gemini generation provider
pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider. Fails immediately without a credential.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(GenerationError::Configuration(
                "API key is required for the Gemini provider. Set GEMINI_API_KEY.".to_string(),
            ));
        }
        if config.model.trim().is_empty() {
            return Err(GenerationError::Configuration(
                "Model identifier is required for the Gemini provider".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                GenerationError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url, self.config.model, method
        )
    }

    async fn post(&self, url: &str, body: &GeminiRequest) -> Result<Response> {
        debug!(
            model = %self.config.model,
            contents = body.contents.len(),
            schema = body
                .generation_config
                .as_ref()
                .is_some_and(|c| c.response_json_schema.is_some()),
            search = !body.tools.is_empty(),
            "Sending Gemini request"
        );

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, self.config.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(GenerationError::Service {
                status: status.as_u16(),
                message: service_error_message(&error_text),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let start = Instant::now();
        let body = GeminiRequest::from_generation_request(request);
        let response = self.post(&self.endpoint("generateContent"), &body).await?;

        let payload = response.text().await?;
        let decoded: GeminiResponse = serde_json::from_str(&payload).map_err(|e| {
            GenerationError::Transport(format!("Failed to decode Gemini response: {}", e))
        })?;

        if let Some(err) = decoded.error {
            return Err(err.into_generation_error());
        }

        let result = decoded.into_generation_response(&self.config.model);
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            finish_reason = ?result.finish_reason,
            total_tokens = ?result.usage.total_tokens,
            "Gemini response received"
        );
        Ok(result)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let body = GeminiRequest::from_generation_request(request);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, &body).await?;

        let state = SseStreamState::new(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(GenerationError::from))
                .boxed(),
        );

        Ok(stream::unfold(state, next_fragment).boxed())
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            supports_response_schema: true,
            supports_search_grounding: true,
        }
    }
}

struct SseStreamState {
    body: BoxStream<'static, Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    done: bool,
}

impl SseStreamState {
    fn new(body: BoxStream<'static, Result<Vec<u8>>>) -> Self {
        Self {
            body,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

async fn next_fragment(mut state: SseStreamState) -> Option<(Result<String>, SseStreamState)> {
    loop {
        if let Some(item) = state.pending.pop_front() {
            return Some((item, state));
        }
        if state.done {
            return None;
        }

        match state.body.next().await {
            Some(Ok(chunk)) => {
                for payload in state.decoder.push(&chunk) {
                    state.pending.extend(decode_stream_payload(&payload));
                }
            }
            Some(Err(e)) => {
                state.done = true;
                state.pending.push_back(Err(e));
            }
            None => {
                state.done = true;
                if let Some(payload) = state.decoder.finish() {
                    state.pending.extend(decode_stream_payload(&payload));
                }
            }
        }
    }
}

/// Decode one SSE `data:` payload into a fragment. Payloads without text yield nothing.
fn decode_stream_payload(payload: &str) -> Option<Result<String>> {
    let decoded: GeminiResponse = match serde_json::from_str(payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Undecodable Gemini stream payload: {}", e);
            return Some(Err(GenerationError::malformed(e.to_string(), payload)));
        }
    };

    if let Some(err) = decoded.error {
        return Some(Err(err.into_generation_error()));
    }

    let text = decoded.text();
    if text.is_empty() {
        None
    } else {
        Some(Ok(text))
    }
}

/// Incremental server-sent-events splitter.
///
/// Bytes are buffered until a blank line closes an event; the `data:` lines of
/// each event are joined with newlines.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(payload) = Self::event_data(&event) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub(crate) fn finish(&mut self) -> Option<String> {
        let event = std::mem::take(&mut self.buffer);
        Self::event_data(&event)
    }

    fn event_data(event: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(event);
        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect();

        if data.is_empty() {
            None
        } else {
            Some(data.join("\n"))
        }
    }
}

/// Pull the human-readable message out of a Google error envelope
fn service_error_message(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "Unknown error".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

// Gemini API request/response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
}

impl GeminiRequest {
    fn from_generation_request(request: &GenerationRequest) -> Self {
        let contents = request
            .contents
            .iter()
            .map(|m| GeminiContent {
                role: Some(m.role.to_string()),
                parts: vec![GeminiPart::text(&m.content)],
            })
            .collect();

        let system_instruction = request
            .system_instruction
            .as_ref()
            .map(|instruction| GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(instruction)],
            });

        let generation_config = if request.response_mime_type.is_some()
            || request.response_schema.is_some()
            || request.temperature.is_some()
        {
            Some(GeminiGenerationConfig {
                response_mime_type: request.response_mime_type.clone(),
                response_json_schema: request.response_schema.clone(),
                temperature: request.temperature,
            })
        } else {
            None
        };

        let tools = if request.google_search {
            vec![GeminiTool {
                google_search: GoogleSearch {},
            }]
        } else {
            Vec::new()
        };

        Self {
            contents,
            system_instruction,
            generation_config,
            tools,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    /// Set on thought-summary parts, which are not part of the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl GeminiPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            thought: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    error: Option<GoogleError>,
}

impl GeminiResponse {
    /// Concatenated answer text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought.unwrap_or(false))
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn into_generation_response(self, configured_model: &str) -> GenerationResponse {
        if self.candidates.is_empty() {
            if let Some(reason) = self
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.as_deref())
            {
                warn!("Gemini blocked the prompt: {}", reason);
            }
        }

        let text = self.text();
        let usage = self
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        GenerationResponse {
            text,
            finish_reason: self
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.finish_reason),
            usage,
            model: self
                .model_version
                .unwrap_or_else(|| configured_model.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<usize>,
    #[serde(default)]
    candidates_token_count: Option<usize>,
    #[serde(default)]
    total_token_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl GoogleError {
    fn into_generation_error(self) -> GenerationError {
        GenerationError::Service {
            status: self.code,
            message: self.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use fahari_core::DEFAULT_MODEL;
    use serde_json::json;

    fn request_json(request: &GenerationRequest) -> Value {
        serde_json::to_value(GeminiRequest::from_generation_request(request)).unwrap()
    }

    #[test]
    fn test_provider_creation_requires_api_key() {
        let config = GeminiConfig::new(SecretString::from(""), DEFAULT_MODEL);
        let err = GeminiProvider::new(config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let config = GeminiConfig::new(SecretString::from("   "), DEFAULT_MODEL);
        assert!(GeminiProvider::new(config).is_err());
    }

    #[test]
    fn test_ai_config_without_key_is_configuration_error() {
        let err = GeminiConfig::from_ai_config(&AiConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_endpoint_format() {
        let mut config = GeminiConfig::new(SecretString::from("key"), "gemini-2.5-flash");
        config.base_url = "http://localhost:9999/v1beta".to_string();
        let provider = GeminiProvider::new(config).unwrap();
        assert_eq!(
            provider.endpoint("generateContent"),
            "http://localhost:9999/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_structured_request_body() {
        let request = GenerationRequest::from_prompt("Analyze this")
            .with_json_schema(json!({"type": "object"}))
            .with_google_search(true);
        let body = request_json(&request);

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Analyze this");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(
            body["generationConfig"]["responseJsonSchema"],
            json!({"type": "object"})
        );
        assert_eq!(body["tools"], json!([{"googleSearch": {}}]));
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_chat_request_body() {
        let request = GenerationRequest::from_messages(&[
            Message::user("What is a tenancy agreement?"),
            Message::model("A tenancy agreement is..."),
            Message::user("Can my landlord evict me?"),
        ])
        .with_system_instruction("You are a legal assistant.");
        let body = request_json(&request);

        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "You are a legal assistant."
        );
        assert!(body["systemInstruction"].get("role").is_none());
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_response_text_skips_thoughts() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "{\"a\":"},
                        {"text": "1}"}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15},
            "modelVersion": "gemini-3-flash-preview-001"
        }))
        .unwrap();

        let result = response.into_generation_response("gemini-3-flash-preview");
        assert_eq!(result.text, "{\"a\":1}");
        assert_eq!(result.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(result.usage.total_tokens, Some(15));
        assert_eq!(result.model, "gemini-3-flash-preview-001");
    }

    #[test]
    fn test_blocked_prompt_yields_empty_text() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();

        let result = response.into_generation_response("m");
        assert!(result.text.is_empty());
        assert_eq!(result.model, "m");
    }

    #[test]
    fn test_service_error_message_extraction() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND"}}"#;
        assert_eq!(service_error_message(body), "Requested entity was not found.");
        assert_eq!(service_error_message("bad gateway"), "bad gateway");
        assert_eq!(service_error_message(""), "Unknown error");
    }

    #[test]
    fn test_sse_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"candidates\":").is_empty());
        let payloads = decoder.push(b"[]}\r\n\r\ndata: {\"x\":1}\n\n");
        assert_eq!(payloads, vec!["{\"candidates\":[]}", "{\"x\":1}"]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\n\ndata: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_stream_payload_decoding() {
        let chunk = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Habari"}]}}]}"#;
        assert_eq!(decode_stream_payload(chunk).unwrap().unwrap(), "Habari");

        let finish_only = r#"{"candidates":[{"finishReason":"STOP"}]}"#;
        assert!(decode_stream_payload(finish_only).is_none());

        let garbage = decode_stream_payload("not json").unwrap().unwrap_err();
        assert_eq!(garbage.kind(), ErrorKind::MalformedOutput);

        let failed = r#"{"error":{"code":429,"message":"Resource exhausted"}}"#;
        let err = decode_stream_payload(failed).unwrap().unwrap_err();
        assert!(matches!(err, GenerationError::Service { status: 429, .. }));
    }

    fn frame(text: &str) -> Vec<u8> {
        let payload = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        });
        format!("data: {}\n\n", payload).into_bytes()
    }

    async fn drain(chunks: Vec<Result<Vec<u8>>>) -> Vec<Result<String>> {
        let state = SseStreamState::new(stream::iter(chunks).boxed());
        stream::unfold(state, next_fragment).collect().await
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_across_chunk_boundaries() {
        let first = frame("Under Kenyan law ");
        let (head, tail) = first.split_at(10);
        let items = drain(vec![
            Ok(head.to_vec()),
            Ok(tail.to_vec()),
            Ok(frame("notice is required.")),
        ])
        .await;

        let texts: Vec<String> = items.into_iter().map(|item| item.unwrap()).collect();
        assert_eq!(texts, vec!["Under Kenyan law ", "notice is required."]);
    }

    #[tokio::test]
    async fn test_stream_ends_after_transport_error() {
        let items = drain(vec![
            Ok(frame("Habari ")),
            Err(GenerationError::Transport("connection reset".to_string())),
            Ok(frame("never delivered")),
        ])
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "Habari ");
        assert_eq!(
            items[1].as_ref().unwrap_err().kind(),
            ErrorKind::Transport
        );
    }

    #[tokio::test]
    async fn test_stream_flushes_unterminated_trailing_event() {
        let mut trailing = frame("tail");
        trailing.truncate(trailing.len() - 2);
        let items = drain(vec![Ok(frame("head ")), Ok(trailing)]).await;

        let texts: Vec<String> = items.into_iter().map(|item| item.unwrap()).collect();
        assert_eq!(texts, vec!["head ", "tail"]);
    }

    #[tokio::test]
    async fn test_stream_surfaces_bad_payload_between_fragments() {
        let items = drain(vec![
            Ok(frame("one")),
            Ok(b"data: not json\n\n".to_vec()),
            Ok(frame("two")),
        ])
        .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "one");
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
        assert_eq!(err.raw_output(), Some("not json"));
        assert_eq!(items[2].as_ref().unwrap(), "two");
    }
}
