use crate::error::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Incrementally arriving text fragments from a streamed generation
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Capabilities of a generation provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCharacteristics {
    /// Whether the provider enforces a response schema server-side
    pub supports_response_schema: bool,
    /// Whether the provider can ground answers with web search
    pub supports_search_grounding: bool,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Model,
            content: content.into(),
        }
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Model => write!(f, "model"),
        }
    }
}

/// Provider-neutral description of one generation call
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationRequest {
    /// System instruction applied to the whole conversation
    pub system_instruction: Option<String>,
    /// Ordered conversation contents; the last entry is the turn to answer
    pub contents: Vec<Message>,
    /// MIME type the response must use (e.g., "application/json")
    pub response_mime_type: Option<String>,
    /// JSON schema the response must conform to
    pub response_schema: Option<Value>,
    /// Enable web-search grounding
    pub google_search: bool,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    /// Single user turn containing `prompt`
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            contents: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    pub fn from_messages(messages: &[Message]) -> Self {
        Self {
            contents: messages.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Constrain the response to JSON matching `schema`
    pub fn with_json_schema(mut self, schema: Value) -> Self {
        self.response_mime_type = Some("application/json".to_string());
        self.response_schema = Some(schema);
        self
    }

    pub fn with_google_search(mut self, enabled: bool) -> Self {
        self.google_search = enabled;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Token accounting reported by the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

/// Response from a non-streaming generation call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated text; empty when the service produced none
    pub text: String,
    /// Finish reason (e.g., "STOP", "MAX_TOKENS", "SAFETY")
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
    /// Model version that served the request
    pub model: String,
}

/// Main trait for generation providers
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Run a single non-streaming generation
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;

    /// Stream the generation as text fragments.
    ///
    /// Providers without native streaming yield the full response as one fragment.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let response = self.generate(request).await?;
        Ok(stream::iter(vec![Ok(response.text)]).boxed())
    }

    /// Get the name of this provider
    fn provider_name(&self) -> &str;

    /// Get the model identifier
    fn model_name(&self) -> &str;

    /// Get provider capabilities
    fn characteristics(&self) -> ProviderCharacteristics;
}
