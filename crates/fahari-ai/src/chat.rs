use crate::error::{GenerationError, Result};
use crate::llm_factory::ProviderFactory;
use crate::llm_provider::*;
use fahari_core::AiConfig;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const LEGAL_ASSISTANT_INSTRUCTION: &str = "You are a legal assistant for Fahari Legal Kenya. \
Provide helpful and general legal information. Do not give specific legal advice or form an \
attorney-client relationship. Always advise users to consult with a qualified legal \
professional for their specific situation.";

/// Ordered user/model turns of one conversation
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
    #[serde(skip)]
    model_turn_open: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.model_turn_open = false;
        self.messages.push(Message::user(content));
    }

    /// Append streamed text to the in-progress model turn, opening one if needed
    pub fn append_fragment(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }

        match self.messages.last_mut() {
            Some(last) if self.model_turn_open && last.role == MessageRole::Model => {
                last.content.push_str(fragment);
            }
            _ => {
                self.messages.push(Message::model(fragment));
                self.model_turn_open = true;
            }
        }
    }

    /// Close the in-progress model turn; the next fragment starts a new one
    pub fn finish_turn(&mut self) {
        self.model_turn_open = false;
    }

    /// Undo a failed exchange: any partial model reply and the user message before it
    pub fn rollback_turn(&mut self) {
        if self.model_turn_open {
            self.messages.pop();
            self.model_turn_open = false;
        }
        if matches!(self.messages.last(), Some(m) if m.role == MessageRole::User) {
            self.messages.pop();
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.model_turn_open = false;
    }
}

/// Streaming conversational assistant for general legal information
pub struct LegalAssistant {
    provider: Arc<dyn GenerationProvider>,
    transcript: Transcript,
    system_instruction: String,
    temperature: Option<f32>,
}

impl LegalAssistant {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            provider,
            transcript: Transcript::new(),
            system_instruction: LEGAL_ASSISTANT_INSTRUCTION.to_string(),
            temperature: None,
        }
    }

    /// Build an assistant from the loaded configuration. Fails fast without a credential.
    pub fn from_ai_config(config: &AiConfig) -> Result<Self> {
        let provider = ProviderFactory::create_from_config(config)?;
        Ok(Self::new(provider).with_temperature(config.temperature))
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn reset(&mut self) {
        self.transcript.clear();
    }

    /// Send one user message and stream the reply.
    ///
    /// Blank input is ignored and returns `Ok(None)`. Each fragment is appended
    /// to the transcript and passed to `on_fragment`. On failure the exchange
    /// is removed from the transcript.
    pub async fn send<F>(&mut self, input: &str, mut on_fragment: F) -> Result<Option<String>>
    where
        F: FnMut(&str),
    {
        if input.trim().is_empty() {
            return Ok(None);
        }

        self.transcript.push_user(input);
        let request = GenerationRequest::from_messages(self.transcript.messages())
            .with_system_instruction(self.system_instruction.clone())
            .with_temperature(self.temperature);
        debug!(
            turns = request.contents.len(),
            model = self.provider.model_name(),
            "Sending chat message"
        );

        let mut stream = match self.provider.generate_stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.transcript.rollback_turn();
                return Err(e);
            }
        };

        let mut reply = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    self.transcript.append_fragment(&fragment);
                    reply.push_str(&fragment);
                    on_fragment(&fragment);
                }
                Err(e) => {
                    warn!("Chat stream failed: {}", e);
                    self.transcript.rollback_turn();
                    return Err(e);
                }
            }
        }

        if reply.is_empty() {
            self.transcript.rollback_turn();
            return Err(GenerationError::EmptyResponse);
        }

        self.transcript.finish_turn();
        Ok(Some(reply))
    }
}
