pub mod chat;
pub mod civiclens;
pub mod civiclens_schemas;
pub mod error;
pub mod gemini_provider;
pub mod llm_factory;
pub mod llm_provider;

pub use chat::{LegalAssistant, Transcript, LEGAL_ASSISTANT_INSTRUCTION};
pub use civiclens::{build_prompt, parse_analysis, CivicLensConfig, CivicLensEngine, IssueReport};
pub use civiclens_schemas::*;
pub use error::{ErrorKind, GenerationError, Result};
pub use gemini_provider::{GeminiConfig, GeminiProvider};
pub use llm_factory::ProviderFactory;
pub use llm_provider::*;
