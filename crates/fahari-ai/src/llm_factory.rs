use crate::error::{GenerationError, Result};
use crate::gemini_provider::{GeminiConfig, GeminiProvider};
use crate::llm_provider::*;
use fahari_core::AiConfig;
use std::sync::Arc;

/// Factory for creating generation providers based on configuration
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a generation provider from configuration
    pub fn create_from_config(config: &AiConfig) -> Result<Arc<dyn GenerationProvider>> {
        let provider_name = config.provider.to_lowercase();

        match provider_name.as_str() {
            "gemini" => Self::create_gemini_provider(config),
            _ => Err(GenerationError::Configuration(format!(
                "Unsupported AI provider: {}. Available providers: {}",
                provider_name,
                Self::supported_providers().join(", ")
            ))),
        }
    }

    fn create_gemini_provider(config: &AiConfig) -> Result<Arc<dyn GenerationProvider>> {
        let gemini_config = GeminiConfig::from_ai_config(config)?;
        Ok(Arc::new(GeminiProvider::new(gemini_config)?))
    }

    /// Get a list of supported providers
    pub fn supported_providers() -> Vec<&'static str> {
        vec!["gemini"]
    }
}
