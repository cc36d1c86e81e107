use crate::backend::CompletionBackend;
use crate::openai::OpenAIClient;
use anyhow::{anyhow, Result};
use shared::settings::{AgentSettings, ModelConfig, ProviderAuth};
use std::sync::Arc;

/// Resolves model selectors to their configuration.
pub struct ModelRegistry {
    models: Vec<ModelConfig>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelConfig>) -> Result<Self> {
        if models.is_empty() {
            return Err(anyhow!("No models configured"));
        }
        Ok(Self { models })
    }

    pub fn from_settings(settings: &AgentSettings) -> Result<Self> {
        Self::new(settings.models.clone())
    }

    /// Model matching `selector` by id or display name.
    ///
    /// Unknown selectors resolve to the first configured model.
    pub fn resolve(&self, selector: &str) -> &ModelConfig {
        match self.models.iter().find(|m| m.matches(selector)) {
            Some(model) => model,
            None => {
                tracing::warn!(selector, fallback = %self.models[0].model, "unknown model selector");
                &self.models[0]
            }
        }
    }

    pub fn models(&self) -> &[ModelConfig] {
        &self.models
    }
}

/// Backend for the chat, classification and rewrite dispatchers.
pub fn connect_chat_backend(settings: &AgentSettings) -> Result<Arc<dyn CompletionBackend>> {
    let client = OpenAIClient::from_auth(
        &settings.provider.auth,
        settings.provider.base_url.as_deref(),
        settings.request_timeout(),
    )?;
    Ok(Arc::new(client))
}

/// OCR key if set, else the chat provider's key. The env var comes last.
pub fn ocr_auth(settings: &AgentSettings) -> ProviderAuth {
    let has_key = |auth: &ProviderAuth| {
        auth.api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    };
    if has_key(&settings.ocr.auth) {
        settings.ocr.auth.clone()
    } else {
        settings.provider.auth.clone()
    }
}

/// Backend for OCR question generation, which has its own endpoint and key.
pub fn connect_ocr_backend(settings: &AgentSettings) -> Result<Arc<dyn CompletionBackend>> {
    let client = OpenAIClient::from_auth(
        &ocr_auth(settings),
        settings.ocr.base_url.as_deref(),
        settings.request_timeout(),
    )?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        let mut named = ModelConfig::new("qwen-max", 8000, false);
        named.name = "Qwen".into();
        ModelRegistry::new(vec![ModelConfig::new("gpt-4o-mini", 128000, true), named]).unwrap()
    }

    #[test]
    fn test_resolve_by_model_and_name() {
        let reg = registry();
        assert_eq!(reg.resolve("qwen-max").model, "qwen-max");
        assert_eq!(reg.resolve("Qwen").model, "qwen-max");
    }

    #[test]
    fn test_unknown_selector_falls_back_to_first() {
        assert_eq!(registry().resolve("nope").model, "gpt-4o-mini");
    }

    #[test]
    fn test_ocr_auth_prefers_its_own_key() {
        let mut settings = AgentSettings::default();
        settings.provider.auth = ProviderAuth::with_key("sk-chat");
        assert_eq!(ocr_auth(&settings).api_key.as_deref(), Some("sk-chat"));

        settings.ocr.auth = ProviderAuth::with_key("  ");
        assert_eq!(ocr_auth(&settings).api_key.as_deref(), Some("sk-chat"));

        settings.ocr.auth = ProviderAuth::with_key("sk-ocr");
        assert_eq!(ocr_auth(&settings).api_key.as_deref(), Some("sk-ocr"));
    }

    #[test]
    fn test_chat_only_key_connects_both_backends() {
        let mut settings = AgentSettings::default();
        settings.provider.auth = ProviderAuth::with_key("sk-chat-only");
        assert!(connect_chat_backend(&settings).is_ok());
        assert!(connect_ocr_backend(&settings).is_ok());
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(ModelRegistry::new(vec![]).is_err());
    }
}
