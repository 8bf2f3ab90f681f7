// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! The environment is read exactly once, in [`EngineConfig::from_env`]. The
//! resulting structs are handed to provider constructors and node builders.

use super::error::FlowError;
use std::env;
use std::time::Duration;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_IMAGE_MODEL_DOMAINS: &str = "image,imagev3";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Settings for an OpenAI-compatible chat endpoint
#[derive(Debug, Clone)]
pub struct ChatProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Settings for the knowledge recall service
#[derive(Debug, Clone, Default)]
pub struct KnowledgeClientConfig {
    pub recall_url: String,
    pub timeout: Duration,
}

/// Process-wide configuration threaded into providers and node builders
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chat: Option<ChatProviderConfig>,
    pub knowledge: KnowledgeClientConfig,
    /// Model domains that take an image reference instead of chat history
    pub image_model_domains: Vec<String>,
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// - `OPENAI_API_KEY` (optional; without it no chat provider is configured)
    /// - `OPENAI_BASE_URL` (default `https://api.openai.com/v1`)
    /// - `KNOWLEDGE_RECALL_URL`
    /// - `IMAGE_MODEL_DOMAINS` (comma separated, default `image,imagev3`)
    /// - `PROVIDER_TIMEOUT_SECS` (default 120)
    pub fn from_env() -> Result<Self, FlowError> {
        let timeout = match env::var("PROVIDER_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.trim().parse().map_err(|_| {
                FlowError::config(format!("PROVIDER_TIMEOUT_SECS is not a number: {}", raw))
            })?),
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let chat = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(|api_key| ChatProviderConfig {
                api_key,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
                timeout,
            });

        let knowledge = KnowledgeClientConfig {
            recall_url: env::var("KNOWLEDGE_RECALL_URL").unwrap_or_default(),
            timeout,
        };

        let domains = env::var("IMAGE_MODEL_DOMAINS")
            .unwrap_or_else(|_| DEFAULT_IMAGE_MODEL_DOMAINS.to_string());

        Ok(Self {
            chat,
            knowledge,
            image_model_domains: parse_domain_list(&domains),
        })
    }

    /// Whether the given model domain is an image-understanding model
    pub fn is_image_model(&self, domain: &str) -> bool {
        self.image_model_domains.iter().any(|d| d == domain)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chat: None,
            knowledge: KnowledgeClientConfig {
                recall_url: String::new(),
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            },
            image_model_domains: parse_domain_list(DEFAULT_IMAGE_MODEL_DOMAINS),
        }
    }
}

fn parse_domain_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domain_list_skips_blanks() {
        assert_eq!(
            parse_domain_list(" image , ,imagev3,"),
            vec!["image".to_string(), "imagev3".to_string()]
        );
    }

    #[test]
    fn test_default_image_domains() {
        let config = EngineConfig::default();
        assert!(config.is_image_model("image"));
        assert!(config.is_image_model("imagev3"));
        assert!(!config.is_image_model("generalv3.5"));
        assert!(config.chat.is_none());
    }
}
