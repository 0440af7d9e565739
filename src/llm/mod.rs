pub mod anthropic;
pub mod client;
pub mod openai;

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::LlmConfig;

pub use anthropic::AnthropicClient;
pub use client::{
    strip_code_fence, ImageSource, InputContentBlock, LlmClient, LlmResponse, Message,
    MessageContent,
};
pub use openai::OpenAiClient;

/// Builds the client named by `[llm] provider`.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiClient::new(config.clone()))),
        "anthropic" => Ok(Arc::new(AnthropicClient::new(config.clone()))),
        other => bail!("Unsupported LLM provider: '{other}'. Supported: 'openai', 'anthropic'."),
    }
}
