use anyhow::Result;

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Chat-completion backend that turns a prompt into an answer.
pub trait LlmProvider {
    fn answer(&self, request: &ProviderRequest) -> Result<String>;
}

pub struct ProviderRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}
