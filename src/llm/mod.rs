pub mod gemini;
pub mod groq;
pub mod provider;

use gemini::GeminiProvider;
use groq::GroqProvider;
use provider::{AssistantInput, AssistantOutput, LlmProvider, LlmResult};

/// The configured chat model backend.
#[derive(Debug, Clone)]
pub enum LlmBackend {
    Gemini(GeminiProvider),
    Groq(GroqProvider),
}

impl LlmBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini(_) => "gemini",
            Self::Groq(_) => "groq",
        }
    }
}

impl LlmProvider for LlmBackend {
    async fn generate(&self, input: AssistantInput) -> LlmResult<AssistantOutput> {
        match self {
            Self::Gemini(provider) => provider.generate(input).await,
            Self::Groq(provider) => provider.generate(input).await,
        }
    }
}
