use super::prompt::{Prompt, PromptPurpose};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Language model engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationEngine {
    /// Canned replies and a fixed opinion prediction
    Mock,
}

/// Configuration for the generation collaborator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub engine: GenerationEngine,
    /// Simulated inference latency
    pub latency_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            engine: GenerationEngine::Mock,
            latency_ms: 500,
        }
    }
}

/// Language model collaborator
///
/// Implementations:
/// - Mock: deterministic canned output, honours the requested count
#[async_trait::async_trait]
pub trait GenerationPort: Send + Sync {
    /// Produce up to `count` candidate texts for the prompt
    async fn generate(&self, prompt: &Prompt, count: usize) -> Result<Vec<String>>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

const MOCK_REPLIES: [&str; 5] = [
    "I see what you mean, that is worth thinking through carefully.",
    "That makes sense, though there might be another way to look at it.",
    "Ha, that is a fun idea! Something similar happened to me once.",
    "Could you tell me a bit more about how you see it?",
    "Thanks for sharing that, I learned something new.",
];

/// Deterministic stand-in for a real language model
pub struct MockGenerator {
    latency: Duration,
}

impl MockGenerator {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait::async_trait]
impl GenerationPort for MockGenerator {
    async fn generate(&self, prompt: &Prompt, count: usize) -> Result<Vec<String>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match prompt.purpose {
            PromptPurpose::Reply => Ok(MOCK_REPLIES
                .iter()
                .cycle()
                .take(count)
                .map(|s| s.to_string())
                .collect()),
            PromptPurpose::OpinionPrediction => Ok(vec![serde_json::json!({
                "tendency": "supportive",
                "mood": "engaged",
                "tone": "friendly",
            })
            .to_string()]),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Generation collaborator factory
pub struct GenerationFactory;

impl GenerationFactory {
    /// Create the collaborator selected in configuration
    pub fn create(config: &GenerationConfig) -> Result<Arc<dyn GenerationPort>> {
        match config.engine {
            GenerationEngine::Mock => Ok(Arc::new(MockGenerator::new(Duration::from_millis(
                config.latency_ms,
            )))),
        }
    }
}
