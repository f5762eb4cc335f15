use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Transcript used when a recording ends without any audio
pub const NO_AUDIO_PLACEHOLDER: &str = "(no audio content)";

/// Transcript used when the speech-to-text collaborator fails
pub const TRANSCRIPTION_UNAVAILABLE_PLACEHOLDER: &str = "(transcription unavailable)";

/// Speech-to-text engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionEngine {
    /// Deterministic transcripts derived from the audio size
    Mock,
}

/// Configuration for the transcription collaborator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub engine: TranscriptionEngine,
    /// Simulated inference latency
    pub latency_ms: u64,
    /// Upper bound on audio buffered for a single message
    pub max_buffer_bytes: usize,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            engine: TranscriptionEngine::Mock,
            latency_ms: 100,
            max_buffer_bytes: 50 * 1024 * 1024, // 50 MiB
        }
    }
}

/// Speech-to-text collaborator
///
/// Implementations:
/// - Mock: canned transcript describing the audio it received
#[async_trait::async_trait]
pub trait TranscriptionPort: Send + Sync {
    /// Transcribe a complete audio buffer
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// Deterministic stand-in for a real speech-to-text engine
pub struct MockTranscriber {
    latency: Duration,
}

impl MockTranscriber {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait::async_trait]
impl TranscriptionPort for MockTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if audio.is_empty() {
            return Ok(String::new());
        }

        Ok(format!("Transcribed speech from {} bytes of audio", audio.len()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Transcription collaborator factory
pub struct TranscriptionFactory;

impl TranscriptionFactory {
    /// Create the collaborator selected in configuration
    pub fn create(config: &TranscriptionConfig) -> Result<Arc<dyn TranscriptionPort>> {
        match config.engine {
            TranscriptionEngine::Mock => Ok(Arc::new(MockTranscriber::new(
                Duration::from_millis(config.latency_ms),
            ))),
        }
    }
}
