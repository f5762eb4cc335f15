use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors raised while accumulating audio
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("audio stream not started for session {0}")]
    NotStarted(String),

    #[error("audio buffer for session {session_id} exceeds {limit} bytes")]
    BufferFull { session_id: String, limit: usize },
}

/// Audio captured for one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedAudio {
    pub audio: Vec<u8>,
    /// Number of chunks received, excluding audio preloaded on resume
    pub chunk_count: usize,
}

/// Snapshot of an active stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub total_bytes: usize,
    pub preloaded_bytes: usize,
    pub duration_secs: f64,
}

struct AudioStream {
    started_at: DateTime<Utc>,
    chunk_count: usize,
    preloaded_bytes: usize,
    buffer: Vec<u8>,
}

impl AudioStream {
    fn new(preloaded: Vec<u8>) -> Self {
        Self {
            started_at: Utc::now(),
            chunk_count: 0,
            preloaded_bytes: preloaded.len(),
            buffer: preloaded,
        }
    }

    fn into_captured(self) -> CapturedAudio {
        CapturedAudio {
            audio: self.buffer,
            chunk_count: self.chunk_count,
        }
    }
}

/// Per-session audio accumulation feeding the transcription collaborator
pub struct AudioStreams {
    streams: Mutex<HashMap<String, AudioStream>>,
    max_buffer_bytes: usize,
}

impl AudioStreams {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            max_buffer_bytes,
        }
    }

    /// Start an empty stream, discarding any unfinished one for the session
    pub async fn start(&self, session_id: &str) {
        let mut streams = self.streams.lock().await;
        if streams
            .insert(session_id.to_string(), AudioStream::new(Vec::new()))
            .is_some()
        {
            warn!("Discarded unfinished audio stream: {}", session_id);
        }
        info!("Audio stream started: {}", session_id);
    }

    /// Re-arm a stream with audio captured before a disconnect
    ///
    /// Leaves an already active stream untouched and returns false.
    pub async fn resume(&self, session_id: &str, preloaded: Vec<u8>) -> bool {
        let mut streams = self.streams.lock().await;
        if streams.contains_key(session_id) {
            debug!("Audio stream already active, not re-armed: {}", session_id);
            return false;
        }

        info!(
            "Audio stream re-armed: {} ({} bytes preloaded)",
            session_id,
            preloaded.len()
        );
        streams.insert(session_id.to_string(), AudioStream::new(preloaded));
        true
    }

    /// Append a decoded chunk, returning the total buffered bytes
    pub async fn push_chunk(&self, session_id: &str, chunk: &[u8]) -> Result<usize, StreamError> {
        let mut streams = self.streams.lock().await;
        let stream = streams
            .get_mut(session_id)
            .ok_or_else(|| StreamError::NotStarted(session_id.to_string()))?;

        if stream.buffer.len() + chunk.len() > self.max_buffer_bytes {
            return Err(StreamError::BufferFull {
                session_id: session_id.to_string(),
                limit: self.max_buffer_bytes,
            });
        }

        stream.buffer.extend_from_slice(chunk);
        stream.chunk_count += 1;

        debug!(
            "Audio chunk buffered: {} (chunk={}, bytes={}, total={})",
            session_id,
            stream.chunk_count,
            chunk.len(),
            stream.buffer.len()
        );

        Ok(stream.buffer.len())
    }

    /// Stop the stream and hand back everything it captured
    pub async fn finish(&self, session_id: &str) -> Option<CapturedAudio> {
        let stream = self.streams.lock().await.remove(session_id)?;
        info!(
            "Audio stream finished: {} ({} chunks, {} bytes)",
            session_id,
            stream.chunk_count,
            stream.buffer.len()
        );
        Some(stream.into_captured())
    }

    /// Detach the stream of a session whose connection dropped
    pub async fn suspend(&self, session_id: &str) -> Option<CapturedAudio> {
        let stream = self.streams.lock().await.remove(session_id)?;
        info!(
            "Audio stream suspended: {} ({} chunks, {} bytes)",
            session_id,
            stream.chunk_count,
            stream.buffer.len()
        );
        Some(stream.into_captured())
    }

    pub async fn discard(&self, session_id: &str) -> bool {
        self.streams.lock().await.remove(session_id).is_some()
    }

    pub async fn is_active(&self, session_id: &str) -> bool {
        self.streams.lock().await.contains_key(session_id)
    }

    pub async fn status(&self, session_id: &str) -> Option<StreamStatus> {
        let streams = self.streams.lock().await;
        let stream = streams.get(session_id)?;
        let elapsed = Utc::now().signed_duration_since(stream.started_at);

        Some(StreamStatus {
            session_id: session_id.to_string(),
            started_at: stream.started_at,
            chunk_count: stream.chunk_count,
            total_bytes: stream.buffer.len(),
            preloaded_bytes: stream.preloaded_bytes,
            duration_secs: elapsed.num_milliseconds() as f64 / 1000.0,
        })
    }

    pub async fn active_count(&self) -> usize {
        self.streams.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_requires_started_stream() {
        let streams = AudioStreams::new(1024);
        let err = streams.push_chunk("s1", &[1, 2]).await.unwrap_err();
        assert_eq!(err, StreamError::NotStarted("s1".to_string()));
    }

    #[tokio::test]
    async fn test_buffer_limit_is_enforced() {
        let streams = AudioStreams::new(4);
        streams.start("s1").await;
        assert_eq!(streams.push_chunk("s1", &[0; 3]).await.unwrap(), 3);

        let err = streams.push_chunk("s1", &[0; 2]).await.unwrap_err();
        assert!(matches!(err, StreamError::BufferFull { limit: 4, .. }));
    }

    #[tokio::test]
    async fn test_resume_preloads_audio() {
        let streams = AudioStreams::new(1024);
        assert!(streams.resume("s1", vec![9, 9]).await);
        streams.push_chunk("s1", &[1]).await.unwrap();

        let status = streams.status("s1").await.unwrap();
        assert_eq!(status.preloaded_bytes, 2);
        assert_eq!(status.total_bytes, 3);

        let captured = streams.finish("s1").await.unwrap();
        assert_eq!(captured.audio, vec![9, 9, 1]);
        assert_eq!(captured.chunk_count, 1);
        assert!(!streams.is_active("s1").await);
    }

    #[tokio::test]
    async fn test_resume_keeps_active_stream() {
        let streams = AudioStreams::new(1024);
        streams.start("s1").await;
        streams.push_chunk("s1", &[1, 2, 3]).await.unwrap();

        assert!(!streams.resume("s1", vec![7]).await);
        assert_eq!(streams.finish("s1").await.unwrap().audio, vec![1, 2, 3]);
    }
}
