pub mod backend;
pub mod stream;

pub use backend::{
    MockTranscriber, TranscriptionConfig, TranscriptionEngine, TranscriptionFactory,
    TranscriptionPort, NO_AUDIO_PLACEHOLDER, TRANSCRIPTION_UNAVAILABLE_PLACEHOLDER,
};
pub use stream::{AudioStreams, CapturedAudio, StreamError, StreamStatus};
