pub mod backend;
pub mod fallback;
pub mod prompt;

pub use backend::{
    GenerationConfig, GenerationEngine, GenerationFactory, GenerationPort, MockGenerator,
};
pub use fallback::{fallback_replies, normalize_replies, OpinionPrediction};
pub use prompt::{opinion_prompt, reply_prompt, GenerationOptions, Prompt, PromptPurpose};
