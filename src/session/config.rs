use serde::{Deserialize, Serialize};

/// Smallest number of reply suggestions a session may request
pub const MIN_RESPONSE_COUNT: u8 = 1;

/// Largest number of reply suggestions a session may request
pub const MAX_RESPONSE_COUNT: u8 = 5;

/// User-adjustable configuration of a conversation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Free-form description of the conversation scenario (replaced, never appended)
    pub scenario_description: Option<String>,

    /// How many reply suggestions each generation produces (1-5)
    pub response_count: u8,
}

impl SessionConfig {
    pub fn new(scenario_description: Option<String>, response_count: u8) -> Self {
        Self {
            scenario_description,
            response_count,
        }
    }

    /// Whether `count` is an acceptable reply count
    pub fn is_valid_response_count(count: u8) -> bool {
        (MIN_RESPONSE_COUNT..=MAX_RESPONSE_COUNT).contains(&count)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scenario_description: None,
            response_count: 3,
        }
    }
}
