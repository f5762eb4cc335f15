use serde::{Deserialize, Serialize};

/// Predicted stance of the user after picking a suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionPrediction {
    pub tendency: String,
    pub mood: String,
    pub tone: String,
}

impl OpinionPrediction {
    /// Neutral prediction used when the model gives nothing usable
    pub fn neutral() -> Self {
        Self {
            tendency: "neutral".to_string(),
            mood: "calm".to_string(),
            tone: "polite".to_string(),
        }
    }

    /// Parse the first candidate that holds a prediction object
    pub fn parse(candidates: &[String]) -> Option<Self> {
        candidates.iter().find_map(|c| {
            let trimmed = c.trim();
            let start = trimmed.find('{')?;
            let end = trimmed.rfind('}')?;
            serde_json::from_str(&trimmed[start..=end]).ok()
        })
    }
}

const FALLBACK_REPLIES: [&str; 5] = [
    "Could you say a little more about that?",
    "I understand, let me think about it for a moment.",
    "That is a good point.",
    "I see it a bit differently, but I get where you are coming from.",
    "Thanks, that helps.",
];

/// Canned replies used when generation fails; always exactly `count` long
pub fn fallback_replies(count: usize) -> Vec<String> {
    FALLBACK_REPLIES
        .iter()
        .cycle()
        .take(count)
        .map(|s| s.to_string())
        .collect()
}

/// Trim or pad model output so exactly `count` suggestions are delivered
pub fn normalize_replies(mut replies: Vec<String>, count: usize) -> Vec<String> {
    replies.retain(|r| !r.trim().is_empty());
    replies.truncate(count);
    if replies.len() < count {
        let missing = count - replies.len();
        replies.extend(fallback_replies(count).into_iter().rev().take(missing));
    }
    replies
}
