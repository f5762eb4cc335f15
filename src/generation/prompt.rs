use crate::session::{Message, Session, UserProfile};
use std::fmt::Write;

/// What a prompt asks the language model for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPurpose {
    /// Candidate replies for the user to pick from
    Reply,
    /// A `{tendency, mood, tone}` JSON object describing the user's stance
    OpinionPrediction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub purpose: PromptPurpose,
    pub text: String,
}

/// Per-request overrides for reply generation
///
/// Unset fields fall back to what is stored on the session.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub focused_message_ids: Option<Vec<String>>,
    pub user_opinion: Option<String>,
    pub profile: Option<UserProfile>,
}

fn push_message(text: &mut String, message: &Message) {
    let _ = writeln!(text, "[{}] {}: {}", message.id, message.sender, message.content);
}

fn push_section(text: &mut String, title: &str, body: &str) {
    let _ = writeln!(text, "\n## {}\n{}", title, body.trim_end());
}

/// Build the reply prompt from a session snapshot
pub fn reply_prompt(session: &Session, options: &GenerationOptions) -> Prompt {
    let mut text = String::from("You help the user reply in a live conversation.\n");

    if let Some(scenario) = &session.config.scenario_description {
        push_section(&mut text, "Scenario", scenario);
    }

    if !session.history_messages.is_empty() {
        text.push_str("\n## Earlier conversation\n");
        for h in &session.history_messages {
            let _ = writeln!(text, "[{}] {}: {}", h.message_id, h.sender, h.content);
        }
    }

    if !session.messages.is_empty() {
        text.push_str("\n## Conversation\n");
        for message in &session.messages {
            push_message(&mut text, message);
        }
    }

    let focused: Vec<&Message> = match &options.focused_message_ids {
        Some(ids) => ids.iter().filter_map(|id| session.message(id)).collect(),
        None => session.focused_messages(),
    };
    if !focused.is_empty() {
        text.push_str("\n## Focus on these messages\n");
        for message in focused {
            push_message(&mut text, message);
        }
    }

    let opinion = options
        .user_opinion
        .as_ref()
        .or(session.user_opinion.as_ref());
    if let Some(opinion) = opinion {
        push_section(&mut text, "User opinion", opinion);
    }

    let mut profile = session.profile.clone();
    if let Some(update) = &options.profile {
        profile.merge(update.clone());
    }
    push_profile(&mut text, &profile);

    if !session.modifications.is_empty() {
        text.push_str("\n## Requested changes\n");
        for (i, modification) in session.modifications.iter().enumerate() {
            let _ = writeln!(text, "{}. {}", i + 1, modification);
        }
    }

    let _ = write!(
        text,
        "\n## Task\nWrite {} distinct replies the user could say next.",
        session.config.response_count
    );

    Prompt {
        purpose: PromptPurpose::Reply,
        text,
    }
}

fn push_profile(text: &mut String, profile: &UserProfile) {
    if let Some(corpus) = &profile.corpus {
        push_section(text, "How the user usually speaks", corpus);
    }
    if let Some(background) = &profile.background {
        push_section(text, "User background", background);
    }
    if let Some(preferences) = &profile.preferences {
        push_section(text, "User preferences", preferences);
    }
    if let Some(recent) = &profile.recent_experiences {
        push_section(text, "Recent experiences", recent);
    }
}

/// Build the opinion prediction prompt after the user picked `selected_content`
pub fn opinion_prompt(session: &Session, selected_content: &str) -> Prompt {
    let mut text = String::from(
        "Predict the stance of the user from the reply they just chose. \
         Answer with a JSON object with keys tendency, mood and tone.\n",
    );

    if let Some(scenario) = &session.config.scenario_description {
        push_section(&mut text, "Scenario", scenario);
    }

    if !session.messages.is_empty() {
        text.push_str("\n## Conversation\n");
        for message in &session.messages {
            push_message(&mut text, message);
        }
    }

    push_section(&mut text, "Chosen reply", selected_content);

    Prompt {
        purpose: PromptPurpose::OpinionPrediction,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    fn session_with_messages() -> Session {
        let mut s = Session::new(
            "s1".to_string(),
            SessionConfig::new(Some("Job interview".to_string()), 4),
            Vec::new(),
        );
        s.start_message("interviewer").unwrap();
        s.end_message("Why do you want this role?".to_string()).unwrap();
        s.start_message("me").unwrap();
        s.end_message("I like the team.".to_string()).unwrap();
        s
    }

    #[test]
    fn test_reply_prompt_includes_context() {
        let mut s = session_with_messages();
        s.add_modification("be more concise".to_string());
        s.set_focused_messages(vec!["msg_001".to_string()]);

        let prompt = reply_prompt(&s, &GenerationOptions::default());

        assert_eq!(prompt.purpose, PromptPurpose::Reply);
        assert!(prompt.text.contains("Job interview"));
        assert!(prompt.text.contains("## Focus on these messages\n[msg_001]"));
        assert!(prompt.text.contains("1. be more concise"));
        assert!(prompt.text.contains("Write 4 distinct replies"));
    }

    #[test]
    fn test_reply_prompt_overrides_take_precedence() {
        let mut s = session_with_messages();
        s.set_user_opinion("stored opinion".to_string());

        let options = GenerationOptions {
            focused_message_ids: Some(vec!["msg_002".to_string(), "missing".to_string()]),
            user_opinion: Some("fresh opinion".to_string()),
            profile: Some(UserProfile {
                background: Some("engineer".to_string()),
                ..Default::default()
            }),
        };
        let prompt = reply_prompt(&s, &options);

        assert!(prompt.text.contains("fresh opinion"));
        assert!(!prompt.text.contains("stored opinion"));
        assert!(prompt.text.contains("## Focus on these messages\n[msg_002]"));
        assert!(prompt.text.contains("engineer"));
    }

    #[test]
    fn test_opinion_prompt_mentions_choice() {
        let s = session_with_messages();
        let prompt = opinion_prompt(&s, "Sounds great to me");

        assert_eq!(prompt.purpose, PromptPurpose::OpinionPrediction);
        assert!(prompt.text.contains("Sounds great to me"));
    }
}
