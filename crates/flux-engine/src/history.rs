use flux_llm::{Message, Role};

/// Truncates to the last `max_history` entries, then drops leading
/// non-user messages so the remaining history always starts on a user
/// turn (an assistant/tool_result message with no preceding user
/// message confuses every provider's message-alternation rules).
/// Mirrors `conversation_engine.py`'s static `trim_history`.
pub fn trim_history(messages: &mut Vec<Message>, max_history: usize) {
    if messages.len() > max_history {
        let excess = messages.len() - max_history;
        messages.drain(0..excess);
    }
    while messages.first().is_some_and(|m| m.role != Role::User) {
        messages.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_llm::Message;

    #[test]
    fn truncates_to_max_history() {
        let mut messages: Vec<Message> = (0..10)
            .map(|i| Message::text(Role::User, format!("m{i}")))
            .collect();
        trim_history(&mut messages, 3);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text_content(), "m7");
    }

    #[test]
    fn drops_leading_non_user_messages_after_truncation() {
        let mut messages = vec![
            Message::text(Role::User, "u1"),
            Message::text(Role::Assistant, "a1"),
            Message::text(Role::Assistant, "a2"),
            Message::text(Role::User, "u2"),
        ];
        trim_history(&mut messages, 3);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text_content(), "u2");
    }

    #[test]
    fn leaves_short_history_untouched() {
        let mut messages = vec![Message::text(Role::User, "only")];
        trim_history(&mut messages, 40);
        assert_eq!(messages.len(), 1);
    }
}
