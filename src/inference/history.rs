//! History injection format
//!
//! The engine primes its context from a line-oriented transcript:
//!
//! ```text
//! <|im_start|>user
//! content, verbatim, possibly several lines
//! <|im_end|>
//! ```
//!
//! Persisted JSON history is the source of truth; the engine never hands a
//! transcript back, so [`decode`] exists to check what was sent.

use thiserror::Error;

use crate::types::message::{ChatMessage, Role};

pub const USER_TAG: &str = "<|im_start|>user";
pub const ASSISTANT_TAG: &str = "<|im_start|>assistant";
pub const END_OF_MESSAGE: &str = "<|im_end|>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("Expected a role tag on line {line}, found {found:?}")]
    ExpectedTag { line: usize, found: String },
    #[error("Message starting on line {line} is not terminated")]
    Unterminated { line: usize },
}

fn tag_for(role: Role) -> &'static str {
    match role {
        Role::User => USER_TAG,
        Role::Assistant => ASSISTANT_TAG,
    }
}

fn role_for(tag: &str) -> Option<Role> {
    if tag.eq_ignore_ascii_case(USER_TAG) {
        Some(Role::User)
    } else if tag.eq_ignore_ascii_case(ASSISTANT_TAG) {
        Some(Role::Assistant)
    } else {
        None
    }
}

pub fn encode(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(tag_for(message.role));
        out.push('\n');
        out.push_str(&message.content);
        out.push('\n');
        out.push_str(END_OF_MESSAGE);
        out.push('\n');
    }
    out
}

/// Parse a transcript produced by [`encode`].
///
/// Content lines equal to [`END_OF_MESSAGE`] cannot be represented.
pub fn decode(text: &str) -> Result<Vec<ChatMessage>, HistoryError> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let lines: Vec<&str> = body.split('\n').collect();
    let mut messages = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let role = role_for(lines[i]).ok_or_else(|| HistoryError::ExpectedTag {
            line: i + 1,
            found: lines[i].to_string(),
        })?;
        let start = i;

        let end = lines[start + 1..]
            .iter()
            .position(|line| *line == END_OF_MESSAGE)
            .map(|offset| start + 1 + offset)
            .ok_or(HistoryError::Unterminated { line: start + 1 })?;

        // The encoder always writes at least one content line.
        let content = lines[start + 1..end].join("\n");
        messages.push(ChatMessage::new(role, content));
        i = end + 1;
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let text = encode(&[ChatMessage::user("Hi"), ChatMessage::assistant("Hello")]);
        assert_eq!(
            text,
            "<|im_start|>user\nHi\n<|im_end|>\n<|im_start|>assistant\nHello\n<|im_end|>\n"
        );
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_round_trip_preserves_content() {
        let history = vec![
            ChatMessage::user("first line\nsecond line"),
            ChatMessage::assistant(""),
            ChatMessage::user("trailing newline\n"),
            ChatMessage::assistant("\n\nleading blanks"),
            ChatMessage::user("crlf\r\nkept"),
        ];

        let decoded = decode(&encode(&history)).unwrap();
        assert_eq!(decoded, history);
    }

    #[test]
    fn test_decode_tags_are_case_insensitive() {
        let decoded = decode("<|IM_START|>USER\nhey\n<|im_end|>\n").unwrap();
        assert_eq!(decoded, vec![ChatMessage::user("hey")]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode("hello\n"),
            Err(HistoryError::ExpectedTag {
                line: 1,
                found: "hello".to_string()
            })
        );
        assert_eq!(
            decode("<|im_start|>user\nno end\n"),
            Err(HistoryError::Unterminated { line: 1 })
        );
    }
}
