// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types and the per-session conversation store
//!
//! A `Conversation` always holds a system message at index 0. Nothing in the
//! public API can remove it: `reset()` truncates back to it, and hydration
//! from persisted history re-inserts it.

use serde::{Deserialize, Serialize};

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call recorded on the assistant message that requested it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantToolCall {
    /// Provider-assigned call id
    pub id: String,
    /// Tool name as the provider spelled it
    pub name: String,
    /// Raw argument text as streamed (may be invalid JSON)
    pub arguments: String,
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote it
    pub role: Role,

    /// Text content
    pub content: String,

    /// For `tool` messages: the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For `tool` messages: the tool that produced the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// For `assistant` messages: tool calls requested in this response
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<AssistantToolCall>,

    /// Set when the turn producing this message was cancelled mid-stream
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
            incomplete: false,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message that requested tool calls
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<AssistantToolCall>,
    ) -> Self {
        let mut message = Self::new(Role::Assistant, content);
        message.tool_calls = tool_calls;
        message
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::new(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message.tool_name = Some(tool_name.into());
        message
    }

    /// Mark the message as cut short by cancellation
    pub fn into_incomplete(mut self) -> Self {
        self.incomplete = true;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Ordered message list for one session
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create a conversation holding only the system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Rebuild a conversation from persisted history.
    ///
    /// A leading system message in `history` replaces `system_prompt`; any
    /// other system messages are dropped so index 0 stays the only one.
    pub fn from_messages(system_prompt: impl Into<String>, history: Vec<Message>) -> Self {
        let mut history = history.into_iter().peekable();
        let system = match history.peek() {
            Some(first) if first.role == Role::System => history.next(),
            _ => None,
        }
        .unwrap_or_else(|| Message::system(system_prompt));

        let mut messages = vec![system];
        let mut dropped = 0usize;
        for message in history {
            if message.role == Role::System {
                dropped += 1;
                continue;
            }
            messages.push(message);
        }
        if dropped > 0 {
            tracing::warn!(
                target: "toolstream.conversation",
                dropped,
                "dropped non-leading system messages while hydrating history"
            );
        }

        Self { messages }
    }

    /// Append a message
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Copy of the full message list
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Borrow the message list
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Truncate to the leading system message
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    /// The system prompt at index 0
    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    /// Number of messages, system message included
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when only the system message is present
    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    /// Text of the most recent assistant message, if any
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_system_places_system_first() {
        let conversation = Conversation::with_system("be helpful");
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::System);
        assert_eq!(conversation.system_prompt(), "be helpful");
        assert!(conversation.is_empty());
    }

    #[test]
    fn test_reset_keeps_system_message() {
        let mut conversation = Conversation::with_system("sys");
        conversation.append(Message::user("hi"));
        conversation.append(Message::assistant("hello"));
        assert_eq!(conversation.len(), 3);

        conversation.reset();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0], Message::system("sys"));

        // Resetting twice never empties the store.
        conversation.reset();
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut conversation = Conversation::with_system("sys");
        let before = conversation.snapshot();
        conversation.append(Message::user("later"));
        assert_eq!(before.len(), 1);
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_from_messages_inserts_missing_system() {
        let conversation = Conversation::from_messages(
            "default prompt",
            vec![Message::user("q"), Message::assistant("a")],
        );
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.system_prompt(), "default prompt");
    }

    #[test]
    fn test_from_messages_keeps_leading_system_and_drops_others() {
        let conversation = Conversation::from_messages(
            "ignored",
            vec![
                Message::system("stored prompt"),
                Message::user("q"),
                Message::system("stray"),
                Message::assistant("a"),
            ],
        );
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.system_prompt(), "stored prompt");
        assert!(conversation.messages()[1..]
            .iter()
            .all(|m| m.role != Role::System));
    }

    #[test]
    fn test_tool_result_message_fields() {
        let message = Message::tool_result("call_1", "list_tables", "[\"users\"]");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(message.tool_name.as_deref(), Some("list_tables"));
    }

    #[test]
    fn test_last_assistant_text() {
        let mut conversation = Conversation::with_system("sys");
        assert!(conversation.last_assistant_text().is_none());
        conversation.append(Message::assistant("first"));
        conversation.append(Message::user("again"));
        conversation.append(Message::assistant("second"));
        assert_eq!(conversation.last_assistant_text(), Some("second"));
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let incomplete = serde_json::to_value(Message::assistant("par").into_incomplete()).unwrap();
        assert_eq!(incomplete["incomplete"], true);
    }
}
