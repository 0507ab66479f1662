//! Output model: role-tagged messages made of content blocks, and the
//! builder the compiler feeds while walking a document.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text {
        value: String,
    },
    Image {
        url: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        id: String,
        value: String,
    },
}

impl ContentBlock {
    pub fn text(value: impl Into<String>) -> Self {
        ContentBlock::Text {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }
}

/// What a successful compile produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompileResult {
    pub config: IndexMap<String, serde_json::Value>,
    pub messages: Vec<Message>,
}

/// Accumulates rendered text and blocks into messages.
///
/// Text outside any message lands in an implicit system message that is
/// flushed whenever an explicit message or reference starts, and at the end.
#[derive(Debug, Default)]
pub(crate) struct ConversationBuilder {
    messages: Vec<Message>,
    open: Option<OpenMessage>,
    loose: Vec<ContentBlock>,
    text: String,
}

#[derive(Debug)]
struct OpenMessage {
    role: MessageRole,
    tool_id: Option<String>,
    content: Vec<ContentBlock>,
}

impl ConversationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Takes the pending text run without turning it into a block. Used by
    /// tags whose body is data rather than content.
    pub fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Turns the pending text run into a text block. Runs are trimmed and
    /// blank runs are dropped.
    pub fn flush_text(&mut self) {
        let text = self.take_text();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.push_block(ContentBlock::text(trimmed));
        }
    }

    pub fn push_block(&mut self, block: ContentBlock) {
        match &mut self.open {
            Some(message) => message.content.push(block),
            None => self.loose.push(block),
        }
    }

    /// Emits the implicit system message, if anything was collected.
    pub fn flush_loose(&mut self) {
        self.flush_text();
        if !self.loose.is_empty() {
            let content = std::mem::take(&mut self.loose);
            self.messages.push(Message::new(MessageRole::System, content));
        }
    }

    pub fn begin_message(&mut self, role: MessageRole, tool_id: Option<String>) {
        self.flush_loose();
        self.open = Some(OpenMessage {
            role,
            tool_id,
            content: Vec::new(),
        });
    }

    /// Closes the open message. Text in a tool message becomes a tool
    /// result for the message's id.
    pub fn end_message(&mut self) {
        self.flush_text();
        let Some(open) = self.open.take() else {
            return;
        };
        let content = match (open.role, open.tool_id) {
            (MessageRole::Tool, Some(id)) => open
                .content
                .into_iter()
                .map(|block| match block {
                    ContentBlock::Text { value } => ContentBlock::ToolResult {
                        id: id.clone(),
                        value,
                    },
                    other => other,
                })
                .collect(),
            _ => open.content,
        };
        self.messages.push(Message::new(open.role, content));
    }

    /// Appends already-built messages, e.g. from a referenced prompt.
    pub fn extend(&mut self, messages: Vec<Message>) {
        self.flush_loose();
        self.messages.extend(messages);
    }

    pub fn finish(mut self) -> Vec<Message> {
        self.end_message();
        self.flush_loose();
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn loose_text_becomes_system_message() {
        let mut builder = ConversationBuilder::new();
        builder.push_text("  Be brief.\n");
        builder.begin_message(MessageRole::User, None);
        builder.push_text("Hi");
        builder.end_message();
        builder.push_text("\n\n");

        assert_eq!(
            builder.finish(),
            vec![
                Message::new(MessageRole::System, vec![ContentBlock::text("Be brief.")]),
                Message::new(MessageRole::User, vec![ContentBlock::text("Hi")]),
            ]
        );
    }

    #[test]
    fn tool_message_text_becomes_result() {
        let mut builder = ConversationBuilder::new();
        builder.begin_message(MessageRole::Tool, Some("call-1".into()));
        builder.push_text("42");
        builder.end_message();

        assert_eq!(
            builder.finish(),
            vec![Message::new(
                MessageRole::Tool,
                vec![ContentBlock::ToolResult {
                    id: "call-1".into(),
                    value: "42".into()
                }]
            )]
        );
    }

    #[test]
    fn blocks_serialize_with_type_tag() {
        let block = ContentBlock::ToolCall {
            id: "1".into(),
            name: "search".into(),
            arguments: serde_json::json!({ "q": "rust" }),
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            serde_json::json!({ "type": "toolCall", "id": "1", "name": "search", "arguments": { "q": "rust" } })
        );
        assert_eq!(
            serde_json::to_value(MessageRole::Assistant).unwrap(),
            serde_json::json!("assistant")
        );
    }

    #[test]
    fn roles_parse_from_names() {
        assert_eq!("tool".parse::<MessageRole>(), Ok(MessageRole::Tool));
        assert_eq!("robot".parse::<MessageRole>(), Err("robot".to_string()));
    }
}
