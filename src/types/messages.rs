use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tools::ToolResult;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A typed part of a message's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Vec<ToolResult>,
    },
    Media {
        data: String,
        media_type: String,
    },
}

impl ContentPart {
    /// Extract text content if this is a Text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Size used for context estimation.
    fn char_len(&self) -> usize {
        match self {
            ContentPart::Text { text } | ContentPart::Reasoning { text } => text.len(),
            ContentPart::ToolCall {
                tool_name, input, ..
            } => tool_name.len() + input.to_string().len(),
            ContentPart::ToolResult { output, .. } => output
                .iter()
                .map(|r| match r {
                    ToolResult::Json { value } => value.to_string().len(),
                    ToolResult::Media { data, .. } => data.len(),
                    ToolResult::Error { message } => message.len(),
                })
                .sum(),
            ContentPart::Media { data, .. } => data.len(),
        }
    }
}

/// One turn in an agent's conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::Text { text: text.into() }])
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::Text { text: text.into() }])
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::Text { text: text.into() }])
    }

    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: Vec<ToolResult>,
    ) -> Self {
        Self::new(
            Role::Tool,
            vec![ContentPart::ToolResult {
                tool_call_id: tool_call_id.into(),
                tool_name: tool_name.into(),
                output,
            }],
        )
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Concatenated text parts, or None when the message carries no text.
    pub fn text(&self) -> Option<String> {
        let text: Vec<&str> = self.content.iter().filter_map(ContentPart::as_text).collect();
        if text.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        }
    }

    /// `(tool_call_id, tool_name, input)` of every tool-call part, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => Some((tool_call_id.as_str(), tool_name.as_str(), input)),
            _ => None,
        })
    }

    /// Every tool result carried by this message, in order.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult { output, .. } => Some(output),
                _ => None,
            })
            .flatten()
    }

    pub(crate) fn char_len(&self) -> usize {
        self.content.iter().map(ContentPart::char_len).sum()
    }
}

/// Ids of tool calls that have no later matching tool result.
///
/// Calls whose tool name satisfies `is_proposal` are correlated out-of-band
/// and therefore never reported.
pub fn unmatched_tool_calls(
    history: &[Message],
    is_proposal: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut answered = HashSet::new();
    let mut unmatched = Vec::new();
    for message in history.iter().rev() {
        for part in message.content.iter().rev() {
            match part {
                ContentPart::ToolResult { tool_call_id, .. } => {
                    answered.insert(tool_call_id.as_str());
                }
                ContentPart::ToolCall {
                    tool_call_id,
                    tool_name,
                    ..
                } if message.role == Role::Assistant => {
                    if !answered.contains(tool_call_id.as_str()) && !is_proposal(tool_name) {
                        unmatched.push(tool_call_id.clone());
                    }
                }
                _ => {}
            }
        }
    }
    unmatched.reverse();
    unmatched
}

/// Rough token estimate for a history (four characters per token).
pub fn estimate_tokens(history: &[Message]) -> u64 {
    let chars: usize = history.iter().map(Message::char_len).sum();
    chars.div_ceil(4) as u64
}
