//! Chat messages as they travel between client, relay and upstream.
//!
//! The relay forwards whatever the client sent, so every struct keeps
//! unknown fields in a flattened `extra` map and re-emits them verbatim.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant` or `tool`.
    pub role: String,

    /// Message body. `null` or a missing field deserializes as empty text.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: MessageContent,

    /// Fields the relay does not interpret (`name`, `tool_calls`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(content.into()),
            extra: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }

    /// Concatenated text of the message (text parts joined by newlines).
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Rewrite every piece of text in the message in place.
    pub fn map_text(&mut self, f: impl FnMut(&str) -> String) {
        self.content.map_text(f);
    }
}

/// Either a plain string or the multi-part array form (text + images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn map_text(&mut self, mut f: impl FnMut(&str) -> String) {
        match self {
            MessageContent::Text(s) => *s = f(s),
            MessageContent::Parts(parts) => {
                for part in parts.iter_mut() {
                    if let Some(text) = part.text.as_mut() {
                        *text = f(text);
                    }
                }
            }
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        match self {
            MessageContent::Text(s) => s.contains(needle),
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| p.text.as_deref().is_some_and(|t| t.contains(needle))),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_owned())
    }
}

/// One element of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == "image_url"
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<MessageContent, D::Error> {
    Option::<MessageContent>::deserialize(d).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_string_content() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "user", "content": "hello"})).unwrap();
        assert_eq!(msg.role, "user");
        assert_eq!(msg.text(), "hello");
    }

    #[test]
    fn null_content_is_empty_text() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "assistant", "content": null})).unwrap();
        assert_eq!(msg.content, MessageContent::Text(String::new()));
    }

    #[test]
    fn multipart_content_keeps_image_parts() {
        let raw = json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAA"}}
            ]
        });
        let msg: ChatMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(msg.text(), "what is this?");
        match &msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(parts[1].is_image());
            }
            other => panic!("expected parts, got {other:?}"),
        }
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = json!({"role": "assistant", "content": "x", "name": "bot"});
        let msg: ChatMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(msg.extra.get("name"), Some(&json!("bot")));
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn map_text_touches_only_text_parts() {
        let mut content = MessageContent::Parts(vec![
            ContentPart::text("a {{X}}"),
            ContentPart {
                kind: "image_url".into(),
                text: None,
                extra: Map::new(),
            },
        ]);
        content.map_text(|t| t.replace("{{X}}", "1"));
        assert_eq!(content.text(), "a 1");
        assert!(content.contains("a 1"));
    }
}
