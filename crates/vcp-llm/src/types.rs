//! Request and response types for the OpenAI chat completion API.
//!
//! Fields the relay does not interpret are kept in `extra` so a client's
//! `temperature`, `tools`, `response_format`, etc. reach the upstream
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use vcp_types::message::{ChatMessage, ContentPart, MessageContent};

/// A chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Empty when the client did not specify one; the relay fills in its default.
    #[serde(default)]
    pub model: String,

    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: None,
            extra: Map::new(),
        }
    }

    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Same parameters, different conversation.
    pub fn with_messages(&self, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: self.model.clone(),
            messages,
            stream: self.stream,
            extra: self.extra.clone(),
        }
    }
}

/// A buffered chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub choices: Vec<Choice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatResponse {
    /// Text of the first choice, empty if there is none.
    pub fn content(&self) -> String {
        self.choices
            .first()
            .map(|c| c.message.text())
            .unwrap_or_default()
    }

    /// Replace the first choice's text (creating a choice if needed).
    pub fn set_content(&mut self, content: impl Into<String>) {
        let content = MessageContent::Text(content.into());
        match self.choices.first_mut() {
            Some(choice) => choice.message.content = content,
            None => self.choices.push(Choice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".into(),
                    content,
                    extra: Map::new(),
                },
                finish_reason: Some("stop".into()),
                extra: Map::new(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,

    pub message: ChatMessage,

    #[serde(default)]
    pub finish_reason: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Token accounting as reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One decoded piece of a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta { text: String },
    Done { finish_reason: Option<String> },
}

// ---------------------------------------------------------------------------
// Wire format of SSE deltas
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct StreamDelta {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChoice {
    #[serde(default)]
    pub delta: DeltaContent,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DeltaContent {
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_keeps_unknown_fields() {
        let raw = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "stream": true
        });
        let req: ChatRequest = serde_json::from_value(raw).unwrap();
        assert!(req.is_stream());
        assert_eq!(req.extra.get("temperature"), Some(&json!(0.2)));

        let follow_up = req.with_messages(vec![ChatMessage::user("again")]);
        let out = serde_json::to_value(&follow_up).unwrap();
        assert_eq!(out["temperature"], json!(0.2));
        assert_eq!(out["messages"][0]["content"], "again");
    }

    #[test]
    fn missing_model_defaults_to_empty() {
        let req: ChatRequest = serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(req.model.is_empty());
        assert!(!req.is_stream());
    }

    #[test]
    fn response_content_and_rewrite() {
        let mut resp: ChatResponse = serde_json::from_value(json!({
            "id": "c1",
            "object": "chat.completion",
            "model": "m",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "a"}, "finish_reason": "stop"}]
        }))
        .unwrap();
        assert_eq!(resp.content(), "a");
        resp.set_content("b");
        assert_eq!(resp.content(), "b");
        assert_eq!(resp.extra.get("object"), Some(&json!("chat.completion")));
    }

    #[test]
    fn set_content_on_empty_choices() {
        let mut resp: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(resp.content(), "");
        resp.set_content("x");
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.content(), "x");
    }
}
