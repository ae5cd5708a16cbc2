//! Tool-call markup embedded in model output.
//!
//! ```text
//! <<<[TOOL_REQUEST]>>>
//! tool_name:「始」Weather「末」,
//! city:「始」Paris「末」
//! <<<[END_TOOL_REQUEST]>>>
//! ```
//!
//! Values are quoted with `「始」...「末」` or `⟪...⟫`, so they may span lines
//! and contain commas. A block without `tool_name`, or one whose end marker
//! never arrives, yields no request.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

pub const START_MARKER: &str = "<<<[TOOL_REQUEST]>>>";
pub const END_MARKER: &str = "<<<[END_TOOL_REQUEST]>>>";
pub const TOOL_NAME_KEY: &str = "tool_name";

const OPEN_QUOTE: &str = "「始」";
const CLOSE_QUOTE: &str = "「末」";

static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w_]+)\s*:\s*(?:「始」([\s\S]*?)「末」|⟪([\s\S]*?)⟫)\s*,?")
        .expect("invalid regex")
});

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub tool_name: String,
    /// Arguments other than `tool_name`, in order of appearance.
    pub args: Vec<(String, String)>,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Arguments as the JSON object handed to the plugin. A repeated key
    /// keeps its last value.
    pub fn arguments(&self) -> Map<String, Value> {
        self.args
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

/// Whether `text` contains at least the start of a request block.
pub fn has_tool_request(text: &str) -> bool {
    text.contains(START_MARKER)
}

/// Extract every well-formed request block, in order.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCallRequest> {
    let mut requests = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(START_MARKER) {
        let body_start = start + START_MARKER.len();
        let Some(end) = rest[body_start..].find(END_MARKER) else {
            debug!("tool request block without end marker, ignoring");
            break;
        };
        let body = &rest[body_start..body_start + end];
        match parse_block(body) {
            Some(request) => requests.push(request),
            None => debug!("tool request block without tool_name, ignoring"),
        }
        rest = &rest[body_start + end + END_MARKER.len()..];
    }
    requests
}

fn parse_block(body: &str) -> Option<ToolCallRequest> {
    let mut tool_name = None;
    let mut args = Vec::new();

    for caps in PAIR_RE.captures_iter(body) {
        let key = &caps[1];
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map_or("", |m| m.as_str());
        if key == TOOL_NAME_KEY {
            if tool_name.is_none() {
                tool_name = Some(value.trim().to_owned());
            }
        } else {
            args.push((key.to_owned(), value.to_owned()));
        }
    }

    let tool_name = tool_name.filter(|n| !n.is_empty())?;
    Some(ToolCallRequest { tool_name, args })
}

/// Render requests back into markup that [`parse_tool_calls`] accepts.
pub fn render_tool_calls(requests: &[ToolCallRequest]) -> String {
    requests
        .iter()
        .map(render_one)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_one(request: &ToolCallRequest) -> String {
    let mut out = String::from(START_MARKER);
    out.push('\n');
    let pairs = std::iter::once((TOOL_NAME_KEY, request.tool_name.as_str()))
        .chain(request.args.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let lines: Vec<String> = pairs
        .map(|(k, v)| format!("{k}:{OPEN_QUOTE}{v}{CLOSE_QUOTE}"))
        .collect();
    out.push_str(&lines.join(",\n"));
    out.push('\n');
    out.push_str(END_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_with_angle_quotes() {
        let text = "Let me check.\n<<<[TOOL_REQUEST]>>>tool_name:⟪Echo⟫<<<[END_TOOL_REQUEST]>>>";
        assert_eq!(parse_tool_calls(text), vec![ToolCallRequest::new("Echo")]);
    }

    #[test]
    fn values_span_lines_and_commas() {
        let text = "<<<[TOOL_REQUEST]>>>\n\
                    tool_name:「始」 DailyNote 「末」,\n\
                    content:「始」line one,\nline two「末」,\n\
                    mood: ⟪fine⟫\n\
                    <<<[END_TOOL_REQUEST]>>>";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "DailyNote");
        assert_eq!(
            calls[0].args,
            vec![
                ("content".to_owned(), "line one,\nline two".to_owned()),
                ("mood".to_owned(), "fine".to_owned()),
            ]
        );
    }

    #[test]
    fn multiple_blocks_in_order() {
        let text = "<<<[TOOL_REQUEST]>>>tool_name:⟪A⟫<<<[END_TOOL_REQUEST]>>> and \
                    <<<[TOOL_REQUEST]>>>tool_name:⟪B⟫, x:⟪1⟫<<<[END_TOOL_REQUEST]>>>";
        let names: Vec<_> = parse_tool_calls(text).into_iter().map(|c| c.tool_name).collect();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn block_without_tool_name_is_dropped() {
        let text = "<<<[TOOL_REQUEST]>>>city:⟪Paris⟫<<<[END_TOOL_REQUEST]>>>\
                    <<<[TOOL_REQUEST]>>>tool_name:⟪Ok⟫<<<[END_TOOL_REQUEST]>>>";
        assert_eq!(parse_tool_calls(text), vec![ToolCallRequest::new("Ok")]);
    }

    #[test]
    fn blank_tool_name_is_dropped() {
        let text = "<<<[TOOL_REQUEST]>>>tool_name:⟪  ⟫<<<[END_TOOL_REQUEST]>>>";
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn missing_end_marker_yields_nothing() {
        let text = "<<<[TOOL_REQUEST]>>>tool_name:⟪Echo⟫ and then the stream stopped";
        assert!(has_tool_request(text));
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn truncated_second_block_keeps_first() {
        let text = "<<<[TOOL_REQUEST]>>>tool_name:⟪A⟫<<<[END_TOOL_REQUEST]>>>\
                    <<<[TOOL_REQUEST]>>>tool_name:⟪B⟫";
        assert_eq!(parse_tool_calls(text), vec![ToolCallRequest::new("A")]);
    }

    #[test]
    fn render_then_parse_gives_same_requests() {
        let requests = vec![
            ToolCallRequest::new("Weather")
                .arg("city", "São Paulo")
                .arg("days", "3")
                .arg("note", " padded, with comma\nand newline "),
            ToolCallRequest::new("Echo"),
        ];
        assert_eq!(parse_tool_calls(&render_tool_calls(&requests)), requests);
    }

    #[test]
    fn arguments_as_json() {
        let args = ToolCallRequest::new("W").arg("city", "Oslo").arguments();
        assert_eq!(args.get("city"), Some(&Value::String("Oslo".into())));
        assert!(!args.contains_key(TOOL_NAME_KEY));
    }
}
