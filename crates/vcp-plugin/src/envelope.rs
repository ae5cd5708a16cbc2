//! Interpreting a synchronous plugin's output.
//!
//! Plugins answer on stdout with
//! `{"status":"success","result":...}` or `{"status":"error","error":"..."}`.
//! The envelope is trusted whatever the exit code. Without one, a zero exit
//! makes the trimmed stdout the result and anything else is a failure
//! carrying truncated output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PluginError;
use vcp_platform::ProcessOutput;

/// Characters of stdout/stderr kept in a synthesized exit failure.
pub const OUTPUT_EXCERPT_CHARS: usize = 200;

/// Outcome of one plugin invocation, as fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PluginInvocationResult {
    Success {
        result: Value,
    },
    #[serde(rename = "error")]
    Failure {
        #[serde(rename = "error")]
        message: String,
    },
}

impl PluginInvocationResult {
    pub fn failure(message: impl Into<String>) -> Self {
        PluginInvocationResult::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PluginInvocationResult::Success { .. })
    }

    /// Text form of a successful result: strings verbatim, other JSON compact.
    pub fn result_text(&self) -> Option<String> {
        match self {
            PluginInvocationResult::Success { result } => Some(value_text(result)),
            PluginInvocationResult::Failure { .. } => None,
        }
    }
}

impl From<Result<Value, PluginError>> for PluginInvocationResult {
    fn from(result: Result<Value, PluginError>) -> Self {
        match result {
            Ok(result) => PluginInvocationResult::Success { result },
            Err(e) => PluginInvocationResult::Failure {
                message: e.to_string(),
            },
        }
    }
}

/// Render a JSON value for inclusion in conversation text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Decide the outcome of a finished plugin process.
pub fn interpret_output(plugin: &str, output: &ProcessOutput) -> Result<Value, PluginError> {
    let stdout = output.stdout.trim();

    if let Ok(envelope) = serde_json::from_str::<Envelope>(stdout) {
        match envelope.status.as_str() {
            "success" => return Ok(envelope.result.unwrap_or(Value::Null)),
            "error" => {
                let message = envelope
                    .error
                    .as_ref()
                    .map(value_text)
                    .unwrap_or_else(|| format!("Plugin '{plugin}' reported an error"));
                return Err(PluginError::ExecutionFailed {
                    plugin: plugin.to_owned(),
                    message,
                });
            }
            _ => {}
        }
    }

    if output.exit_code != 0 {
        return Err(PluginError::ProcessExit {
            plugin: plugin.to_owned(),
            code: output.exit_code,
            stdout: excerpt(stdout),
            stderr: excerpt(output.stderr.trim()),
        });
    }
    Ok(Value::String(stdout.to_owned()))
}

/// First [`OUTPUT_EXCERPT_CHARS`] characters, on a char boundary.
pub fn excerpt(text: &str) -> String {
    text.chars().take(OUTPUT_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn out(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn success_envelope() {
        let v = interpret_output("Echo", &out(0, r#"{"status":"success","result":"hi"}"#, ""))
            .unwrap();
        assert_eq!(v, json!("hi"));
    }

    #[test]
    fn error_envelope_honored_with_zero_exit() {
        let err = interpret_output("W", &out(0, r#"{"status":"error","error":"no city"}"#, ""))
            .unwrap_err();
        assert_eq!(err.to_string(), "no city");
    }

    #[test]
    fn success_envelope_honored_with_nonzero_exit() {
        let v = interpret_output("W", &out(3, r#"{"status":"success","result":{"t":21}}"#, ""))
            .unwrap();
        assert_eq!(v, json!({"t": 21}));
    }

    #[test]
    fn raw_stdout_is_success_on_zero_exit() {
        let v = interpret_output("W", &out(0, "  sunny\n", "")).unwrap();
        assert_eq!(v, json!("sunny"));
    }

    #[test]
    fn json_without_status_is_raw() {
        let v = interpret_output("W", &out(0, r#"{"temp": 3}"#, "")).unwrap();
        assert_eq!(v, json!(r#"{"temp": 3}"#));
    }

    #[test]
    fn nonzero_exit_truncates_output() {
        let long = "x".repeat(500);
        let err = interpret_output("W", &out(1, &long, "bad")).unwrap_err();
        match err {
            PluginError::ProcessExit {
                code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(code, 1);
                assert_eq!(stdout.len(), OUTPUT_EXCERPT_CHARS);
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let text = "天".repeat(300);
        assert_eq!(excerpt(&text).chars().count(), OUTPUT_EXCERPT_CHARS);
    }

    #[test]
    fn invocation_result_wire_format() {
        let ok = PluginInvocationResult::Success { result: json!("hi") };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "result": "hi"})
        );
        let failed = PluginInvocationResult::failure("boom");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"status": "error", "error": "boom"})
        );
        assert_eq!(ok.result_text().as_deref(), Some("hi"));
        assert!(failed.result_text().is_none());
    }
}
