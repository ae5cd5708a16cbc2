//! Text fed back to the model after tools or code ran.

use vcp_plugin::PluginInvocationResult;
use vcp_plugin::envelope::value_text;

use crate::sandbox::SandboxOutcome;

pub const RESULT_SEPARATOR: &str = "\n\n---\n\n";
pub const VCP_RESULT_START: &str = "<<<[VCP_RESULT]>>>";
pub const VCP_RESULT_END: &str = "<<<[END_VCP_RESULT]>>>";

pub fn tool_result(name: &str, result: &PluginInvocationResult) -> String {
    match result {
        PluginInvocationResult::Success { result } => {
            format!("result of tool \"{name}\":\n{}", value_text(result))
        }
        PluginInvocationResult::Failure { message } => {
            format!("error executing plugin {name}: {message}")
        }
    }
}

pub fn code_result(outcome: &SandboxOutcome) -> String {
    if let Some(error) = &outcome.error {
        let mut text = format!("code execution failed: {error}");
        if !outcome.stdout.is_empty() {
            text.push_str("\noutput before the failure:\n");
            text.push_str(outcome.stdout.trim_end());
        }
        return text;
    }

    let mut body = Vec::new();
    if !outcome.stdout.trim().is_empty() {
        body.push(outcome.stdout.trim_end().to_owned());
    }
    if !outcome.stderr.trim().is_empty() {
        body.push(format!("stderr:\n{}", outcome.stderr.trim_end()));
    }
    if let Some(value) = &outcome.return_value {
        body.push(format!("return value: {}", value_text(value)));
    }
    if body.is_empty() {
        "code execution finished with no output.".to_owned()
    } else {
        format!("code execution result:\n{}", body.join("\n"))
    }
}

/// Several results as one user message.
pub fn join_results(results: &[String]) -> String {
    results.join(RESULT_SEPARATOR)
}

/// A raw result shown to the client when tool output is visible.
pub fn visible_result(text: &str) -> String {
    format!("\n{VCP_RESULT_START}\n{text}\n{VCP_RESULT_END}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use serde_json::json;

    fn outcome() -> SandboxOutcome {
        SandboxOutcome {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            error: None,
            duration_ms: 3,
        }
    }

    #[test]
    fn tool_results() {
        let ok = PluginInvocationResult::Success { result: json!("hi") };
        assert_eq!(tool_result("Echo", &ok), "result of tool \"Echo\":\nhi");

        let obj = PluginInvocationResult::Success { result: json!({"t": 21}) };
        assert_eq!(tool_result("W", &obj), "result of tool \"W\":\n{\"t\":21}");

        let err = PluginInvocationResult::failure("boom");
        assert_eq!(tool_result("Echo", &err), "error executing plugin Echo: boom");
    }

    #[test]
    fn code_results() {
        assert_eq!(code_result(&outcome()), "code execution finished with no output.");

        let printed = SandboxOutcome {
            stdout: "2\n".into(),
            return_value: Some(json!(4)),
            ..outcome()
        };
        assert_eq!(code_result(&printed), "code execution result:\n2\nreturn value: 4");

        let failed = SandboxOutcome {
            success: false,
            stdout: "partial\n".into(),
            error: Some(SandboxError::Timeout { seconds: 1 }),
            ..outcome()
        };
        assert_eq!(
            code_result(&failed),
            "code execution failed: script timed out after 1s\noutput before the failure:\npartial"
        );
    }

    #[test]
    fn joining_and_visible_blocks() {
        assert_eq!(join_results(&["a".into(), "b".into()]), "a\n\n---\n\nb");
        assert_eq!(
            visible_result("x"),
            "\n<<<[VCP_RESULT]>>>\nx\n<<<[END_VCP_RESULT]>>>\n"
        );
    }
}
