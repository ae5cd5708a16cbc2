//! End-to-end loops against real shell-script plugins.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use vcp_core::{Orchestrator, Sandbox, Termination};
use vcp_llm::{ChatRequest, ChatResponse, Provider, StreamChunk};
use vcp_platform::{MapEnvironment, NativeProcessSpawner};
use vcp_plugin::{PluginRegistry, RegistryOptions};
use vcp_types::ChatMessage;
use vcp_types::config::{OrchestrationConfig, SandboxConfig};

/// Replies from a fixed list and records every request.
struct Recorder {
    replies: Vec<String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ChatRequest>>,
}

impl Recorder {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn reply(&self, request: &ChatRequest) -> String {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        self.replies[n.min(self.replies.len() - 1)].clone()
    }
}

#[async_trait]
impl Provider for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn complete(&self, request: &ChatRequest) -> vcp_llm::Result<ChatResponse> {
        let mut response: ChatResponse =
            serde_json::from_value(json!({"id": "x", "model": "m", "choices": []}))?;
        response.set_content(self.reply(request));
        Ok(response)
    }

    async fn complete_stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> vcp_llm::Result<()> {
        let text = self.reply(request);
        let _ = tx.send(StreamChunk::TextDelta { text }).await;
        Ok(())
    }
}

fn echo_registry(root: &Path) -> Arc<PluginRegistry> {
    let dir = root.join("echo");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("plugin-manifest.json"),
        json!({"name": "Echo", "pluginType": "synchronous", "entryPoint": "sh echo-plugin"})
            .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.join("echo-plugin"),
        "cat > /dev/null\nprintf '%s' '{\"status\":\"success\",\"result\":\"hi\"}'\n",
    )
    .unwrap();

    let options = RegistryOptions::new(
        Arc::new(MapEnvironment::new()),
        Arc::new(NativeProcessSpawner),
    );
    Arc::new(PluginRegistry::load(root, options).unwrap())
}

#[tokio::test]
async fn echo_result_reaches_follow_up_call() {
    let root = tempfile::tempdir().unwrap();
    let provider = Recorder::new(&[
        "<<<[TOOL_REQUEST]>>>tool_name:⟪Echo⟫<<<[END_TOOL_REQUEST]>>>",
        "The tool said hi.",
    ]);
    let orchestrator = Orchestrator::new(
        provider.clone(),
        echo_registry(root.path()),
        OrchestrationConfig::default(),
    );

    let request = ChatRequest::new("m", vec![ChatMessage::user("say hi")]);
    let outcome = orchestrator.run(&request).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    let follow_up = &provider.seen.lock()[1];
    let appended = follow_up.messages.last().unwrap();
    assert_eq!(appended.role, "user");
    assert!(appended.text().contains("hi"));
    assert_eq!(appended.text(), "result of tool \"Echo\":\nhi");
    assert_eq!(outcome.termination, Termination::Completed);
    assert!(outcome.content.ends_with("The tool said hi."));
}

#[tokio::test]
async fn streaming_follow_up_sees_tool_result() {
    let root = tempfile::tempdir().unwrap();
    let provider = Recorder::new(&[
        "<<<[TOOL_REQUEST]>>>tool_name:「始」Echo「末」<<<[END_TOOL_REQUEST]>>>",
        "done",
    ]);
    let orchestrator = Orchestrator::new(
        provider.clone(),
        echo_registry(root.path()),
        OrchestrationConfig::default(),
    );

    let (tx, mut rx) = mpsc::channel(64);
    let request = ChatRequest::new("m", vec![ChatMessage::user("go")]);
    let outcome = orchestrator.run_stream(&request, tx).await.unwrap();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(outcome.rounds, 2);
    assert!(events.contains(&vcp_core::StreamEvent::Marker(vcp_core::Marker::ToolCallDetected)));
    let follow_up = &provider.seen.lock()[1];
    assert_eq!(
        follow_up.messages.last().unwrap().text(),
        "result of tool \"Echo\":\nhi"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scripts_can_call_plugins() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(&SandboxConfig::default(), Some(echo_registry(root.path())));
    assert_eq!(sandbox.script_functions(), vec!["Echo"]);

    let out = sandbox
        .execute(
            "let a = Echo(); let b = call_tool(\"Echo\", #{x: 1}); print(a + b); a",
            Duration::from_secs(10),
        )
        .await;
    assert!(out.success, "{out:?}");
    assert_eq!(out.stdout, "hihi\n");
    assert_eq!(out.return_value, Some(json!("hi")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_plugin_call_fails_the_script() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(&SandboxConfig::default(), Some(echo_registry(root.path())));

    let out = sandbox
        .execute("call_tool(\"Nope\")", Duration::from_secs(10))
        .await;
    assert!(!out.success);
    assert!(out.error.unwrap().to_string().contains("Nope"));
}

/// True while `pid` exists and is not a zombie.
#[cfg(target_os = "linux")]
fn is_running(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn script_timeout_kills_pending_plugin() {
    let root = tempfile::tempdir().unwrap();
    let pid_file = root.path().join("slow.pid");
    let dir = root.path().join("slow");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("plugin-manifest.json"),
        json!({"name": "Slow", "pluginType": "synchronous", "entryPoint": "sh slow-plugin",
               "communication": {"protocol": "stdio", "timeout": 20000}})
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.join("slow-plugin"),
        format!("echo $$ > {}\nexec sleep 8\n", pid_file.display()),
    )
    .unwrap();
    let options = RegistryOptions::new(
        Arc::new(MapEnvironment::new()),
        Arc::new(NativeProcessSpawner),
    );
    let registry = Arc::new(PluginRegistry::load(root.path(), options).unwrap());
    let sandbox = Sandbox::new(&SandboxConfig::default(), Some(registry));

    let started = std::time::Instant::now();
    let out = sandbox.execute("Slow()", Duration::from_secs(1)).await;
    assert!(!out.success);
    assert!(started.elapsed() < Duration::from_secs(4));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while is_running(pid.trim()) && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!is_running(pid.trim()), "plugin {pid} outlived the script");
}
