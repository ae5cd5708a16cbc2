//! Variable substitution for prompt text.
//!
//! Replacement is literal and happens in a fixed order:
//!
//! 1. placeholders declared by enabled static plugins (cached values)
//! 2. environment tokens: `{{Port}}` and `{{Var*}}` process variables
//! 3. capability descriptions: `{{VCPAllTools}}`, `{{VCP<Name>}}` and,
//!    when the sandbox is on, `{{VCPToolsAPI}}`
//! 4. dynamic tokens: `{{Date}}`, `{{Time}}`, `{{Today}}` and whatever the
//!    caller adds to the [`SubstitutionContext`]
//!
//! Unresolvable tokens become explicit markers rather than disappearing.
//! Detector rules run afterwards on system messages, super-detector rules
//! on every message.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, Local, Utc};
use regex::{Captures, Regex};
use vcp_platform::Environment;
use vcp_plugin::PluginRegistry;
use vcp_plugin::description::description_token;
use vcp_types::ChatMessage;
use vcp_types::config::{RewriteRule, SubstitutionConfig};

pub const ALL_TOOLS_TOKEN: &str = "{{VCPAllTools}}";
pub const TOOLS_API_TOKEN: &str = "{{VCPToolsAPI}}";

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(Var\w+)\}\}").expect("invalid regex"));

/// Per-request values for the dynamic tokens.
#[derive(Debug, Clone)]
pub struct SubstitutionContext {
    now: DateTime<FixedOffset>,
    tokens: Vec<(String, String)>,
}

impl SubstitutionContext {
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        Self {
            now,
            tokens: Vec::new(),
        }
    }

    /// Current time in the given UTC offset, or local time.
    pub fn now(utc_offset_minutes: Option<i32>) -> Self {
        let offset = utc_offset_minutes.and_then(|m| FixedOffset::east_opt(m * 60));
        let now = match offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().fixed_offset(),
        };
        Self::at(now)
    }

    /// Add a caller token; `key` is given without braces.
    pub fn token(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.push((format!("{{{{{}}}}}", key.into()), value.into()));
        self
    }
}

/// Expands placeholders in prompt text.
pub struct SubstitutionEngine {
    registry: Arc<PluginRegistry>,
    env: Arc<dyn Environment>,
    config: SubstitutionConfig,
    port: u16,
    tools_api: Option<String>,
}

impl SubstitutionEngine {
    pub fn new(
        registry: Arc<PluginRegistry>,
        env: Arc<dyn Environment>,
        config: SubstitutionConfig,
    ) -> Self {
        let port = registry.context().server_port;
        Self {
            registry,
            env,
            config,
            port,
            tools_api: None,
        }
    }

    /// Text bound to `{{VCPToolsAPI}}`.
    pub fn with_tools_api(mut self, guide: impl Into<String>) -> Self {
        self.tools_api = Some(guide.into());
        self
    }

    pub fn context(&self) -> SubstitutionContext {
        SubstitutionContext::now(self.config.utc_offset_minutes)
    }

    /// Expand every token in `text`.
    pub fn expand(&self, text: &str, ctx: &SubstitutionContext) -> String {
        if !text.contains("{{") {
            return text.to_owned();
        }
        let mut out = text.to_owned();

        for placeholder in self.registry.static_placeholders() {
            if out.contains(&placeholder) {
                out = out.replace(&placeholder, &self.registry.placeholder_value(&placeholder));
            }
        }

        out = out.replace("{{Port}}", &self.port.to_string());
        out = VAR_RE
            .replace_all(&out, |caps: &Captures| {
                let key = &caps[1];
                self.env
                    .get_var(key)
                    .unwrap_or_else(|| format!("[{key} not configured]"))
            })
            .into_owned();

        if out.contains(ALL_TOOLS_TOKEN) {
            let all = self
                .registry
                .descriptions()
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n\n");
            out = out.replace(ALL_TOOLS_TOKEN, &all);
        }
        for (name, description) in self.registry.descriptions() {
            let token = description_token(name);
            if out.contains(&token) {
                out = out.replace(&token, description);
            }
        }
        if let Some(guide) = &self.tools_api {
            out = out.replace(TOOLS_API_TOKEN, guide);
        }

        out = out
            .replace("{{Date}}", &ctx.now.format("%Y-%m-%d").to_string())
            .replace("{{Time}}", &ctx.now.format("%H:%M:%S").to_string())
            .replace("{{Today}}", &ctx.now.format("%A").to_string());
        for (token, value) in &ctx.tokens {
            out = out.replace(token, value);
        }
        out
    }

    /// Expand a whole conversation and apply the rewrite rules.
    pub fn expand_messages(
        &self,
        mut messages: Vec<ChatMessage>,
        ctx: &SubstitutionContext,
    ) -> Vec<ChatMessage> {
        for message in &mut messages {
            message.map_text(|t| self.expand(t, ctx));
            if message.is_system() {
                message.map_text(|t| rewrite(t, &self.config.detectors));
            }
            message.map_text(|t| rewrite(t, &self.config.super_detectors));
        }
        messages
    }
}

fn rewrite(text: &str, rules: &[RewriteRule]) -> String {
    rules
        .iter()
        .filter(|r| !r.from.is_empty())
        .fold(text.to_owned(), |acc, r| acc.replace(&r.from, &r.to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vcp_platform::{MapEnvironment, NativeProcessSpawner};
    use vcp_plugin::{PluginManifest, RegistryOptions, RuntimeContext};

    fn registry() -> Arc<PluginRegistry> {
        let manifests = vec![
            PluginManifest::from_json(
                r#"{"name": "Weather", "pluginType": "static", "entryPoint": "x",
                    "capabilities": {"systemPromptPlaceholders": [{"placeholder": "{{VCPWeatherInfo}}"}]}}"#,
            )
            .unwrap(),
            PluginManifest::from_json(
                r#"{"name": "Clock", "pluginType": "static", "entryPoint": "x",
                    "capabilities": {"systemPromptPlaceholders": [{"placeholder": "{{VCPClock}}"}]}}"#,
            )
            .unwrap(),
            PluginManifest::from_json(
                r#"{"name": "Echo", "pluginType": "synchronous", "entryPoint": "x",
                    "capabilities": {"invocationCommands": [{"command": "echo", "description": "Echoes."}]}}"#,
            )
            .unwrap(),
        ];
        let mut options = RegistryOptions::new(
            Arc::new(MapEnvironment::new()),
            Arc::new(NativeProcessSpawner),
        );
        options.context = RuntimeContext {
            project_base_path: "/p".into(),
            server_port: 6123,
        };
        let registry = PluginRegistry::from_manifests(manifests, options);
        registry.record_static(registry.get("Weather").unwrap(), &Ok("Sunny, 21C".into()));
        Arc::new(registry)
    }

    fn engine() -> SubstitutionEngine {
        let env = MapEnvironment::new().with("VarCity", "Lyon");
        SubstitutionEngine::new(registry(), Arc::new(env), SubstitutionConfig::default())
    }

    fn ctx() -> SubstitutionContext {
        let offset = FixedOffset::east_opt(3600).unwrap();
        SubstitutionContext::at(offset.with_ymd_and_hms(2025, 3, 14, 9, 5, 0).unwrap())
    }

    #[test]
    fn static_env_and_dynamic_tokens() {
        let out = engine().expand(
            "{{Date}} {{Time}} {{Today}} in {{VarCity}}: {{VCPWeatherInfo}} on {{Port}}",
            &ctx(),
        );
        assert_eq!(out, "2025-03-14 09:05:00 Friday in Lyon: Sunny, 21C on 6123");
    }

    #[test]
    fn unresolved_tokens_get_markers() {
        let out = engine().expand("{{VarMissing}} / {{VCPClock}} / {{Unknown}}", &ctx());
        assert_eq!(
            out,
            "[VarMissing not configured] / [Placeholder {{VCPClock}} not found] / {{Unknown}}"
        );
    }

    #[test]
    fn descriptions_and_tools_api() {
        let engine = engine().with_tools_api("use rhai");
        let out = engine.expand("{{VCPEcho}}|{{VCPAllTools}}|{{VCPToolsAPI}}", &ctx());
        let parts: Vec<_> = out.split('|').collect();
        assert!(parts[0].contains("Echoes."));
        assert_eq!(parts[0], parts[1]);
        assert_eq!(parts[2], "use rhai");
    }

    #[test]
    fn tools_api_left_alone_without_sandbox() {
        assert_eq!(engine().expand("{{VCPToolsAPI}}", &ctx()), "{{VCPToolsAPI}}");
    }

    #[test]
    fn caller_tokens() {
        let ctx = ctx().token("Model", "gpt-x");
        assert_eq!(engine().expand("on {{Model}}", &ctx), "on gpt-x");
    }

    #[test]
    fn detectors_apply_by_role() {
        let config = SubstitutionConfig {
            detectors: vec![RewriteRule {
                from: "You are a bot".into(),
                to: "You are Nova".into(),
            }],
            super_detectors: vec![RewriteRule {
                from: "……".into(),
                to: "…".into(),
            }],
            ..SubstitutionConfig::default()
        };
        let engine = SubstitutionEngine::new(registry(), Arc::new(MapEnvironment::new()), config);
        let out = engine.expand_messages(
            vec![
                ChatMessage::system("You are a bot…… {{VCPWeatherInfo}}"),
                ChatMessage::user("You are a bot……"),
            ],
            &ctx(),
        );
        assert_eq!(out[0].text(), "You are Nova… Sunny, 21C");
        assert_eq!(out[1].text(), "You are a bot…");
    }
}
