//! Capability descriptions advertised to the model.
//!
//! Every plugin with invocation commands gets a text block bound to its own
//! placeholder, `{{VCP<Name>}}`, which prompt authors drop into the system
//! message to teach the model how to call it.

use crate::manifest::PluginManifest;

/// Placeholder key (without braces) for a plugin's description.
pub fn description_key(plugin_name: &str) -> String {
    format!("VCP{plugin_name}")
}

/// Full `{{VCP<Name>}}` token.
pub fn description_token(plugin_name: &str) -> String {
    format!("{{{{{}}}}}", description_key(plugin_name))
}

/// Build the description block, or `None` when no command has a description.
pub fn build_description(manifest: &PluginManifest) -> Option<String> {
    let blocks: Vec<String> = manifest
        .capabilities
        .invocation_commands
        .iter()
        .filter(|cmd| !cmd.description.trim().is_empty())
        .map(|cmd| {
            let mut block = format!(
                "- {} ({}) - command: {}:\n{}",
                manifest.display_name(),
                manifest.name,
                if cmd.command.is_empty() { "default" } else { cmd.command.as_str() },
                indent(&cmd.description, "    ")
            );
            if let Some(example) = cmd.example.as_deref().filter(|e| !e.trim().is_empty()) {
                block.push_str("\n  example:\n");
                block.push_str(&indent(example, "    "));
            }
            block
        })
        .collect();

    (!blocks.is_empty()).then(|| blocks.join("\n\n"))
}

fn indent(text: &str, prefix: &str) -> String {
    text.trim()
        .lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
