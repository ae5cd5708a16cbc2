//! Built-in message preprocessors.

use async_trait::async_trait;
use tracing::debug;
use vcp_types::{ChatMessage, ContentPart, MessageContent};

use crate::config::ResolvedPluginConfig;
use crate::error::PluginError;
use crate::traits::MessagePreprocessor;

/// Replaces inline `image_url` parts with a text note, for upstream
/// models without vision support.
///
/// The note comes from `ImageStripper_Placeholder` in the plugin config.
pub struct ImageStripper;

impl ImageStripper {
    pub const NAME: &'static str = "ImageStripper";
    pub const PLACEHOLDER_KEY: &'static str = "ImageStripper_Placeholder";
    const DEFAULT_NOTE: &'static str = "[image omitted]";
}

#[async_trait]
impl MessagePreprocessor for ImageStripper {
    async fn process_messages(
        &self,
        mut messages: Vec<ChatMessage>,
        config: &ResolvedPluginConfig,
    ) -> Result<Vec<ChatMessage>, PluginError> {
        let note = config
            .get_str(Self::PLACEHOLDER_KEY)
            .unwrap_or(Self::DEFAULT_NOTE);

        let mut stripped = 0usize;
        for message in &mut messages {
            if let MessageContent::Parts(parts) = &mut message.content {
                for part in parts.iter_mut().filter(|p| p.is_image()) {
                    *part = ContentPart::text(note);
                    stripped += 1;
                }
            }
        }
        if stripped > 0 {
            debug!(stripped, "replaced image parts");
        }
        Ok(messages)
    }
}
