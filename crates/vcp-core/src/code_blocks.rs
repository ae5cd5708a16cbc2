//! Fenced code blocks addressed to the sandbox.

use regex::Regex;

/// Finds ```` ```<label> ```` fenced blocks in model output.
#[derive(Debug, Clone)]
pub struct CodeBlockDetector {
    label: String,
    pattern: Regex,
}

impl CodeBlockDetector {
    pub fn new(label: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"(?s)```{}[ \t]*\r?\n(.*?)```",
            regex::escape(label)
        ))?;
        Ok(Self {
            label: label.to_owned(),
            pattern,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bodies of every complete block, in order. Blocks with only
    /// whitespace are skipped.
    pub fn find(&self, text: &str) -> Vec<String> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_owned())
            .filter(|body| !body.trim().is_empty())
            .collect()
    }

    pub fn contains(&self, text: &str) -> bool {
        !self.find(text).is_empty()
    }
}
