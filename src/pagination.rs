//! Answering "more output" interruptions while a command's output streams in.

use crate::transport::{Transport, TransportError};
use regex::{Regex, RegexBuilder};
use std::time::Duration;
use tracing::{debug, warn};

/// Built-in pagination markers and the keystrokes that continue them.
const DEFAULT_RULES: &[(&str, &str)] = &[
    (r"--More--( \(.*?\))?", " "),
    (r"--- MORE ---", " "),
    (r"Press any key to continue", "\n"),
    (r"\(q\)uit.*more", " "),
    (r"Continue\? \[y/n\]", "y\n"),
    (r"Next page\?", " "),
    (r"--\s*Press\s+SPACE\s+to\s+continue", " "),
    (r"\(Press q to quit\)", " "),
    (r"Type <space> for more", " "),
    (r"\[Press space to continue\]", " "),
    (r"Press SPACE to continue or Q to quit", " "),
    (r"More \(.*\)", " "),
];

/// Response used for custom patterns.
pub const DEFAULT_RESPONSE: &str = " ";

/// Only this many trailing characters of the buffer are scanned.
const SCAN_WINDOW: usize = 200;

const DEFAULT_RESPONSE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct PaginationRule {
    pattern: Regex,
    response: String,
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

#[derive(Debug, Clone)]
pub struct PaginationHandler {
    rules: Vec<PaginationRule>,
    enabled: bool,
    response_delay: Duration,
}

impl Default for PaginationHandler {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(pattern, response)| {
                compile(pattern).ok().map(|pattern| PaginationRule {
                    pattern,
                    response: (*response).to_string(),
                })
            })
            .collect();
        Self {
            rules,
            enabled: true,
            response_delay: DEFAULT_RESPONSE_DELAY,
        }
    }
}

impl PaginationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append custom markers, answered with [`DEFAULT_RESPONSE`]. Invalid patterns are
    /// skipped with a warning.
    pub fn with_custom_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match compile(pattern) {
                Ok(regex) => self.rules.push(PaginationRule {
                    pattern: regex,
                    response: DEFAULT_RESPONSE.to_string(),
                }),
                Err(err) => warn!(pattern, %err, "skipping invalid pagination pattern"),
            }
        }
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn response_delay(&self) -> Duration {
        self.response_delay
    }

    /// If the tail of `buffer` holds a pagination marker, send its keystroke, cut the
    /// marker out of `buffer` and return how many bytes were removed. Returns 0 when
    /// nothing matched or the handler is disabled.
    pub async fn maybe_respond(
        &self,
        buffer: &mut String,
        transport: &mut dyn Transport,
    ) -> Result<usize, TransportError> {
        if !self.enabled {
            return Ok(0);
        }
        let window_start = tail_start(buffer, SCAN_WINDOW);
        let window = &buffer[window_start..];
        let Some((rule, found)) = self
            .rules
            .iter()
            .find_map(|rule| rule.pattern.find(window).map(|m| (rule, m.range())))
        else {
            return Ok(0);
        };
        let range = window_start + found.start..window_start + found.end;

        debug!(
            marker = &buffer[range.clone()],
            response = ?rule.response,
            "answering pagination prompt"
        );
        transport.write(rule.response.as_bytes()).await?;
        buffer.replace_range(range.clone(), "");
        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }
        Ok(range.len())
    }

    /// Whether `line` is residue of a pagination prompt and should be dropped from output.
    pub fn is_artifact(&self, line: &str) -> bool {
        self.rules.iter().any(|rule| rule.pattern.is_match(line))
    }
}

/// Byte index where the last `chars` characters of `text` begin.
fn tail_start(text: &str, chars: usize) -> usize {
    if chars == 0 {
        return text.len();
    }
    text.char_indices()
        .rev()
        .nth(chars - 1)
        .map_or(0, |(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    fn handler() -> PaginationHandler {
        PaginationHandler::new().with_response_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_more_marker_answered_with_space() {
        let mut transport = ScriptedTransport::new();
        let mut buffer = format!("{}--More--", "x".repeat(500));
        let removed = handler()
            .maybe_respond(&mut buffer, &mut transport)
            .await
            .unwrap();
        assert_eq!(removed, "--More--".len());
        assert_eq!(buffer, "x".repeat(500));
        assert_eq!(transport.written(), b" ");
    }

    #[tokio::test]
    async fn test_marker_with_percentage() {
        let mut transport = ScriptedTransport::new();
        let mut buffer = "line\n --More-- (42%)".to_string();
        let removed = handler()
            .maybe_respond(&mut buffer, &mut transport)
            .await
            .unwrap();
        assert_eq!(removed, "--More-- (42%)".len());
        assert_eq!(buffer, "line\n ");
    }

    #[tokio::test]
    async fn test_rule_specific_responses() {
        let mut transport = ScriptedTransport::new();
        let mut buffer = "Continue? [Y/N]".to_string();
        handler()
            .maybe_respond(&mut buffer, &mut transport)
            .await
            .unwrap();
        assert_eq!(transport.written(), b"y\n");

        let mut transport = ScriptedTransport::new();
        let mut buffer = "Press any key to continue".to_string();
        handler()
            .maybe_respond(&mut buffer, &mut transport)
            .await
            .unwrap();
        assert_eq!(transport.written(), b"\n");
    }

    #[tokio::test]
    async fn test_marker_outside_window_ignored() {
        let mut transport = ScriptedTransport::new();
        let mut buffer = format!("--More--{}", "y".repeat(300));
        let removed = handler()
            .maybe_respond(&mut buffer, &mut transport)
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_handler() {
        let mut transport = ScriptedTransport::new();
        let mut buffer = "--More--".to_string();
        let removed = handler()
            .with_enabled(false)
            .maybe_respond(&mut buffer, &mut transport)
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(buffer, "--More--");
    }

    #[tokio::test]
    async fn test_custom_patterns() {
        let handler = handler().with_custom_patterns(&["<<next>>", "([unclosed"]);
        let mut transport = ScriptedTransport::new();
        let mut buffer = "data <<NEXT>>".to_string();
        let removed = handler
            .maybe_respond(&mut buffer, &mut transport)
            .await
            .unwrap();
        assert_eq!(removed, 8);
        assert_eq!(transport.written(), DEFAULT_RESPONSE.as_bytes());
    }

    #[test]
    fn test_is_artifact() {
        let handler = handler();
        assert!(handler.is_artifact("--More--"));
        assert!(handler.is_artifact(" -- Press SPACE to continue"));
        assert!(!handler.is_artifact("Model: SN2700"));
    }

    #[test]
    fn test_tail_start_counts_chars() {
        assert_eq!(tail_start("abcdef", 3), 3);
        assert_eq!(tail_start("ab", 10), 0);
        assert_eq!(tail_start("aé€", 2), 1);
    }
}
