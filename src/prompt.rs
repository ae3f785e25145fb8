//! Heuristic detection of a device's command prompt.

use regex::Regex;
use std::sync::OnceLock;

/// Prompt shapes, most specific first.
const PROMPT_PATTERNS: &[&str] = &[
    // host(config)#, user@host(config-if)>
    r"[\w\-.@]+\([^)]+\)[>#]\s*$",
    // user@host:~/path$
    r"[\w\-.@]+[:#]~?[\w/]*[$>#]\s*$",
    // host#, host>
    r"[\w\-.]+[>#]\s*$",
    r"[>#]\s*$",
    // hostname:
    r"[\w\-.]+:\s*$",
];

/// Patterns from this index on also match ordinary `Label:` output lines, so they are
/// only trusted while no prompt is known and never end a wait.
const WEAK_FROM: usize = 4;

/// Lines mentioning any of these are banners or login prompts, never command prompts.
const EXCLUDED_WORDS: &[&str] = &["login", "password", "username", "welcome", "last login"];

const DEFAULT_SCAN_LINES: usize = 15;

fn default_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PROMPT_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Infers the prompt from the tail of the session output.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    scan_lines: usize,
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self {
            scan_lines: DEFAULT_SCAN_LINES,
        }
    }
}

impl PromptDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan_lines(mut self, lines: usize) -> Self {
        self.scan_lines = lines.max(1);
        self
    }

    /// Detect the prompt in the last lines of `output`.
    ///
    /// Pattern priority outranks line position: the first pattern matching any
    /// candidate line wins, and among its matches the most recent line wins.
    pub fn detect(&self, output: &str) -> Option<String> {
        self.detect_with(output, default_patterns())
    }

    /// Like [`detect`](Self::detect), but ignoring the `hostname:` shape.
    pub fn detect_command_prompt(&self, output: &str) -> Option<String> {
        self.detect_with(output, strong_patterns())
    }

    fn detect_with(&self, output: &str, patterns: &[Regex]) -> Option<String> {
        let lines: Vec<&str> = output
            .lines()
            .map(str::trim_start)
            .filter(|line| !line.trim().is_empty())
            .collect();
        let start = lines.len().saturating_sub(self.scan_lines);
        let candidates: Vec<&str> = lines[start..]
            .iter()
            .copied()
            .filter(|line| !is_excluded(line))
            .collect();

        patterns.iter().find_map(|pattern| {
            candidates
                .iter()
                .rev()
                .find_map(|line| pattern.find(line).map(|m| m.as_str().to_string()))
        })
    }

    /// Apply the command-prompt patterns to a single line.
    ///
    /// The `hostname:` shape is skipped: a line such as `Serial Number:` must never
    /// pass for a prompt.
    pub fn match_line(&self, line: &str) -> Option<String> {
        let line = line.trim_start();
        if line.trim().is_empty() || is_excluded(line) {
            return None;
        }
        strong_patterns()
            .iter()
            .find_map(|pattern| pattern.find(line).map(|m| m.as_str().to_string()))
    }
}

fn strong_patterns() -> &'static [Regex] {
    let patterns = default_patterns();
    &patterns[..WEAK_FROM.min(patterns.len())]
}

/// Whether `candidate` is a prompt of the same host as `known`, such as
/// `switch(config)# ` after `switch# `. Prompts without a leading host name only
/// match themselves.
pub fn same_host(known: &str, candidate: &str) -> bool {
    let known = known.trim();
    let host_len = known
        .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@')))
        .unwrap_or(known.len());
    let host = &known[..host_len];
    if host.is_empty() {
        return candidate.trim() == known;
    }
    let candidate = candidate.trim_start();
    candidate.starts_with(host)
        && candidate[host.len()..]
            .chars()
            .next()
            .is_some_and(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@')))
}

fn is_excluded(line: &str) -> bool {
    let lower = line.to_lowercase();
    EXCLUDED_WORDS.iter().any(|word| lower.contains(word))
}
