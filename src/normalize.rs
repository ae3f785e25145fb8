//! Turning raw console bytes into matchable text.

use regex::Regex;
use std::sync::OnceLock;

/// CSI, OSC, charset selection and two-byte escapes, in that order.
const ESCAPE_PATTERN: &str =
    r"\x1B\[[0-?]*[ -/]*[@-~]|\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)|\x1B[()][A-Za-z0-9]|\x1B[0-?@-Z\\-_]";

/// Escape sequences longer than this are never held back by [`StreamNormalizer`].
const MAX_ESCAPE_LEN: usize = 256;

fn escape_regex() -> Option<&'static Regex> {
    static ESCAPES: OnceLock<Option<Regex>> = OnceLock::new();
    ESCAPES.get_or_init(|| Regex::new(ESCAPE_PATTERN).ok()).as_ref()
}

/// Strip terminal control sequences and normalize line endings.
///
/// Invalid UTF-8 is replaced with U+FFFD. `\r\n` and lone `\r` become `\n`; C0
/// control characters other than newline and tab are dropped. The function is
/// idempotent.
pub fn normalize(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = match escape_regex() {
        Some(re) => re.replace_all(&text, ""),
        None => text,
    };
    let text: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect();
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Incremental [`normalize`] that never splits a CRLF pair, an escape sequence or
/// a UTF-8 character across chunk boundaries.
#[derive(Debug, Default)]
pub struct StreamNormalizer {
    carry: Vec<u8>,
}

impl StreamNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize everything in `chunk` that is complete, holding back an unfinished tail.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.carry.extend_from_slice(chunk);
        let ready = self.carry.len() - incomplete_tail(&self.carry);
        let bytes: Vec<u8> = self.carry.drain(..ready).collect();
        normalize(&bytes)
    }

    /// Normalize whatever is still held back.
    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        normalize(&rest)
    }

    /// Number of bytes held back.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn incomplete_tail(bytes: &[u8]) -> usize {
    if let Some(esc) = bytes.iter().rposition(|&b| b == 0x1B) {
        let tail = &bytes[esc..];
        if tail.len() <= MAX_ESCAPE_LEN && !escape_complete(tail) {
            return tail.len();
        }
    }
    if bytes.last() == Some(&b'\r') {
        return 1;
    }
    truncated_utf8(bytes)
}

fn escape_complete(seq: &[u8]) -> bool {
    match seq.get(1) {
        None => false,
        Some(b'[') => seq[2..].iter().any(|b| (0x40..=0x7E).contains(b)),
        Some(b']') => {
            seq.contains(&0x07) || seq[2..].windows(2).any(|w| w == [0x1B, b'\\'])
        }
        Some(b'(') | Some(b')') => seq.len() >= 3,
        Some(_) => true,
    }
}

fn truncated_utf8(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match b {
            0xF0.. => 4,
            0xE0.. => 3,
            0xC0.. => 2,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

/// Drop the first non-empty line of `output` when it echoes `command`.
pub fn strip_echo<'a>(output: &'a str, command: &str) -> &'a str {
    let command = command.trim();
    if command.is_empty() {
        return output;
    }
    let mut offset = 0;
    for line in output.split_inclusive('\n') {
        if line.trim().is_empty() {
            offset += line.len();
            continue;
        }
        if line.contains(command) {
            return &output[offset + line.len()..];
        }
        break;
    }
    output
}
