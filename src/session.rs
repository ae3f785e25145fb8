//! The session protocol state machine.
//!
//! [`SessionReader`] owns the accumulation buffer between the transport and the
//! executor. Each [`read_until`](SessionReader::read_until) moves through
//! `Idle → Reading → (PaginationDetected → Reading) → Satisfied | TimedOut`.

use crate::normalize::{StreamNormalizer, strip_echo};
use crate::pagination::PaginationHandler;
use crate::prompt::{PromptDetector, same_host};
use crate::transport::{Transport, TransportError};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

/// What a `WAIT` is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// The detected prompt, or the configured fallback symbol.
    Prompt,
    /// Literal text anywhere in the output.
    Text(String),
}

impl Expectation {
    /// `PROMPT` (any case) is the prompt sentinel; anything else is literal text.
    pub fn from_argument(argument: &str) -> Self {
        if argument.eq_ignore_ascii_case("PROMPT") {
            Expectation::Prompt
        } else {
            Expectation::Text(argument.to_string())
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Prompt => f.write_str("prompt"),
            Expectation::Text(text) => write!(f, "'{text}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    Reading,
    PaginationDetected,
    Satisfied,
    TimedOut,
}

/// The result of one [`SessionReader::read_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub satisfied: bool,
    /// Output with echo, trailing prompt, pagination residue and blank lines removed.
    pub output: String,
    /// Normalized text exactly as consumed from the buffer.
    pub raw: String,
}

/// Polling cadence while waiting for output.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub busy_sleep: Duration,
    pub idle_sleep: Duration,
    /// Consecutive empty polls before switching to `idle_sleep`.
    pub idle_after: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            busy_sleep: Duration::from_millis(10),
            idle_sleep: Duration::from_millis(100),
            idle_after: 20,
        }
    }
}

pub struct SessionReader {
    detector: PromptDetector,
    pagination: PaginationHandler,
    decoder: StreamNormalizer,
    poll: PollSettings,
    buffer: String,
    prompt_symbol: String,
    detected_prompt: Option<String>,
    last_command: Option<String>,
    state: ReadState,
}

impl SessionReader {
    /// `prompt_symbol` is the fallback used until a prompt has been detected.
    pub fn new(prompt_symbol: impl Into<String>) -> Self {
        Self {
            detector: PromptDetector::new(),
            pagination: PaginationHandler::new(),
            decoder: StreamNormalizer::new(),
            poll: PollSettings::default(),
            buffer: String::new(),
            prompt_symbol: prompt_symbol.into(),
            detected_prompt: None,
            last_command: None,
            state: ReadState::Idle,
        }
    }

    pub fn with_pagination(mut self, pagination: PaginationHandler) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_detector(mut self, detector: PromptDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn detected_prompt(&self) -> Option<&str> {
        self.detected_prompt.as_deref()
    }

    /// The prompt `WAIT PROMPT` currently looks for.
    pub fn active_prompt(&self) -> &str {
        self.detected_prompt.as_deref().unwrap_or(&self.prompt_symbol)
    }

    /// Text received but not yet consumed by a read.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Write `command` followed by `terminator`.
    ///
    /// Unconsumed text belongs to the previous exchange and is discarded.
    pub async fn send_line(
        &mut self,
        transport: &mut dyn Transport,
        command: &str,
        terminator: &str,
    ) -> Result<(), TransportError> {
        if !self.buffer.is_empty() {
            trace!(discarded = self.buffer.len(), "dropping stale output before send");
            self.buffer.clear();
        }
        let mut data = Vec::with_capacity(command.len() + terminator.len());
        data.extend_from_slice(command.as_bytes());
        data.extend_from_slice(terminator.as_bytes());
        transport.write(&data).await?;
        self.last_command = Some(command.to_string());
        Ok(())
    }

    /// Write bytes without touching the buffer or the echo state.
    pub async fn write_raw(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), TransportError> {
        transport.write(data).await
    }

    /// Read everything that arrives within `window` and return it.
    ///
    /// The text also stays buffered for the next [`read_until`](Self::read_until).
    pub async fn collect_for(
        &mut self,
        transport: &mut dyn Transport,
        window: Duration,
    ) -> Result<String, TransportError> {
        let deadline = Instant::now() + window;
        let mut collected = String::new();
        loop {
            let chunk = transport.read_nonblocking()?;
            if !chunk.is_empty() {
                collected.push_str(&self.decoder.push(&chunk));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if chunk.is_empty() {
                sleep(self.poll.busy_sleep.min(deadline - now)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
        collected.push_str(&self.decoder.flush());
        self.buffer.push_str(&collected);
        Ok(collected)
    }

    /// Run the prompt detector over the buffered text, remembering a hit.
    pub fn detect_prompt(&mut self) -> Option<&str> {
        let text = std::mem::take(&mut self.buffer);
        self.observe(&text, true);
        self.buffer = text;
        self.detected_prompt.as_deref()
    }

    /// Update the detected prompt from `text`.
    ///
    /// Until a prompt is known any command prompt is accepted, plus the `hostname:`
    /// shape when `allow_label` is set. After that only a command prompt of the same
    /// host may replace it.
    fn observe(&mut self, text: &str, allow_label: bool) {
        let candidate = match self.detected_prompt.as_deref() {
            None if allow_label => self.detector.detect(text),
            None => self.detector.detect_command_prompt(text),
            Some(known) => self
                .detector
                .detect_command_prompt(text)
                .filter(|candidate| same_host(known, candidate)),
        };
        if let Some(prompt) = candidate {
            self.set_detected(prompt);
        }
    }

    /// Read until `expected` shows up or `timeout` elapses.
    ///
    /// Output following the match stays buffered. On timeout the partial buffer is
    /// returned with `satisfied == false` and the buffer is cleared. Only transport
    /// failures are errors.
    pub async fn read_until(
        &mut self,
        transport: &mut dyn Transport,
        expected: &Expectation,
        timeout: Duration,
    ) -> Result<ReadOutcome, TransportError> {
        self.state = ReadState::Reading;
        debug!(%expected, ?timeout, "waiting");
        let deadline = Instant::now() + timeout;
        let mut empty_polls = 0u32;
        let mut check = true;

        loop {
            if check {
                if let Some(end) = self.satisfied_at(expected, transport) {
                    return Ok(self.finish(end, expected, true));
                }
                check = false;
            }

            let now = Instant::now();
            if now >= deadline {
                let tail = self.decoder.flush();
                if !tail.is_empty() {
                    self.buffer.push_str(&tail);
                    if let Some(end) = self.satisfied_at(expected, transport) {
                        return Ok(self.finish(end, expected, true));
                    }
                }
                let end = self.buffer.len();
                return Ok(self.finish(end, expected, false));
            }

            let chunk = transport.read_nonblocking()?;
            if chunk.is_empty() {
                empty_polls += 1;
                let pause = if empty_polls > self.poll.idle_after {
                    self.poll.idle_sleep
                } else {
                    self.poll.busy_sleep
                };
                sleep(pause.min(deadline - now)).await;
                continue;
            }
            empty_polls = 0;
            self.state = ReadState::Reading;

            let text = self.decoder.push(&chunk);
            trace!(bytes = chunk.len(), "received");
            self.buffer.push_str(&text);

            if self.pagination.is_enabled() {
                let removed = self
                    .pagination
                    .maybe_respond(&mut self.buffer, transport)
                    .await?;
                if removed > 0 {
                    self.state = ReadState::PaginationDetected;
                    continue;
                }
            }
            check = true;
        }
    }

    /// Byte offset just past the satisfying match, if the buffer satisfies `expected`.
    fn satisfied_at(
        &mut self,
        expected: &Expectation,
        transport: &mut dyn Transport,
    ) -> Option<usize> {
        match expected {
            Expectation::Text(text) => self.buffer.find(text.as_str()).map(|i| i + text.len()),
            Expectation::Prompt => {
                let body = self.buffer.trim_end_matches('\n');
                let last_line = body.rsplit('\n').next().unwrap_or(body);
                let prompt = self.prompt_on(last_line)?;
                // More output on the way means the prompt-like line was mid-stream.
                if transport.bytes_available() {
                    return None;
                }
                self.set_detected(prompt);
                Some(self.buffer.len())
            }
        }
    }

    /// The prompt `line` ends with, if it counts as the end of a `WAIT PROMPT`.
    ///
    /// A known prompt must appear at the end of the line, or be replaced by a
    /// command prompt of the same host (entering a configuration mode). Without one,
    /// the command-prompt patterns and then the fallback symbol are tried.
    fn prompt_on(&self, line: &str) -> Option<String> {
        let line_end = line.trim_end();
        if let Some(known) = self.detected_prompt.as_deref() {
            let known_trimmed = known.trim();
            if !known_trimmed.is_empty() && line_end.ends_with(known_trimmed) {
                return Some(known.to_string());
            }
            return self
                .detector
                .match_line(line)
                .filter(|candidate| same_host(known, candidate));
        }
        if let Some(prompt) = self.detector.match_line(line) {
            return Some(prompt);
        }
        let symbol = self.prompt_symbol.trim();
        if symbol.is_empty() || !line_end.ends_with(symbol) {
            return None;
        }
        Some(line.trim_start().to_string())
    }

    fn set_detected(&mut self, prompt: String) {
        if self.detected_prompt.as_deref() != Some(prompt.as_str()) {
            debug!(prompt = %prompt, "prompt detected");
            self.detected_prompt = Some(prompt);
        }
    }

    fn finish(&mut self, end: usize, expected: &Expectation, satisfied: bool) -> ReadOutcome {
        let raw: String = self.buffer.drain(..end).collect();
        if satisfied {
            self.state = ReadState::Satisfied;
        } else {
            self.state = ReadState::TimedOut;
            self.buffer.clear();
            warn!(%expected, received = raw.len(), "timed out");
        }
        if satisfied && matches!(expected, Expectation::Text(_)) {
            self.observe(&raw, false);
        }
        let command = self.last_command.take();
        let strip_prompt = satisfied && *expected == Expectation::Prompt;
        let output = self.clean(&raw, command.as_deref(), strip_prompt);
        ReadOutcome {
            satisfied,
            output,
            raw,
        }
    }

    fn clean(&self, raw: &str, command: Option<&str>, strip_prompt: bool) -> String {
        let text = match command {
            Some(command) => strip_echo(raw, command),
            None => raw,
        };
        let mut lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| !self.pagination.is_artifact(line))
            .collect();
        if strip_prompt {
            lines.pop();
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    fn reader() -> SessionReader {
        SessionReader::new(">")
            .with_pagination(PaginationHandler::new().with_response_delay(Duration::ZERO))
    }

    #[test]
    fn test_expectation_from_argument() {
        assert_eq!(Expectation::from_argument("PROMPT"), Expectation::Prompt);
        assert_eq!(Expectation::from_argument("prompt"), Expectation::Prompt);
        assert_eq!(
            Expectation::from_argument("login:"),
            Expectation::Text("login:".into())
        );
    }

    #[tokio::test]
    async fn test_prompt_wait_cleans_output() {
        let mut device = ScriptedTransport::new()
            .echoing()
            .on_line("show version", "Model: SN2700\r\nswitch# ");
        let mut reader = reader();
        reader
            .send_line(&mut device, "show version", "\n")
            .await
            .unwrap();
        let outcome = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(outcome.output, "Model: SN2700");
        assert_eq!(reader.detected_prompt(), Some("switch# "));
        assert_eq!(reader.state(), ReadState::Satisfied);
    }

    #[tokio::test]
    async fn test_text_wait_keeps_remainder() {
        let mut device = ScriptedTransport::new().with_banner("boot ok\nswitch login: extra");
        let mut reader = reader();
        let outcome = reader
            .read_until(
                &mut device,
                &Expectation::Text("login:".into()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(outcome.raw, "boot ok\nswitch login:");
        assert_eq!(reader.buffered(), " extra");
    }

    #[tokio::test]
    async fn test_timeout_returns_partial() {
        let mut device = ScriptedTransport::new().with_banner("partial data");
        let mut reader = reader();
        let outcome = reader
            .read_until(
                &mut device,
                &Expectation::Text("XYZ".into()),
                Duration::from_millis(100),
            )
            .await
            .unwrap();
        assert!(!outcome.satisfied);
        assert_eq!(outcome.raw, "partial data");
        assert_eq!(outcome.output, "partial data");
        assert_eq!(reader.buffered(), "");
        assert_eq!(reader.state(), ReadState::TimedOut);
    }

    #[tokio::test]
    async fn test_fallback_symbol_used_without_detection() {
        let mut device = ScriptedTransport::new().with_banner("ready\n[admin]% ");
        let mut reader = SessionReader::new("%");
        let outcome = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(outcome.output, "ready");
        assert_eq!(reader.detected_prompt(), Some("[admin]% "));
    }

    #[tokio::test]
    async fn test_pagination_mid_stream() {
        let mut device = ScriptedTransport::new()
            .on_line("show run", "line1\nline2\n--More--")
            .on_keys(" ", "\r        \rline3\nswitch# ");
        let mut reader = reader();
        reader.send_line(&mut device, "show run", "\n").await.unwrap();
        let outcome = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(outcome.output, "line1\nline2\nline3");
        assert!(!outcome.raw.contains("--More--"));
        assert_eq!(device.written(), b"show run\n ");
    }

    #[tokio::test]
    async fn test_send_discards_stale_output() {
        let mut device = ScriptedTransport::new().with_banner("old prompt# ");
        let mut reader = reader();
        reader
            .collect_for(&mut device, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(reader.buffered(), "old prompt# ");
        reader.send_line(&mut device, "next", "\n").await.unwrap();
        assert_eq!(reader.buffered(), "");
    }

    #[tokio::test]
    async fn test_collect_and_detect() {
        let mut device = ScriptedTransport::new().with_banner("Welcome\nleaf01# ");
        let mut reader = reader();
        let text = reader
            .collect_for(&mut device, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(text, "Welcome\nleaf01# ");
        assert_eq!(reader.detect_prompt(), Some("leaf01# "));
        assert_eq!(reader.active_prompt(), "leaf01# ");
    }

    /// Delivers one queued chunk per poll; an empty chunk is a quiet poll.
    struct Bursts(VecDeque<&'static [u8]>);

    #[async_trait(?Send)]
    impl Transport for Bursts {
        async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError> {
            Ok(self.0.pop_front().unwrap_or_default().to_vec())
        }

        fn bytes_available(&mut self) -> bool {
            self.0.front().is_some_and(|chunk| !chunk.is_empty())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_label_line_at_burst_boundary_is_not_a_prompt() {
        let mut device = Bursts(VecDeque::from([
            &b"Model: SN2700\r\nSerial Number:"[..],
            &b""[..],
            &b""[..],
            &b""[..],
            &b" MT1234\r\nswitch# "[..],
        ]));
        let mut reader = reader();
        let outcome = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(outcome.output, "Model: SN2700\nSerial Number: MT1234");
        assert_eq!(reader.detected_prompt(), Some("switch# "));
    }

    #[tokio::test]
    async fn test_known_prompt_not_replaced_by_other_prompt_shapes() {
        let mut device = Bursts(VecDeque::from([
            &b"switch# "[..],
            &b""[..],
            &b"Load average >"[..],
            &b""[..],
            &b""[..],
            &b"\r\nlow\r\nswitch# "[..],
        ]));
        let mut reader = reader();
        let first = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(first.satisfied);
        assert_eq!(reader.detected_prompt(), Some("switch# "));

        let outcome = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(outcome.output, "Load average >\nlow");
        assert_eq!(reader.detected_prompt(), Some("switch# "));
    }

    #[tokio::test]
    async fn test_config_mode_prompt_of_same_host_accepted() {
        let mut device = ScriptedTransport::new()
            .with_banner("switch# ")
            .on_line("configure terminal", "\r\nswitch(config)# ");
        let mut reader = reader();
        reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        reader
            .send_line(&mut device, "configure terminal", "\n")
            .await
            .unwrap();
        let outcome = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(reader.detected_prompt(), Some("switch(config)# "));
    }

    #[tokio::test]
    async fn test_text_wait_refreshes_prompt() {
        let mut device = ScriptedTransport::new().with_banner("leaf01# \r\nready");
        let mut reader = reader();
        let outcome = reader
            .read_until(
                &mut device,
                &Expectation::Text("ready".into()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(outcome.satisfied);
        assert_eq!(reader.detected_prompt(), Some("leaf01# "));

        let mut device = ScriptedTransport::new().with_banner("Chassis:\r\nready");
        let mut fresh = super::SessionReader::new(">");
        fresh
            .read_until(
                &mut device,
                &Expectation::Text("ready".into()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(fresh.detected_prompt(), None);
    }

    /// Never goes quiet, like a console streaming boot logs.
    struct Chatty;

    #[async_trait(?Send)]
    impl Transport for Chatty {
        async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError> {
            Ok(b"log line\n".to_vec())
        }

        fn bytes_available(&mut self) -> bool {
            true
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_collect_for_stops_on_a_chatty_console() {
        let mut reader = reader();
        let collected = tokio::time::timeout(
            Duration::from_secs(2),
            reader.collect_for(&mut Chatty, Duration::from_millis(50)),
        )
        .await
        .expect("collect_for ignored its window")
        .unwrap();
        assert!(collected.starts_with("log line\n"));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mut device = ScriptedTransport::new();
        device.close().await.unwrap();
        let mut reader = reader();
        let result = reader
            .read_until(&mut device, &Expectation::Prompt, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
