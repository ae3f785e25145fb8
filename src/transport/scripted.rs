use super::{Transport, TransportError};
use async_trait::async_trait;

#[derive(Debug)]
enum Trigger {
    /// A complete line written by the host (terminator excluded).
    Line(String),
    /// A single write whose bytes equal these exactly.
    Keys(Vec<u8>),
}

#[derive(Debug)]
struct Rule {
    trigger: Trigger,
    response: Vec<u8>,
    repeat: bool,
    fired: bool,
}

impl Rule {
    fn armed(&self) -> bool {
        self.repeat || !self.fired
    }
}

/// An in-memory device that answers written lines with canned output.
///
/// Rules are checked in the order they were added; a one-shot rule fires at most
/// once, so the same command can get different answers over a session.
///
/// ```
/// use seriallink::ScriptedTransport;
///
/// let device = ScriptedTransport::new()
///     .with_banner("switch login: ")
///     .on_line("admin", "Password: ")
///     .always_on_line("", "\nswitch# ");
/// # let _ = device;
/// ```
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    outbox: Vec<u8>,
    rules: Vec<Rule>,
    written: Vec<u8>,
    partial_line: Vec<u8>,
    last_was_cr: bool,
    echo: bool,
    fail_writes: bool,
    closed: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output available before anything is written.
    pub fn with_banner(mut self, text: impl AsRef<[u8]>) -> Self {
        self.outbox.extend_from_slice(text.as_ref());
        self
    }

    /// Answer the next occurrence of `line` with `response`, once.
    pub fn on_line(self, line: impl Into<String>, response: impl AsRef<[u8]>) -> Self {
        self.rule(Trigger::Line(line.into()), response, false)
    }

    /// Answer every occurrence of `line` with `response`.
    pub fn always_on_line(self, line: impl Into<String>, response: impl AsRef<[u8]>) -> Self {
        self.rule(Trigger::Line(line.into()), response, true)
    }

    /// Answer a raw keystroke write (such as a pagination space) with `response`, once.
    pub fn on_keys(self, keys: impl AsRef<[u8]>, response: impl AsRef<[u8]>) -> Self {
        self.rule(Trigger::Keys(keys.as_ref().to_vec()), response, false)
    }

    /// Echo every write back, like a terminal with local echo.
    pub fn echoing(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Make every write fail with an I/O error.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Queue output as if the device printed it unprompted.
    pub fn push_output(&mut self, bytes: impl AsRef<[u8]>) {
        self.outbox.extend_from_slice(bytes.as_ref());
    }

    /// Every byte written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// The complete lines written so far, terminators removed.
    pub fn written_lines(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.written);
        let mut lines: Vec<String> = text
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        // The text after the final terminator is not a complete line.
        lines.pop();
        lines
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn rule(mut self, trigger: Trigger, response: impl AsRef<[u8]>, repeat: bool) -> Self {
        self.rules.push(Rule {
            trigger,
            response: response.as_ref().to_vec(),
            repeat,
            fired: false,
        });
        self
    }

    fn fire(&mut self, matches: impl Fn(&Trigger) -> bool) -> bool {
        let Some(rule) = self
            .rules
            .iter_mut()
            .find(|rule| rule.armed() && matches(&rule.trigger))
        else {
            return false;
        };
        rule.fired = true;
        self.outbox.extend_from_slice(&rule.response);
        true
    }

    fn complete_line(&mut self) {
        let line = String::from_utf8_lossy(&std::mem::take(&mut self.partial_line)).into_owned();
        self.fire(|trigger| matches!(trigger, Trigger::Line(expected) if *expected == line));
    }
}

#[async_trait(?Send)]
impl Transport for ScriptedTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.fail_writes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )
            .into());
        }
        self.written.extend_from_slice(data);
        if self.echo {
            self.outbox.extend_from_slice(data);
        }
        if self.fire(|trigger| matches!(trigger, Trigger::Keys(keys) if keys.as_slice() == data)) {
            return Ok(());
        }
        for &byte in data {
            match byte {
                b'\n' if self.last_was_cr => {}
                b'\n' | b'\r' => self.complete_line(),
                _ => self.partial_line.push(byte),
            }
            self.last_was_cr = byte == b'\r';
        }
        Ok(())
    }

    fn read_nonblocking(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(std::mem::take(&mut self.outbox))
    }

    fn bytes_available(&mut self) -> bool {
        !self.closed && !self.outbox.is_empty()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}
