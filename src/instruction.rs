//! Parsed playbook instructions.

use crate::session::Expectation;
use std::time::Duration;

/// The keyword of a playbook line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    Send,
    Wait,
    Pause,
    IfContains,
    IfNotContains,
    IfContainsCI,
    IfNotContainsCI,
    IfRegex,
    IfNotRegex,
    ElifContains,
    ElifNotContains,
    ElifContainsCI,
    ElifNotContainsCI,
    ElifRegex,
    ElifNotRegex,
    Else,
    EndIf,
    Success,
    Comment,
}

impl InstructionKind {
    /// The script keyword for this kind.
    pub const fn keyword(self) -> &'static str {
        match self {
            InstructionKind::Send => "SEND",
            InstructionKind::Wait => "WAIT",
            InstructionKind::Pause => "PAUSE",
            InstructionKind::IfContains => "IF_CONTAINS",
            InstructionKind::IfNotContains => "IF_NOT_CONTAINS",
            InstructionKind::IfContainsCI => "IF_CONTAINS_I",
            InstructionKind::IfNotContainsCI => "IF_NOT_CONTAINS_I",
            InstructionKind::IfRegex => "IF_REGEX",
            InstructionKind::IfNotRegex => "IF_NOT_REGEX",
            InstructionKind::ElifContains => "ELIF_CONTAINS",
            InstructionKind::ElifNotContains => "ELIF_NOT_CONTAINS",
            InstructionKind::ElifContainsCI => "ELIF_CONTAINS_I",
            InstructionKind::ElifNotContainsCI => "ELIF_NOT_CONTAINS_I",
            InstructionKind::ElifRegex => "ELIF_REGEX",
            InstructionKind::ElifNotRegex => "ELIF_NOT_REGEX",
            InstructionKind::Else => "ELSE",
            InstructionKind::EndIf => "ENDIF",
            InstructionKind::Success => "SUCCESS",
            InstructionKind::Comment => "#",
        }
    }

    /// Opens a conditional group.
    pub fn is_if(self) -> bool {
        matches!(
            self,
            InstructionKind::IfContains
                | InstructionKind::IfNotContains
                | InstructionKind::IfContainsCI
                | InstructionKind::IfNotContainsCI
                | InstructionKind::IfRegex
                | InstructionKind::IfNotRegex
        )
    }

    pub fn is_elif(self) -> bool {
        matches!(
            self,
            InstructionKind::ElifContains
                | InstructionKind::ElifNotContains
                | InstructionKind::ElifContainsCI
                | InstructionKind::ElifNotContainsCI
                | InstructionKind::ElifRegex
                | InstructionKind::ElifNotRegex
        )
    }

    /// Any member of a conditional group: `If*`, `Elif*`, `Else` or `EndIf`.
    pub fn is_control_flow(self) -> bool {
        self.is_if()
            || self.is_elif()
            || matches!(self, InstructionKind::Else | InstructionKind::EndIf)
    }

    /// Whether the instruction counts as a step. Comments never do.
    pub fn is_executable(self) -> bool {
        self != InstructionKind::Comment
    }

    pub fn requires_argument(self) -> bool {
        matches!(self, InstructionKind::Wait | InstructionKind::Pause)
            || self.is_if()
            || self.is_elif()
    }
}

/// One parsed playbook line.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub argument: String,
    /// 1-based line number in the script.
    pub source_line: usize,
    /// Per-step override of the wait timeout (`WAIT "text" 5s`).
    pub timeout: Option<Duration>,
}

impl Instruction {
    pub fn new(kind: InstructionKind, argument: impl Into<String>, source_line: usize) -> Self {
        Self {
            kind,
            argument: argument.into(),
            source_line,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// What a `WAIT` instruction waits for. `None` for every other kind.
    pub fn expectation(&self) -> Option<Expectation> {
        (self.kind == InstructionKind::Wait).then(|| Expectation::from_argument(&self.argument))
    }

    /// The sleep of a `PAUSE` instruction. The parser guarantees the value is valid.
    pub fn pause_duration(&self) -> Option<Duration> {
        if self.kind != InstructionKind::Pause {
            return None;
        }
        parse_seconds(&self.argument)
    }
}

/// Parses a nonnegative, finite number of seconds.
pub(crate) fn parse_seconds(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// An ordered, validated list of instructions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playbook {
    instructions: Vec<Instruction>,
    success_message: Option<String>,
}

impl Playbook {
    /// Wraps an already validated instruction list. Use the parser to build one from text.
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let success_message = instructions
            .iter()
            .rev()
            .find(|i| i.kind == InstructionKind::Success && !i.argument.is_empty())
            .map(|i| i.argument.clone());
        Self {
            instructions,
            success_message,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The argument of the last `SUCCESS` line in the script.
    pub fn success_message(&self) -> Option<&str> {
        self.success_message.as_deref()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Number of executable instructions (comments excluded).
    pub fn step_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| i.kind.is_executable())
            .count()
    }
}
