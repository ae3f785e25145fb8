//! The failure classification reported in an [`ExecutionResult`](crate::ExecutionResult).
//!
//! Each component keeps its own typed error (`ParseError`, `TransportError`,
//! `ConditionError`, `ControlFlowError`); [`ErrorKind`] is the coarse category a
//! host uses to decide what to do next.

use crate::conditional::{ConditionError, ControlFlowError};
use crate::parser::ParseError;
use crate::transport::TransportError;
use std::fmt;

/// Coarse category of a playbook failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The playbook was malformed. Always reported before any transport I/O.
    Syntax,
    /// Reading from or writing to the transport failed. Fatal for the session.
    Transport,
    /// A `WAIT` did not see its expected text or prompt in time.
    Timeout,
    /// A condition could not be evaluated (e.g. an invalid regex).
    ConditionEvaluation,
    /// The conditional stack reached a state the parser should have prevented.
    ControlFlow,
}

impl ErrorKind {
    /// Whether a failure of this kind should end the session.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorKind::Timeout | ErrorKind::ConditionEvaluation)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ConditionEvaluation => "ConditionEvaluationError",
            ErrorKind::ControlFlow => "ControlFlowError",
        };
        f.write_str(name)
    }
}

impl From<&ParseError> for ErrorKind {
    fn from(err: &ParseError) -> Self {
        match err {
            ParseError::Syntax { .. } => ErrorKind::Syntax,
            // An unreadable playbook file is still a refusal to start.
            ParseError::Io { .. } => ErrorKind::Syntax,
        }
    }
}

impl From<&TransportError> for ErrorKind {
    fn from(_: &TransportError) -> Self {
        ErrorKind::Transport
    }
}

impl From<&ConditionError> for ErrorKind {
    fn from(_: &ConditionError) -> Self {
        ErrorKind::ConditionEvaluation
    }
}

impl From<&ControlFlowError> for ErrorKind {
    fn from(_: &ControlFlowError) -> Self {
        ErrorKind::ControlFlow
    }
}
