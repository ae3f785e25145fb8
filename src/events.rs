use crate::error::ErrorKind;
use tracing::{debug, info, warn};

/// Progress notifications emitted by the [`Executor`](crate::Executor)
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An instruction is about to run
    StepStarted {
        step: usize,
        total: usize,
        line: usize,
        /// Label of the progress block the step belongs to
        block: Option<String>,
        description: String,
    },

    StepSucceeded {
        step: usize,
        line: usize,
    },

    StepFailed {
        step: usize,
        line: usize,
        kind: ErrorKind,
        message: String,
    },

    /// A condition was tested against the last output
    ConditionEvaluated {
        line: usize,
        keyword: &'static str,
        pattern: String,
        result: bool,
    },

    /// A condition could not be evaluated and was treated as false
    ConditionError {
        line: usize,
        kind: ErrorKind,
        message: String,
    },

    /// The device prompt was detected or changed
    PromptDetected { prompt: String },

    /// Cleaned output captured by a wait
    Output { line: usize, text: String },

    /// The console was already logged in, so the playbook's login block was skipped
    LoginSkipped { steps: usize },

    RunFinished {
        success: bool,
        completed: usize,
        total: usize,
    },
}

/// Receives executor events.
///
/// Any `FnMut(&Event)` closure is a sink.
pub trait EventSink {
    fn handle(&mut self, event: &Event);
}

impl<F: FnMut(&Event)> EventSink for F {
    fn handle(&mut self, event: &Event) {
        self(event)
    }
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn handle(&mut self, event: &Event) {
        match event {
            Event::StepStarted {
                step,
                total,
                line,
                block,
                description,
            } => info!(step, total, line, block = block.as_deref(), "{description}"),
            Event::StepSucceeded { step, line } => debug!(step, line, "step succeeded"),
            Event::StepFailed {
                step,
                line,
                kind,
                message,
            } => warn!(step, line, %kind, "{message}"),
            Event::ConditionEvaluated {
                line,
                keyword,
                pattern,
                result,
            } => info!(line, keyword, pattern = %pattern, result, "condition evaluated"),
            Event::ConditionError {
                line,
                kind,
                message,
            } => warn!(line, %kind, "{message}"),
            Event::PromptDetected { prompt } => info!(prompt = %prompt, "prompt detected"),
            Event::Output { line, text } => debug!(line, "output:\n{text}"),
            Event::LoginSkipped { steps } => info!(steps, "already logged in, skipping login steps"),
            Event::RunFinished {
                success,
                completed,
                total,
            } => info!(success, completed, total, "playbook finished"),
        }
    }
}
