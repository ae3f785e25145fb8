//! IF/ELIF/ELSE/ENDIF evaluation over a flat instruction list.
//!
//! Jump targets are never stored; [`find_next_branch`] and [`find_matching_endif`]
//! rescan forward with a depth counter every time they are needed.

use crate::instruction::{Instruction, InstructionKind};
use regex::RegexBuilder;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{} is not a condition", .0.keyword())]
    NotACondition(InstructionKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlFlowError {
    #[error("line {line}: {keyword} outside of a conditional block")]
    NoOpenConditional { line: usize, keyword: &'static str },

    #[error("line {line}: conditional block has no matching ENDIF")]
    MissingEndIf { line: usize },

    #[error("line {line}: {keyword} is not a control-flow instruction")]
    NotControlFlow { line: usize, keyword: &'static str },

    #[error("instruction index {index} is out of range")]
    OutOfRange { index: usize },
}

impl ControlFlowError {
    pub fn line(&self) -> Option<usize> {
        match self {
            ControlFlowError::NoOpenConditional { line, .. }
            | ControlFlowError::MissingEndIf { line }
            | ControlFlowError::NotControlFlow { line, .. } => Some(*line),
            ControlFlowError::OutOfRange { .. } => None,
        }
    }
}

/// Evaluate a condition of `kind` with `pattern` against `subject`.
///
/// ```
/// use seriallink::{InstructionKind, evaluate};
///
/// assert!(evaluate(InstructionKind::IfContainsCI, "sn2700", "Model: SN2700").unwrap());
/// assert!(evaluate(InstructionKind::IfRegex, "Version [0-9]+", "Version 42 build").unwrap());
/// ```
pub fn evaluate(kind: InstructionKind, pattern: &str, subject: &str) -> Result<bool, ConditionError> {
    use InstructionKind::*;
    match kind {
        IfContains | ElifContains => Ok(subject.contains(pattern)),
        IfNotContains | ElifNotContains => Ok(!subject.contains(pattern)),
        IfContainsCI | ElifContainsCI => Ok(contains_ci(subject, pattern)),
        IfNotContainsCI | ElifNotContainsCI => Ok(!contains_ci(subject, pattern)),
        IfRegex | ElifRegex => regex_search(pattern, subject),
        IfNotRegex | ElifNotRegex => regex_search(pattern, subject).map(|found| !found),
        other => Err(ConditionError::NotACondition(other)),
    }
}

fn contains_ci(subject: &str, pattern: &str) -> bool {
    subject.to_lowercase().contains(&pattern.to_lowercase())
}

fn regex_search(pattern: &str, subject: &str) -> Result<bool, ConditionError> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConditionError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
    Ok(regex.is_match(subject))
}

/// Index of the `EndIf` closing the group that the instruction at `start` belongs to.
///
/// `start` may be the group's `If*`, any of its `Elif*`, or its `Else`.
pub fn find_matching_endif(instructions: &[Instruction], start: usize) -> Option<usize> {
    scan_group(instructions, start, |kind| kind == InstructionKind::EndIf)
}

/// Index of the next `Elif*`, `Else` or `EndIf` of the same group after `start`.
pub fn find_next_branch(instructions: &[Instruction], start: usize) -> Option<usize> {
    scan_group(instructions, start, |kind| {
        kind.is_elif() || matches!(kind, InstructionKind::Else | InstructionKind::EndIf)
    })
}

fn scan_group(
    instructions: &[Instruction],
    start: usize,
    stop: impl Fn(InstructionKind) -> bool,
) -> Option<usize> {
    let mut depth = 0usize;
    for (index, instruction) in instructions.iter().enumerate().skip(start + 1) {
        let kind = instruction.kind;
        if kind.is_if() {
            depth += 1;
        } else if depth == 0 && stop(kind) {
            return Some(index);
        } else if kind == InstructionKind::EndIf {
            depth = depth.checked_sub(1)?;
        }
    }
    None
}

/// Runtime state of one open conditional group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionalFrame {
    /// Some branch of this group has already been taken.
    pub condition_satisfied_once: bool,
    /// The branch currently being walked is the taken one.
    pub currently_executing: bool,
}

/// Where execution goes after a control-flow instruction.
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: usize,
    /// The condition's value when one was evaluated. `None` for `EndIf` and for
    /// branches bypassed because an earlier sibling was taken.
    pub result: Option<bool>,
    /// Evaluation error that was recovered by treating the condition as false.
    pub recovered: Option<ConditionError>,
}

/// The condition stack.
#[derive(Debug, Default)]
pub struct ConditionalEngine {
    frames: Vec<ConditionalFrame>,
}

impl ConditionalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[ConditionalFrame] {
        &self.frames
    }

    /// Execute the control-flow instruction at `index`, using `subject` as the text
    /// conditions are tested against.
    pub fn step(
        &mut self,
        instructions: &[Instruction],
        index: usize,
        subject: &str,
    ) -> Result<Transition, ControlFlowError> {
        let instruction = instructions
            .get(index)
            .ok_or(ControlFlowError::OutOfRange { index })?;
        let line = instruction.source_line;
        let kind = instruction.kind;

        if kind.is_if() {
            let (matched, recovered) = check(instruction, subject);
            self.frames.push(ConditionalFrame {
                condition_satisfied_once: matched,
                currently_executing: matched,
            });
            let next = if matched {
                index + 1
            } else {
                find_next_branch(instructions, index).ok_or(ControlFlowError::MissingEndIf { line })?
            };
            return Ok(Transition {
                next,
                result: Some(matched),
                recovered,
            });
        }

        if kind.is_elif() || kind == InstructionKind::Else {
            let frame = self
                .frames
                .last_mut()
                .ok_or(ControlFlowError::NoOpenConditional {
                    line,
                    keyword: kind.keyword(),
                })?;
            if frame.condition_satisfied_once {
                frame.currently_executing = false;
                let end = find_matching_endif(instructions, index)
                    .ok_or(ControlFlowError::MissingEndIf { line })?;
                return Ok(Transition {
                    next: end,
                    result: None,
                    recovered: None,
                });
            }
            let (matched, recovered) = if kind == InstructionKind::Else {
                (true, None)
            } else {
                check(instruction, subject)
            };
            frame.condition_satisfied_once = matched;
            frame.currently_executing = matched;
            let next = if matched {
                index + 1
            } else {
                find_next_branch(instructions, index).ok_or(ControlFlowError::MissingEndIf { line })?
            };
            return Ok(Transition {
                next,
                result: Some(matched),
                recovered,
            });
        }

        if kind == InstructionKind::EndIf {
            self.frames.pop().ok_or(ControlFlowError::NoOpenConditional {
                line,
                keyword: kind.keyword(),
            })?;
            return Ok(Transition {
                next: index + 1,
                result: None,
                recovered: None,
            });
        }

        Err(ControlFlowError::NotControlFlow {
            line,
            keyword: kind.keyword(),
        })
    }
}

/// Evaluate, degrading an evaluation error to `false`.
fn check(instruction: &Instruction, subject: &str) -> (bool, Option<ConditionError>) {
    match evaluate(instruction.kind, &instruction.argument, subject) {
        Ok(matched) => (matched, None),
        Err(err) => {
            warn!(line = instruction.source_line, %err, "condition treated as false");
            (false, Some(err))
        }
    }
}
