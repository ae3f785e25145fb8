//! Playbook parser.
//!
//! The top-level entry points are [`parse_str`], [`parse_lines`] and [`parse_file`].
//! Parsing is a single left-to-right pass; conditional balance is validated here so
//! the executor only ever sees well-formed groups.

use crate::instruction::{Instruction, InstructionKind, Playbook, parse_seconds};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Why a playbook was rejected.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("failed to read playbook {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    fn syntax(line: usize, reason: impl Into<String>) -> Self {
        ParseError::Syntax {
            line,
            reason: reason.into(),
        }
    }

    /// The offending script line, if the error is tied to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Syntax { line, .. } => Some(*line),
            ParseError::Io { .. } => None,
        }
    }
}

/// Parse a playbook from a string slice.
///
/// Blank lines are ignored. Lines starting with `#` are kept as comments that only
/// label progress blocks.
///
/// # Errors
///
/// Returns [`ParseError::Syntax`] for an unknown keyword, a missing or unexpected
/// argument, an invalid `PAUSE` value, or unbalanced conditional blocks.
///
/// # Example
///
/// ```
/// use seriallink::parse_str;
///
/// let playbook = parse_str("SEND \"show version\"\nWAIT PROMPT\n").unwrap();
/// assert_eq!(playbook.len(), 2);
/// ```
pub fn parse_str(content: &str) -> Result<Playbook, ParseError> {
    parse_lines(content.lines())
}

/// Parse a playbook from a file.
///
/// # Errors
///
/// Returns [`ParseError::Io`] if the file cannot be read, otherwise the errors of
/// [`parse_str`].
///
/// # Example
///
/// ```no_run
/// use seriallink::parse_file;
///
/// let playbook = parse_file("playbook.txt").unwrap();
/// ```
pub fn parse_file(path: impl AsRef<Path>) -> Result<Playbook, ParseError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&content)
}

/// Parse a playbook from an iterator of lines.
pub fn parse_lines<I, S>(lines: I) -> Result<Playbook, ParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut instructions = Vec::new();
    let mut groups = GroupTracker::default();
    for (index, line) in lines.into_iter().enumerate() {
        let line_num = index + 1;
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            instructions.push(Instruction::new(
                InstructionKind::Comment,
                comment.trim(),
                line_num,
            ));
            continue;
        }
        let instruction = parse_line(line, line_num)?;
        groups.track(&instruction)?;
        instructions.push(instruction);
    }
    groups.finish()?;
    Ok(Playbook::new(instructions))
}

static REGISTRY: &[(&str, InstructionKind)] = &[
    ("SEND", InstructionKind::Send),
    ("WAIT", InstructionKind::Wait),
    ("PAUSE", InstructionKind::Pause),
    ("IF_CONTAINS", InstructionKind::IfContains),
    ("IF_NOT_CONTAINS", InstructionKind::IfNotContains),
    ("IF_CONTAINS_I", InstructionKind::IfContainsCI),
    ("IF_NOT_CONTAINS_I", InstructionKind::IfNotContainsCI),
    ("IF_REGEX", InstructionKind::IfRegex),
    ("IF_NOT_REGEX", InstructionKind::IfNotRegex),
    ("ELIF_CONTAINS", InstructionKind::ElifContains),
    ("ELIF_NOT_CONTAINS", InstructionKind::ElifNotContains),
    ("ELIF_CONTAINS_I", InstructionKind::ElifContainsCI),
    ("ELIF_NOT_CONTAINS_I", InstructionKind::ElifNotContainsCI),
    ("ELIF_REGEX", InstructionKind::ElifRegex),
    ("ELIF_NOT_REGEX", InstructionKind::ElifNotRegex),
    ("ELSE", InstructionKind::Else),
    ("ENDIF", InstructionKind::EndIf),
    ("SUCCESS", InstructionKind::Success),
];

/// Turn a single non-empty, non-comment line into an instruction.
///
/// To add a keyword, add one entry to [`REGISTRY`] and an [`InstructionKind`] variant.
fn parse_line(line: &str, line_num: usize) -> Result<Instruction, ParseError> {
    let (keyword, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let kind = REGISTRY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(keyword))
        .map(|(_, kind)| *kind)
        .ok_or_else(|| ParseError::syntax(line_num, format!("Unknown keyword: {keyword}")))?;
    let args = args.trim();

    match kind {
        InstructionKind::Wait => parse_wait(args, line_num),
        InstructionKind::Else | InstructionKind::EndIf => {
            if !args.is_empty() {
                return Err(ParseError::syntax(
                    line_num,
                    format!("{} takes no argument, got: {args}", kind.keyword()),
                ));
            }
            Ok(Instruction::new(kind, "", line_num))
        }
        _ => {
            let argument = strip_quotes(args);
            if kind.requires_argument() && argument.is_empty() {
                return Err(ParseError::syntax(
                    line_num,
                    format!("{} requires an argument", kind.keyword()),
                ));
            }
            if kind == InstructionKind::Pause && parse_seconds(argument).is_none() {
                return Err(ParseError::syntax(
                    line_num,
                    format!("PAUSE expects a nonnegative number of seconds, got: {argument}"),
                ));
            }
            Ok(Instruction::new(kind, argument, line_num))
        }
    }
}

/// `WAIT PROMPT`, `WAIT text`, `WAIT "text"` or `WAIT "text" 5s`.
fn parse_wait(args: &str, line_num: usize) -> Result<Instruction, ParseError> {
    let Some((text, rest)) = split_quoted(args) else {
        if args.is_empty() {
            return Err(ParseError::syntax(line_num, "WAIT requires text or PROMPT"));
        }
        return Ok(Instruction::new(InstructionKind::Wait, args, line_num));
    };
    if text.is_empty() {
        return Err(ParseError::syntax(line_num, "WAIT requires text or PROMPT"));
    }
    let instruction = Instruction::new(InstructionKind::Wait, text, line_num);
    if rest.is_empty() {
        return Ok(instruction);
    }
    let timeout = parse_duration(rest)
        .map_err(|reason| ParseError::syntax(line_num, format!("Invalid WAIT timeout: {reason}")))?;
    Ok(instruction.with_timeout(timeout))
}

/// Parse a duration string: `1s`, `500ms`, `1.5s`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: u64 = ms_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds value: {ms_str}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(s_str) = s.strip_suffix('s') {
        parse_seconds(s_str).ok_or_else(|| format!("invalid seconds value: {s_str}"))
    } else {
        Err(format!("duration must end with 's' or 'ms', got: {s}"))
    }
}

/// Strip one pair of matching surrounding quotes (`"…"` or `'…'`).
fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split `"text" rest` into the quoted text and whatever follows the closing quote.
/// Returns `None` for unquoted or unterminated arguments.
fn split_quoted(s: &str) -> Option<(&str, &str)> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let close = s[1..].rfind(quote)? + 1;
    Some((&s[1..close], s[close + 1..].trim()))
}

struct OpenGroup {
    line: usize,
    keyword: &'static str,
    seen_else: bool,
}

/// Checks `IF`/`ELIF`/`ELSE`/`ENDIF` balance as lines are parsed.
#[derive(Default)]
struct GroupTracker {
    open: Vec<OpenGroup>,
}

impl GroupTracker {
    fn track(&mut self, instruction: &Instruction) -> Result<(), ParseError> {
        let line = instruction.source_line;
        let kind = instruction.kind;
        if kind.is_if() {
            self.open.push(OpenGroup {
                line,
                keyword: kind.keyword(),
                seen_else: false,
            });
        } else if kind.is_elif() || kind == InstructionKind::Else {
            let group = self.open.last_mut().ok_or_else(|| {
                ParseError::syntax(line, format!("{} without a matching IF", kind.keyword()))
            })?;
            if group.seen_else {
                let reason = if kind == InstructionKind::Else {
                    format!("duplicate ELSE in the group opened at line {}", group.line)
                } else {
                    format!(
                        "{} after ELSE in the group opened at line {}",
                        kind.keyword(),
                        group.line
                    )
                };
                return Err(ParseError::syntax(line, reason));
            }
            if kind == InstructionKind::Else {
                group.seen_else = true;
            }
        } else if kind == InstructionKind::EndIf {
            self.open
                .pop()
                .ok_or_else(|| ParseError::syntax(line, "ENDIF without a matching IF"))?;
        }
        Ok(())
    }

    fn finish(self) -> Result<(), ParseError> {
        match self.open.last() {
            Some(group) => Err(ParseError::syntax(
                group.line,
                format!("{} is never closed with ENDIF", group.keyword),
            )),
            None => Ok(()),
        }
    }
}
