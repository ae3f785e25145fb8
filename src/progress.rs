//! Advisory grouping of instructions into progress blocks.
//!
//! Blocks only label progress events; they never influence execution.

use crate::conditional::find_matching_endif;
use crate::instruction::{Instruction, InstructionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub start: usize,
    /// Exclusive.
    pub end: usize,
    pub label: String,
}

impl Block {
    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Group `instructions` into blocks.
///
/// `login_end` marks the end of a leading login sequence, if the playbook has one.
/// A comment directly before a block names it.
pub fn plan_blocks(instructions: &[Instruction], login_end: Option<usize>) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut index = 0;
    if let Some(end) = login_end.filter(|end| *end > 0) {
        let end = end.min(instructions.len());
        blocks.push(Block {
            start: 0,
            end,
            label: "login sequence".to_string(),
        });
        index = end;
    }

    let mut label: Option<String> = None;
    while index < instructions.len() {
        let instruction = &instructions[index];
        let kind = instruction.kind;
        if kind == InstructionKind::Comment {
            if !instruction.argument.is_empty() {
                label = Some(instruction.argument.clone());
            }
            index += 1;
            continue;
        }
        let end = if kind.is_if() {
            find_matching_endif(instructions, index).map_or(instructions.len(), |e| e + 1)
        } else if kind == InstructionKind::Send {
            let mut end = index + 1;
            while end < instructions.len()
                && matches!(
                    instructions[end].kind,
                    InstructionKind::Wait | InstructionKind::Pause
                )
            {
                end += 1;
            }
            end
        } else {
            index + 1
        };
        blocks.push(Block {
            start: index,
            end,
            label: label.take().unwrap_or_else(|| describe(instruction)),
        });
        index = end;
    }
    blocks
}

/// The block containing instruction `index`.
pub fn block_of(blocks: &[Block], index: usize) -> Option<&Block> {
    blocks.iter().find(|block| block.contains(index))
}

fn describe(instruction: &Instruction) -> String {
    let argument = &instruction.argument;
    match instruction.kind {
        InstructionKind::Send if argument.is_empty() => "send newline".to_string(),
        InstructionKind::Send => format!("command: {argument}"),
        InstructionKind::Wait => format!("wait for {argument}"),
        InstructionKind::Pause => format!("pause {argument}s"),
        InstructionKind::Success => "finish".to_string(),
        kind if kind.is_if() => format!("condition: {} '{argument}'", kind.keyword()),
        kind => kind.keyword().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn spans(blocks: &[Block]) -> Vec<(usize, usize, &str)> {
        blocks
            .iter()
            .map(|b| (b.start, b.end, b.label.as_str()))
            .collect()
    }

    #[test]
    fn test_plan_blocks() {
        let playbook = parse_str(
            "\
WAIT \"login:\"
SEND admin
WAIT PROMPT
# check the model
SEND \"show version\"
WAIT PROMPT
IF_CONTAINS SN2700
  SEND \"show interfaces\"
  WAIT PROMPT
ENDIF
PAUSE 1
SUCCESS done
",
        )
        .unwrap();
        let blocks = plan_blocks(playbook.instructions(), Some(3));
        assert_eq!(
            spans(&blocks),
            vec![
                (0, 3, "login sequence"),
                (4, 6, "check the model"),
                (6, 10, "condition: IF_CONTAINS 'SN2700'"),
                (10, 11, "pause 1s"),
                (11, 12, "finish"),
            ]
        );
        assert_eq!(block_of(&blocks, 8).map(|b| b.start), Some(6));
        assert_eq!(block_of(&blocks, 3), None);
    }

    #[test]
    fn test_plan_without_login() {
        let playbook = parse_str("SEND\nSEND x\nWAIT PROMPT\n").unwrap();
        let blocks = plan_blocks(playbook.instructions(), None);
        assert_eq!(
            spans(&blocks),
            vec![(0, 1, "send newline"), (1, 3, "command: x")]
        );
    }
}
