//! Program - parser for NVM assembly text
//!
//! ## Syntax
//!
//! ```text
//! # Comments start with '#'
//! start:  movv r0 A        # label, opcode, operands
//!         cmpv r0 B
//!         jie  start
//! done:                    # a bare label names the next instruction
//!         exit
//! ```
//!
//! Operands are whitespace separated. Missing operands are padded with the
//! reserved token `null` so every instruction has exactly three fields.

use std::collections::{BTreeMap, BTreeSet};

use super::opcode::{Opcode, Operand};

/// Padding for absent operands
pub const NULL_TOKEN: &str = "null";

/// One parsed instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: [String; 2],
    /// Source line (1-based)
    pub line: usize,
}

impl Instruction {
    /// Field `0` is the mnemonic, `1` and `2` the operands
    pub fn field(&self, index: usize) -> &str {
        match index {
            0 => self.opcode.mnemonic(),
            1 => &self.operands[0],
            _ => &self.operands[1],
        }
    }
}

/// Parsed program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    /// Label -> instruction index
    pub labels: BTreeMap<String, usize>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Distinct operand tokens that are not registers or padding, sorted
    pub fn literals(&self, registers: &[String]) -> Vec<String> {
        let mut tokens = BTreeSet::new();
        for instr in &self.instructions {
            for op in &instr.operands {
                if op != NULL_TOKEN && !registers.contains(op) {
                    tokens.insert(op.clone());
                }
            }
        }
        tokens.into_iter().collect()
    }

    /// Copy with every label, and every operand naming one, as `scope:label`.
    ///
    /// Labels cannot contain `:`, so scoped labels never meet another
    /// program's labels or line tokens.
    pub fn scoped(&self, scope: &str) -> Program {
        let rename = |token: &str| {
            if self.labels.contains_key(token) {
                format!("{}:{}", scope, token)
            } else {
                token.to_string()
            }
        };
        let instructions = self
            .instructions
            .iter()
            .map(|instr| Instruction {
                opcode: instr.opcode,
                operands: [rename(&instr.operands[0]), rename(&instr.operands[1])],
                line: instr.line,
            })
            .collect();
        let labels = self
            .labels
            .iter()
            .map(|(label, &index)| (rename(label), index))
            .collect();
        Program { instructions, labels }
    }

    /// Distinct tokens appearing in field `index` across the program, sorted
    pub fn field_tokens(&self, index: usize) -> Vec<String> {
        let tokens: BTreeSet<&str> = self.instructions.iter().map(|i| i.field(index)).collect();
        tokens.into_iter().map(String::from).collect()
    }
}

/// Parser for program text
pub struct Parser<'a> {
    registers: &'a [String],
    line_number: usize,
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
    pending_labels: Vec<(String, usize)>,
    label_refs: Vec<(String, usize)>,
}

impl<'a> Parser<'a> {
    pub fn new(registers: &'a [String]) -> Self {
        Self {
            registers,
            line_number: 0,
            instructions: Vec::new(),
            labels: BTreeMap::new(),
            pending_labels: Vec::new(),
            label_refs: Vec::new(),
        }
    }

    pub fn parse(mut self, source: &str) -> Result<Program, ProgramError> {
        for (i, raw) in source.lines().enumerate() {
            self.line_number = i + 1;
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.parse_line(line)?;
        }

        if let Some((label, line)) = self.pending_labels.first() {
            return Err(ProgramError {
                line: *line,
                message: format!("Label {} is not followed by an instruction", label),
            });
        }
        if self.instructions.is_empty() {
            return Err(ProgramError {
                line: self.line_number,
                message: "Program has no instructions".into(),
            });
        }
        for (label, line) in &self.label_refs {
            if !self.labels.contains_key(label) {
                return Err(ProgramError {
                    line: *line,
                    message: format!("Undefined label: {}", label),
                });
            }
        }

        Ok(Program {
            instructions: self.instructions,
            labels: self.labels,
        })
    }

    fn parse_line(&mut self, line: &str) -> Result<(), ProgramError> {
        let mut words: Vec<&str> = line.split_whitespace().collect();

        if let Some(label) = words.first().and_then(|w| w.strip_suffix(':')) {
            self.define_label(label)?;
            words.remove(0);
            if words.is_empty() {
                return Ok(());
            }
        }

        let opcode: Opcode = words[0].parse().map_err(|e: String| self.error(e))?;
        let operands = &words[1..];
        let kinds = opcode.operands();
        if operands.len() != kinds.len() {
            return Err(self.error(format!(
                "{} expects {} operand(s), got {}",
                opcode,
                kinds.len(),
                operands.len()
            )));
        }

        let mut fields = [NULL_TOKEN.to_string(), NULL_TOKEN.to_string()];
        for (slot, (&token, kind)) in operands.iter().zip(kinds).enumerate() {
            self.check_operand(opcode, token, *kind)?;
            fields[slot] = token.to_string();
        }

        let index = self.instructions.len();
        for (label, _) in self.pending_labels.drain(..) {
            self.labels.insert(label, index);
        }
        self.instructions.push(Instruction {
            opcode,
            operands: fields,
            line: self.line_number,
        });
        Ok(())
    }

    fn define_label(&mut self, label: &str) -> Result<(), ProgramError> {
        if label.is_empty() || label.contains(':') {
            return Err(self.error(format!("Invalid label: {:?}", label)));
        }
        if label == NULL_TOKEN || self.registers.iter().any(|r| r == label) {
            return Err(self.error(format!("Label {} shadows a reserved name", label)));
        }
        let duplicate = self.labels.contains_key(label)
            || self.pending_labels.iter().any(|(l, _)| l == label);
        if duplicate {
            return Err(self.error(format!("Duplicate label: {}", label)));
        }
        self.pending_labels.push((label.to_string(), self.line_number));
        Ok(())
    }

    fn check_operand(&mut self, opcode: Opcode, token: &str, kind: Operand) -> Result<(), ProgramError> {
        let is_register = self.registers.iter().any(|r| r == token);
        if token == NULL_TOKEN {
            return Err(self.error(format!("{} is reserved", NULL_TOKEN)));
        }
        match kind {
            Operand::Register if !is_register => {
                Err(self.error(format!("{} expects a register, got {}", opcode, token)))
            }
            Operand::Literal | Operand::Label if is_register => Err(self.error(format!(
                "{} expects a literal, got register {}",
                opcode, token
            ))),
            Operand::Label => {
                self.label_refs.push((token.to_string(), self.line_number));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn error(&self, message: String) -> ProgramError {
        ProgramError {
            line: self.line_number,
            message,
        }
    }
}

/// Program parse error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ProgramError {}

/// Convenience function to parse source
pub fn parse(source: &str, registers: &[String]) -> Result<Program, ProgramError> {
    Parser::new(registers).parse(source)
}
