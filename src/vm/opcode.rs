//! Opcode - the closed instruction set
//!
//! | Group    | Opcodes                        | Operands                 |
//! |----------|--------------------------------|--------------------------|
//! | Move     | movv, movd                     | reg, literal / reg, reg  |
//! | Jump     | jmpv, jmpd, jie                | label / reg / label      |
//! | Compare  | cmpv, cmpd                     | reg, literal / reg, reg  |
//! | Call     | subv, subd, ret                | label / reg / -          |
//! | Memory   | mem, rem, nxt, prv             | reg / reg / - / -        |
//! | Pointer  | ref, drf, mref, mdrf           | reg / reg / reg / -      |
//! | System   | exit, nop                      | -                        |

use std::fmt;
use std::str::FromStr;

/// Kind of token an operand slot accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Name of a register layer
    Register,
    /// Any non-register token
    Literal,
    /// Label defined in the same program
    Label,
}

/// One of the twenty instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    /// reg <- literal
    Movv,
    /// reg <- reg
    Movd,
    /// ip <- label
    Jmpv,
    /// ip <- reg
    Jmpd,
    /// co <- (reg == literal)
    Cmpv,
    /// co <- (reg == reg)
    Cmpd,
    /// ip <- label if co
    Jie,
    /// push return pointer, ip <- label
    Subv,
    /// push return pointer, ip <- reg
    Subd,
    /// ip <- popped return pointer
    Ret,
    /// memory[mf] <- reg
    Mem,
    /// reg <- memory[mf]
    Rem,
    /// advance memory pointer
    Nxt,
    /// retreat memory pointer
    Prv,
    /// reg -> memory pointer association
    Ref,
    /// memory pointer <- pointer referenced by reg
    Drf,
    /// store the current memory pointer at the pointer referenced by reg
    Mref,
    /// memory pointer <- pointer stored at the current memory pointer
    Mdrf,
    Exit,
    Nop,
}

impl Opcode {
    pub const ALL: [Opcode; 20] = [
        Opcode::Movv,
        Opcode::Movd,
        Opcode::Jmpv,
        Opcode::Jmpd,
        Opcode::Cmpv,
        Opcode::Cmpd,
        Opcode::Jie,
        Opcode::Subv,
        Opcode::Subd,
        Opcode::Ret,
        Opcode::Mem,
        Opcode::Rem,
        Opcode::Nxt,
        Opcode::Prv,
        Opcode::Ref,
        Opcode::Drf,
        Opcode::Mref,
        Opcode::Mdrf,
        Opcode::Exit,
        Opcode::Nop,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Movv => "movv",
            Opcode::Movd => "movd",
            Opcode::Jmpv => "jmpv",
            Opcode::Jmpd => "jmpd",
            Opcode::Cmpv => "cmpv",
            Opcode::Cmpd => "cmpd",
            Opcode::Jie => "jie",
            Opcode::Subv => "subv",
            Opcode::Subd => "subd",
            Opcode::Ret => "ret",
            Opcode::Mem => "mem",
            Opcode::Rem => "rem",
            Opcode::Nxt => "nxt",
            Opcode::Prv => "prv",
            Opcode::Ref => "ref",
            Opcode::Drf => "drf",
            Opcode::Mref => "mref",
            Opcode::Mdrf => "mdrf",
            Opcode::Exit => "exit",
            Opcode::Nop => "nop",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.mnemonic() == s)
    }

    /// Operand slots, in order
    pub fn operands(&self) -> &'static [Operand] {
        use Operand::*;
        match self {
            Opcode::Movv | Opcode::Cmpv => &[Register, Literal],
            Opcode::Movd | Opcode::Cmpd => &[Register, Register],
            Opcode::Jmpv | Opcode::Jie | Opcode::Subv => &[Label],
            Opcode::Jmpd | Opcode::Subd => &[Register],
            Opcode::Mem | Opcode::Rem | Opcode::Ref | Opcode::Drf | Opcode::Mref => &[Register],
            Opcode::Ret | Opcode::Nxt | Opcode::Prv | Opcode::Mdrf | Opcode::Exit | Opcode::Nop => &[],
        }
    }

    pub fn arity(&self) -> usize {
        self.operands().len()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_mnemonic(&s.to_ascii_lowercase()).ok_or_else(|| format!("Unknown opcode: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics_unique() {
        for (i, a) in Opcode::ALL.iter().enumerate() {
            for b in &Opcode::ALL[i + 1..] {
                assert_ne!(a.mnemonic(), b.mnemonic());
            }
            assert_eq!(Opcode::from_mnemonic(a.mnemonic()), Some(*a));
        }
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("MOVV".parse::<Opcode>(), Ok(Opcode::Movv));
        assert!("halt".parse::<Opcode>().is_err());
    }

    #[test]
    fn test_arity() {
        assert_eq!(Opcode::Movd.arity(), 2);
        assert_eq!(Opcode::Jie.operands(), &[Operand::Label]);
        assert_eq!(Opcode::Mdrf.arity(), 0);
    }
}
