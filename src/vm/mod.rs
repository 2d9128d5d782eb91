//! NVM - a virtual machine built out of gated associative-memory layers
//!
//! Programs are written in a small assembly language:
//!
//! ```text
//! # copy a literal, call a subroutine, compare and branch
//!         movv r0 A
//!         subv check
//!         exit
//! check:  cmpv r0 A
//!         jie same
//!         ret
//! same:   movv r1 yes
//!         ret
//! ```
//!
//! Nothing here is interpreted. The control flow is a gate-sequencing
//! automaton flashed into the `gh`/`go` layers, the program is flashed into
//! data pathways around `ip`, and the [`Machine`] only ticks the network.
//!
//! ## Pipeline
//!
//! ```text
//! source --parse--> Program --assemble--> data weights  --+
//!                                                        +--> Machine::tick
//! NvmConfig --Network--> compile --> control weights   --+
//!                    \--> flash_pointers --> device weights
//! ```

pub mod assembler;
pub mod devices;
pub mod instruction_set;
pub mod machine;
pub mod opcode;
pub mod program;
pub mod sequencer;

pub use assembler::{ip_tokens, Assembly, ProgramAssembler};
pub use devices::{Plasticity, FALSE_TOKEN, TRUE_TOKEN};
pub use instruction_set::{compile, InstructionSet};
pub use machine::{Machine, RunOutcome, StepOutcome};
pub use opcode::{Opcode, Operand};
pub use program::{parse, Instruction, Program, ProgramError, NULL_TOKEN};
pub use sequencer::{ControlFlash, ControlState, GateSequencer};
