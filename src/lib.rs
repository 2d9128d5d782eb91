//! # NVM - Neural Virtual Machine
//!
//! A symbolic instruction set compiled into a network of recurrent
//! associative-memory layers. Every value is a distributed activity pattern,
//! every register is a layer, and program flow is carried by gate patterns
//! that open and close pathways between layers.
//!
//! ## Core Components
//!
//! - **Activator**: saturating nonlinearity per layer (tanh or logistic)
//! - **Learning**: one-shot flash of associations into a pathway's weights
//! - **Layer**: token <-> pattern coder for one layer
//! - **Network**: layer layout, pathways and the gate map
//! - **VM**: parser, assembler, gate sequencer, instruction set and runtime
//!
//! ## Example
//!
//! ```ignore
//! use nvm::{Machine, NvmConfig};
//!
//! let mut vm = Machine::new(NvmConfig::default())?;
//! vm.assemble("movv r1 A\nmovd r2 r1\nexit", "main")?;
//! vm.load("main", &[("r1", "C"), ("r2", "C")])?;
//! vm.run(100);
//! assert_eq!(vm.decode("r2")?, "A");
//! ```

pub mod activator;
pub use activator::{Activator, ActivatorKind};

pub mod learning;
pub use learning::{flash, Flash, LearningRule, PathwayBuilder};

pub mod layer;
pub use layer::{Coder, Layer, Pattern, UNKNOWN_TOKEN};

pub mod gate;
pub use gate::{flow, GateKey, GateMap, GateMode};

// Configuration
pub mod config;
pub use config::NvmConfig;

pub mod network;
pub use network::{Connection, ControlLayers, LayerId, Network, Pathway, Weights, CONTROL_LAYER_NAMES};

// Weight artifacts
pub mod artifact;
pub use artifact::{Artifact, ArtifactEntry};

// Virtual machine
pub mod vm;
pub use vm::{parse, Machine, Opcode, Program, ProgramError, RunOutcome, StepOutcome};

// Error types
mod error;
pub use error::{NvmError, Result};
