//! Error types for nvm

use thiserror::Error;

use crate::vm::ProgramError;

/// Nvm error type
#[derive(Debug, Error)]
pub enum NvmError {
    /// Program text could not be parsed
    #[error("Program error: {0}")]
    Program(#[from] ProgramError),

    /// Two transits leave the same control state on the same condition
    /// but lead to different targets
    #[error("Automaton conflict in {context}: state {state} on {condition} already leads elsewhere")]
    TransitConflict {
        context: String,
        state: String,
        condition: String,
    },

    /// A transit is keyed on a condition layer its source state does not read
    #[error("Condition layer {layer} is not gated into the control state {state} ({context})")]
    ConditionNotGated {
        context: String,
        state: String,
        layer: String,
    },

    /// A source state reads a condition layer but the transit ignores it
    #[error("State {state} reads {layer} but the transit is not keyed on it ({context})")]
    UnconditionedBias {
        context: String,
        state: String,
        layer: String,
    },

    /// A selection layer keyed from a second state, or mixed with dispatch
    #[error("Condition layer {layer} is already keyed elsewhere, cannot key it from {state} ({context})")]
    SharedCondition {
        context: String,
        state: String,
        layer: String,
    },

    /// Unknown layer name
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    /// Gate key missing from the gate map
    #[error("Unknown gate: {0}")]
    UnknownGate(String),

    /// Gate key listed twice while building the gate map
    #[error("Duplicate gate: {0}")]
    DuplicateGate(String),

    /// Program name never assembled
    #[error("Unknown program: {0}")]
    UnknownProgram(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Orthogonal pattern family used up
    #[error("Pattern family exhausted on layer {layer}: {requested} requested, {capacity} available")]
    Exhausted {
        layer: String,
        requested: usize,
        capacity: usize,
    },

    /// Shape mismatch
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NvmError>;
