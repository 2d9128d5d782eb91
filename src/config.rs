//! VM configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activator::{Activator, ActivatorKind};
use crate::error::{NvmError, Result};
use crate::learning::LearningRule;
use crate::network::CONTROL_LAYER_NAMES;
use crate::vm::NULL_TOKEN;

/// Configuration of one virtual machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NvmConfig {
    /// Register layer names, in order
    pub registers: Vec<String>,
    /// Units per data layer (power of two)
    pub layer_size: usize,
    /// Units of the gate-hidden layer
    pub hidden_size: usize,
    /// Squashing function shared by every layer
    pub activator: ActivatorKind,
    /// Distance of the saturation levels from the asymptotes
    pub pad: f64,
    /// Rule used for every flash and for runtime plasticity
    pub rule: LearningRule,
    /// Draw program tokens from the orthogonal family
    pub orthogonal: bool,
    /// Addressable slots of the stack and memory pointers
    pub pointer_slots: usize,
    /// Seed for every layer's code book
    pub seed: u64,
    /// Tick budget per instruction
    pub max_ticks: usize,
}

impl Default for NvmConfig {
    fn default() -> Self {
        Self {
            registers: vec!["r0".into(), "r1".into(), "r2".into()],
            layer_size: 64,
            hidden_size: 256,
            activator: ActivatorKind::Tanh,
            pad: 1e-3,
            rule: LearningRule::Rehebbian,
            orthogonal: false,
            pointer_slots: 32,
            seed: 0,
            max_ticks: 50,
        }
    }
}

impl NvmConfig {
    /// Default config with the given registers
    pub fn with_registers<S: AsRef<str>>(registers: &[S]) -> Self {
        Self {
            registers: registers.iter().map(|r| r.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    /// Small layers for quick experiments; one register
    pub fn compact() -> Self {
        Self {
            registers: vec!["r0".into()],
            layer_size: 32,
            hidden_size: 128,
            pointer_slots: 16,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn activator(&self) -> Activator {
        Activator::new(self.activator, self.pad)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registers.is_empty() {
            return Err(NvmError::Config("at least one register is required".into()));
        }
        for (i, name) in self.registers.iter().enumerate() {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(NvmError::Config(format!("invalid register name {:?}", name)));
            }
            if CONTROL_LAYER_NAMES.contains(&name.as_str()) || name == NULL_TOKEN {
                return Err(NvmError::Config(format!("register name {} is reserved", name)));
            }
            if self.registers[..i].contains(name) {
                return Err(NvmError::Config(format!("duplicate register {}", name)));
            }
        }
        if !self.layer_size.is_power_of_two() || self.layer_size < 8 {
            return Err(NvmError::Config(format!(
                "layer_size must be a power of two >= 8, got {}",
                self.layer_size
            )));
        }
        if self.hidden_size < 32 {
            return Err(NvmError::Config(format!(
                "hidden_size must be >= 32, got {}",
                self.hidden_size
            )));
        }
        if !(self.pad > 0.0 && self.pad < 0.5) {
            return Err(NvmError::Config(format!("pad must be in (0, 0.5), got {}", self.pad)));
        }
        if self.pointer_slots < 2 || self.pointer_slots > self.layer_size {
            return Err(NvmError::Config(format!(
                "pointer_slots must be in 2..={}, got {}",
                self.layer_size, self.pointer_slots
            )));
        }
        if self.max_ticks == 0 {
            return Err(NvmError::Config("max_ticks must be positive".into()));
        }
        Ok(())
    }
}
