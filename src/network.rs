//! Network - layer arena, pathway set and gate map of one VM configuration
//!
//! ## Layers
//!
//! ```text
//! go   gate output      one unit per gate key
//! gh   gate hidden      control automaton state
//! ip   instruction pointer
//! opc  op1  op2         fields of the loaded instruction
//! ci   co               comparison input / output
//! sf   sb               stack pointer, forward / backward
//! mf   mb   mp          memory pointer, forward / backward / stage
//! r..  registers        one layer each, named by the configuration
//! ```
//!
//! Layer ids are dense indices into the arena, assigned in the order above.

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::NvmConfig;
use crate::error::{NvmError, Result};
use crate::gate::{GateKey, GateMap};
use crate::layer::Layer;
use crate::learning::LearningRule;

/// Names of the fixed layers, in id order
pub const CONTROL_LAYER_NAMES: [&str; 13] = [
    "go", "gh", "ip", "opc", "op1", "op2", "ci", "co", "sf", "sb", "mf", "mb", "mp",
];

/// Dense layer index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u16);

impl LayerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Directed `to <- from` connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pathway {
    pub to: LayerId,
    pub from: LayerId,
}

impl Pathway {
    pub const fn new(to: LayerId, from: LayerId) -> Self {
        Self { to, from }
    }
}

/// Weights and bias of one pathway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Connection {
    pub fn new(weights: Array2<f64>, bias: Array1<f64>) -> Self {
        Self { weights, bias }
    }

    pub fn zeros(to_size: usize, from_size: usize) -> Self {
        Self {
            weights: Array2::zeros((to_size, from_size)),
            bias: Array1::zeros(to_size),
        }
    }
}

/// Compiled artifact: every pathway's connection
pub type Weights = BTreeMap<Pathway, Connection>;

/// Ids of the fixed layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLayers {
    pub go: LayerId,
    pub gh: LayerId,
    pub ip: LayerId,
    pub opc: LayerId,
    pub op1: LayerId,
    pub op2: LayerId,
    pub ci: LayerId,
    pub co: LayerId,
    pub sf: LayerId,
    pub sb: LayerId,
    pub mf: LayerId,
    pub mb: LayerId,
    pub mp: LayerId,
}

impl ControlLayers {
    fn new() -> Self {
        let id = |i: u16| LayerId(i);
        Self {
            go: id(0),
            gh: id(1),
            ip: id(2),
            opc: id(3),
            op1: id(4),
            op2: id(5),
            ci: id(6),
            co: id(7),
            sf: id(8),
            sb: id(9),
            mf: id(10),
            mb: id(11),
            mp: id(12),
        }
    }

    /// Layers whose tokens can key a control transit
    pub fn conditions(&self) -> [LayerId; 4] {
        [self.opc, self.op1, self.op2, self.co]
    }

    /// Gates every control state keeps open
    pub fn default_gates(&self) -> [GateKey; 4] {
        [
            GateKey::copy(self.gh, self.gh),
            GateKey::decay(self.gh),
            GateKey::copy(self.go, self.gh),
            GateKey::decay(self.go),
        ]
    }
}

/// Layers, pathways and gate map of one configuration
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    names: HashMap<String, LayerId>,
    control: ControlLayers,
    registers: Vec<LayerId>,
    flows: Vec<Pathway>,
    plastic: Vec<Pathway>,
    gate_map: GateMap,
    rule: LearningRule,
    seed: u64,
}

impl Network {
    pub fn new(config: &NvmConfig) -> Result<Self> {
        config.validate()?;
        let c = ControlLayers::new();
        let base = CONTROL_LAYER_NAMES.len() as u16;
        let registers: Vec<LayerId> = (0..config.registers.len() as u16)
            .map(|i| LayerId(base + i))
            .collect();

        let flows = copy_pathways(&c, &registers);
        let plastic = plastic_pathways(&c, &registers);
        let layer_count = CONTROL_LAYER_NAMES.len() + registers.len();

        let gate_map = GateMap::new(
            flows
                .iter()
                .map(|p| GateKey::copy(p.to, p.from))
                .chain(plastic.iter().map(|p| GateKey::learn(p.to, p.from)))
                .chain((0..layer_count as u16).map(|i| GateKey::decay(LayerId(i)))),
        )?;

        let activator = config.activator();
        let names_in_order = CONTROL_LAYER_NAMES
            .iter()
            .map(|n| n.to_string())
            .chain(config.registers.iter().cloned());
        let mut layers = Vec::with_capacity(layer_count);
        let mut names = HashMap::new();
        for (i, name) in names_in_order.enumerate() {
            let id = LayerId(i as u16);
            let size = if id == c.go {
                gate_map.len()
            } else if id == c.gh {
                config.hidden_size
            } else {
                config.layer_size
            };
            let seed = config
                .seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(i as u64 + 1);
            names.insert(name.clone(), id);
            layers.push(Layer::new(name, size, activator, seed));
        }

        log::debug!(
            "network: {} layers, {} flows, {} plastic pathways, {} gates",
            layers.len(),
            flows.len(),
            plastic.len(),
            gate_map.len()
        );

        Ok(Self {
            layers,
            names,
            control: c,
            registers,
            flows,
            plastic,
            gate_map,
            rule: config.rule,
            seed: config.seed,
        })
    }

    pub fn control(&self) -> &ControlLayers {
        &self.control
    }

    pub fn registers(&self) -> &[LayerId] {
        &self.registers
    }

    pub fn register_names(&self) -> Vec<String> {
        self.registers.iter().map(|&r| self.name(r).to_string()).collect()
    }

    pub fn is_register(&self, name: &str) -> bool {
        self.names
            .get(name)
            .map_or(false, |id| self.registers.contains(id))
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id.index()]
    }

    pub fn layer_mut(&mut self, id: LayerId) -> &mut Layer {
        &mut self.layers[id.index()]
    }

    pub fn id(&self, name: &str) -> Result<LayerId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| NvmError::UnknownLayer(name.to_string()))
    }

    pub fn name(&self, id: LayerId) -> &str {
        self.layers[id.index()].name()
    }

    /// Pathways that carry activity when their Copy gate is open
    pub fn flows(&self) -> &[Pathway] {
        &self.flows
    }

    /// Pathways written at runtime when their Learn gate is open
    pub fn plastic(&self) -> &[Pathway] {
        &self.plastic
    }

    pub fn gate_map(&self) -> &GateMap {
        &self.gate_map
    }

    pub fn rule(&self) -> LearningRule {
        self.rule
    }

    /// Seed every random pattern of this network derives from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn gate_index(&self, key: &GateKey) -> Result<usize> {
        self.gate_map
            .index_of(key)
            .ok_or_else(|| NvmError::UnknownGate(self.describe_gate(key)))
    }

    pub fn describe_gate(&self, key: &GateKey) -> String {
        format!("({}<-{}:{})", self.name(key.to), self.name(key.from), key.mode.symbol())
    }

    pub fn describe(&self, pathway: &Pathway) -> String {
        format!("{}<-{}", self.name(pathway.to), self.name(pathway.from))
    }
}

fn copy_pathways(c: &ControlLayers, registers: &[LayerId]) -> Vec<Pathway> {
    let p = Pathway::new;
    let mut flows = vec![p(c.gh, c.gh), p(c.go, c.gh)];
    for cond in c.conditions() {
        flows.push(p(c.gh, cond));
        flows.push(p(c.go, cond));
    }

    flows.extend([p(c.ip, c.ip), p(c.opc, c.ip), p(c.op1, c.ip), p(c.op2, c.ip), p(c.ip, c.op1)]);
    for &r in registers {
        flows.extend([p(r, c.op2), p(c.ip, r), p(c.ci, r), p(r, c.mf), p(c.mf, r), p(c.mb, r)]);
    }
    for &to in registers {
        for &from in registers {
            flows.push(p(to, from));
        }
    }

    flows.extend([p(c.ci, c.op2), p(c.co, c.ci)]);
    flows.extend([p(c.sf, c.sf), p(c.sb, c.sf), p(c.sb, c.sb), p(c.sf, c.sb), p(c.ip, c.sf)]);
    flows.extend([
        p(c.mf, c.mf),
        p(c.mb, c.mf),
        p(c.mb, c.mb),
        p(c.mf, c.mb),
        p(c.mp, c.mb),
        p(c.mf, c.mp),
        p(c.mb, c.mp),
        p(c.mp, c.mf),
    ]);
    flows
}

fn plastic_pathways(c: &ControlLayers, registers: &[LayerId]) -> Vec<Pathway> {
    let mut plastic = vec![Pathway::new(c.ip, c.sf), Pathway::new(c.co, c.ci)];
    for &r in registers {
        plastic.extend([Pathway::new(r, c.mf), Pathway::new(c.mf, r), Pathway::new(c.mb, r)]);
    }
    plastic.push(Pathway::new(c.mp, c.mf));
    plastic
}
