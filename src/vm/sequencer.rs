//! Gate Sequencer - builds the control automaton one transit at a time
//!
//! A control state is the pair (gate pattern on `go`, hidden pattern on `gh`).
//! Each transit is one training pair for the recurrent control pathways:
//!
//! ```text
//! [old hidden ; condition blocks]  ->  new hidden   (gh <- gh, gh <- c)
//! [old hidden ; condition blocks]  ->  new gates    (go <- gh, go <- c)
//! ```
//!
//! A condition `(layer, token)` places the token's pattern in that layer's
//! block and leaves the other blocks zero, which is exactly what the runtime
//! sees when only `(gh, layer)` and `(go, layer)` are open. A transit is keyed
//! on at most one condition layer: summed biases from two layers cannot select
//! an AND of tokens, so two-operand dispatch is keyed operand by operand.
//!
//! A condition layer is used one of two ways:
//!
//! - **select**: read by a single state, whose branches may lead anywhere
//!   ([`GateSequencer::add_transit`] with a condition).
//! - **dispatch**: read by many states over the same tokens. The inputs
//!   `[h_a; t_0] - [h_a; t_1] == [h_b; t_0] - [h_b; t_1]` are linearly
//!   dependent, so the targets must be additive in (state, token).
//!   [`GateSequencer::dispatch`] composes them that way and lands in a
//!   default-gated state that a plain transit then leaves.
//!
//! Nothing is learned until [`GateSequencer::flash`], which solves every
//! transit jointly.

use std::collections::HashMap;

use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{NvmError, Result};
use crate::gate::GateKey;
use crate::layer::Pattern;
use crate::learning::flash;
use crate::network::{Connection, LayerId, Network, Pathway, Weights};

/// One control micro-state
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    gates: Pattern,
    hidden: Pattern,
}

impl ControlState {
    pub fn gates(&self) -> &Pattern {
        &self.gates
    }

    pub fn hidden(&self) -> &Pattern {
        &self.hidden
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransitKey {
    gates: Vec<bool>,
    hidden: Vec<bool>,
    condition: Option<(LayerId, String)>,
}

/// How a condition layer keys the automaton
#[derive(Debug, Clone, PartialEq, Eq)]
enum Keying {
    /// Read by the one state with these hidden bits
    Select(Vec<bool>),
    /// Read by any number of states through composed targets
    Dispatch,
}

#[derive(Debug, Clone)]
struct Transit {
    input: Array1<f64>,
    target: ControlState,
}

/// Flashed control automaton
#[derive(Debug, Clone)]
pub struct ControlFlash {
    pub weights: Weights,
    pub errors: usize,
    pub transits: usize,
}

/// Builder for the control automaton of one configuration
pub struct GateSequencer<'n> {
    net: &'n mut Network,
    transits: Vec<Transit>,
    targets: HashMap<TransitKey, usize>,
    /// (layer, offset into the joint input)
    blocks: Vec<(LayerId, usize)>,
    input_size: usize,
    keying: HashMap<LayerId, Keying>,
    /// Per dispatch layer sign offset
    offsets: HashMap<LayerId, Array1<f64>>,
    /// Per (dispatch layer, token) sign code
    codes: HashMap<(LayerId, String), Array1<f64>>,
    rng: StdRng,
    context: String,
    fresh: usize,
}

impl<'n> GateSequencer<'n> {
    pub fn new(net: &'n mut Network) -> Self {
        let c = *net.control();
        let rng = StdRng::seed_from_u64(net.seed().wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD15B_A7C4);
        let mut offset = net.layer(c.gh).size();
        let mut blocks = Vec::new();
        for layer in c.conditions() {
            blocks.push((layer, offset));
            offset += net.layer(layer).size();
        }
        Self {
            net,
            transits: Vec::new(),
            targets: HashMap::new(),
            blocks,
            input_size: offset,
            keying: HashMap::new(),
            offsets: HashMap::new(),
            codes: HashMap::new(),
            rng,
            context: "control".to_string(),
            fresh: 0,
        }
    }

    /// Name used for fresh states and in diagnostics
    pub fn set_context(&mut self, context: &str) {
        self.context = context.to_string();
    }

    pub fn transit_count(&self) -> usize {
        self.transits.len()
    }

    /// Gate pattern opening `ungate` plus the default keys
    pub fn make_gates(&self, ungate: &[GateKey]) -> Result<Pattern> {
        let c = self.net.control();
        let go = self.net.layer(c.go);
        let act = *go.activator();
        let mut gates = Array1::from_elem(go.size(), act.off());
        for key in c.default_gates().iter().chain(ungate) {
            gates[self.net.gate_index(key)?] = act.on();
        }
        Ok(gates)
    }

    /// Entry state with default gates and a named hidden pattern
    pub fn initial(&mut self, name: &str) -> Result<ControlState> {
        let state = ControlState {
            gates: self.make_gates(&[])?,
            hidden: self.fresh_hidden(),
        };
        self.name(&state, name);
        Ok(state)
    }

    /// Register `old --condition--> target`.
    ///
    /// Without `target` the new state opens exactly `ungate` (plus defaults)
    /// and gets a fresh hidden pattern; with it, `target` is used verbatim and
    /// `ungate` is ignored.
    pub fn add_transit(
        &mut self,
        ungate: &[GateKey],
        old: &ControlState,
        condition: Option<(LayerId, &str)>,
        target: Option<&ControlState>,
    ) -> Result<ControlState> {
        self.check_condition(old, condition)?;
        if let Some((layer, _)) = condition {
            let reader = Keying::Select(self.net.layer(self.net.control().gh).activator().quantize(&old.hidden));
            self.claim(old, layer, reader)?;
        }

        let c = *self.net.control();
        let key = self.key(old, condition);

        if let Some(&existing) = self.targets.get(&key) {
            let previous = &self.transits[existing].target;
            if let Some(target) = target {
                if self.same_state(previous, target) {
                    return Ok(previous.clone());
                }
            }
            return Err(NvmError::TransitConflict {
                context: self.context.clone(),
                state: self.net.layer(c.gh).decode(&old.hidden).to_string(),
                condition: self.describe_condition(condition),
            });
        }

        let target = match target {
            Some(target) => target.clone(),
            None => ControlState {
                gates: self.make_gates(ungate)?,
                hidden: self.fresh_hidden(),
            },
        };
        let input = self.joint_input(old, condition);
        self.targets.insert(key, self.transits.len());
        self.transits.push(Transit {
            input,
            target: target.clone(),
        });
        Ok(target)
    }

    /// Register `old --token in layer--> composed state` for a dispatch layer.
    ///
    /// The new hidden pattern is `squash(mid + u * (a + b - o))` per unit,
    /// with `a` the old state's signs, `b` a random sign code for the token
    /// and `o` a random sign offset for the layer. The pre-activation is
    /// additive in state and token, so the joint solve can fit it however
    /// many states share the layer. The offset makes the sign of each unit a
    /// majority of `a`, `b` and `-o`, so every (state, token) pair lands on
    /// its own pattern. `u` is a third of the saturating pre-activation,
    /// which keeps every target inside the invertible range.
    ///
    /// The new state has default gates only.
    pub fn dispatch(&mut self, old: &ControlState, layer: LayerId, token: &str) -> Result<ControlState> {
        let condition = Some((layer, token));
        self.check_condition(old, condition)?;
        self.claim(old, layer, Keying::Dispatch)?;

        let key = self.key(old, condition);
        if let Some(&existing) = self.targets.get(&key) {
            return Ok(self.transits[existing].target.clone());
        }

        let gh = self.net.control().gh;
        let act = *self.net.layer(gh).activator();
        let size = self.net.layer(gh).size();
        let mid = act.inverse(act.midpoint());
        let unit = (act.inverse(act.on()) - mid) / 3.0;

        let rng = &mut self.rng;
        let offset = self.offsets.entry(layer).or_insert_with(|| signs(rng, size)).clone();
        let code = self
            .codes
            .entry((layer, token.to_string()))
            .or_insert_with(|| signs(rng, size))
            .clone();
        let hidden = Array1::from_shape_fn(size, |i| {
            let a = if act.is_on(old.hidden[i]) { 1.0 } else { -1.0 };
            act.squash(mid + unit * (a + code[i] - offset[i]))
        });

        let target = ControlState {
            gates: self.make_gates(&[])?,
            hidden,
        };
        let name = self.fresh_name();
        self.name(&target, &name);

        let input = self.joint_input(old, condition);
        self.targets.insert(key, self.transits.len());
        self.transits.push(Transit {
            input,
            target: target.clone(),
        });
        Ok(target)
    }

    /// Chain `num_iters` transits with default gates only, letting data layers settle
    pub fn stabilize(&mut self, old: &ControlState, num_iters: usize) -> Result<ControlState> {
        let mut state = old.clone();
        for _ in 0..num_iters {
            state = self.add_transit(&[], &state, None, None)?;
        }
        Ok(state)
    }

    /// Give `state` a readable name on the hidden layer
    pub fn name(&mut self, state: &ControlState, name: &str) {
        let gh = self.net.control().gh;
        self.net.layer_mut(gh).encode_as(name, &state.hidden);
    }

    /// Solve every transit jointly and split the result per pathway
    pub fn flash(self, verbose: bool) -> Result<ControlFlash> {
        let c = *self.net.control();
        let hidden = self.net.layer(c.gh);
        let gates = self.net.layer(c.go);
        let p = self.transits.len();

        let x = Array2::from_shape_fn((self.input_size, p), |(i, j)| self.transits[j].input[i]);
        let next_hidden =
            Array2::from_shape_fn((hidden.size(), p), |(i, j)| self.transits[j].target.hidden[i]);
        let next_gates =
            Array2::from_shape_fn((gates.size(), p), |(i, j)| self.transits[j].target.gates[i]);

        let from = *hidden.activator();
        let rule = self.net.rule();
        let recurrent = flash(
            rule,
            &Array2::zeros((hidden.size(), self.input_size)),
            &Array1::zeros(hidden.size()),
            &x,
            &next_hidden,
            &from,
            hidden.activator(),
        );
        let readout = flash(
            rule,
            &Array2::zeros((gates.size(), self.input_size)),
            &Array1::zeros(gates.size()),
            &x,
            &next_gates,
            &from,
            gates.activator(),
        );

        let mut weights = Weights::new();
        for (to, joint) in [(c.gh, &recurrent), (c.go, &readout)] {
            let gh_size = hidden.size();
            weights.insert(
                Pathway::new(to, c.gh),
                Connection::new(joint.weights.slice(s![.., ..gh_size]).to_owned(), joint.bias.clone()),
            );
            for &(layer, offset) in &self.blocks {
                let size = self.net.layer(layer).size();
                weights.insert(
                    Pathway::new(to, layer),
                    Connection::new(
                        joint.weights.slice(s![.., offset..offset + size]).to_owned(),
                        Array1::zeros(joint.bias.len()),
                    ),
                );
            }
        }

        let errors = recurrent.errors + readout.errors;
        if errors > 0 {
            log::warn!(
                "control automaton: {} of {} transits not recalled (hidden {}, gates {})",
                errors,
                p,
                recurrent.errors,
                readout.errors
            );
        } else if verbose {
            log::info!("control automaton: {} transits flashed", p);
        } else {
            log::debug!("control automaton: {} transits flashed", p);
        }

        Ok(ControlFlash {
            weights,
            errors,
            transits: p,
        })
    }

    fn fresh_name(&mut self) -> String {
        let name = format!("{}.{}", self.context, self.fresh);
        self.fresh += 1;
        name
    }

    fn fresh_hidden(&mut self) -> Pattern {
        let name = self.fresh_name();
        let gh = self.net.control().gh;
        self.net.layer_mut(gh).encode(&name)
    }

    fn key(&self, old: &ControlState, condition: Option<(LayerId, &str)>) -> TransitKey {
        let c = self.net.control();
        TransitKey {
            gates: self.net.layer(c.go).activator().quantize(&old.gates),
            hidden: self.net.layer(c.gh).activator().quantize(&old.hidden),
            condition: condition.map(|(layer, token)| (layer, token.to_string())),
        }
    }

    /// Record how `layer` keys the automaton, rejecting a second kind of use
    fn claim(&mut self, old: &ControlState, layer: LayerId, keying: Keying) -> Result<()> {
        match self.keying.get(&layer) {
            None => {
                self.keying.insert(layer, keying);
                Ok(())
            }
            Some(existing) if *existing == keying => Ok(()),
            Some(_) => Err(NvmError::SharedCondition {
                context: self.context.clone(),
                state: self.net.layer(self.net.control().gh).decode(&old.hidden).to_string(),
                layer: self.net.name(layer).to_string(),
            }),
        }
    }

    fn joint_input(&mut self, old: &ControlState, condition: Option<(LayerId, &str)>) -> Array1<f64> {
        let mut input = Array1::zeros(self.input_size);
        input.slice_mut(s![..old.hidden.len()]).assign(&old.hidden);
        if let Some((layer, token)) = condition {
            if let Some(&(_, offset)) = self.blocks.iter().find(|(l, _)| *l == layer) {
                let pattern = self.net.layer_mut(layer).encode(token);
                input.slice_mut(s![offset..offset + pattern.len()]).assign(&pattern);
            }
        }
        input
    }

    fn check_condition(&self, old: &ControlState, condition: Option<(LayerId, &str)>) -> Result<()> {
        let c = self.net.control();
        let go = self.net.layer(c.go).activator();
        let state = self.net.layer(c.gh).decode(&old.hidden).to_string();

        if let Some((layer, _)) = condition {
            if !self.blocks.iter().any(|(l, _)| *l == layer) {
                return Err(NvmError::ConditionNotGated {
                    context: self.context.clone(),
                    state,
                    layer: self.net.name(layer).to_string(),
                });
            }
        }

        for &(layer, _) in &self.blocks {
            let open = go.is_on(old.gates[self.net.gate_index(&GateKey::copy(c.gh, layer))?]);
            let keyed = condition.map_or(false, |(l, _)| l == layer);
            if keyed && !open {
                return Err(NvmError::ConditionNotGated {
                    context: self.context.clone(),
                    state,
                    layer: self.net.name(layer).to_string(),
                });
            }
            if open && !keyed {
                return Err(NvmError::UnconditionedBias {
                    context: self.context.clone(),
                    state,
                    layer: self.net.name(layer).to_string(),
                });
            }
        }
        Ok(())
    }

    fn same_state(&self, a: &ControlState, b: &ControlState) -> bool {
        let c = self.net.control();
        let go = self.net.layer(c.go).activator();
        let gh = self.net.layer(c.gh).activator();
        go.quantize(&a.gates) == go.quantize(&b.gates) && gh.quantize(&a.hidden) == gh.quantize(&b.hidden)
    }

    fn describe_condition(&self, condition: Option<(LayerId, &str)>) -> String {
        match condition {
            Some((layer, token)) => format!("{}={}", self.net.name(layer), token),
            None => "no condition".to_string(),
        }
    }
}

fn signs(rng: &mut StdRng, size: usize) -> Array1<f64> {
    (0..size).map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 }).collect()
}
