//! Machine - runtime driver for a compiled network
//!
//! ## Tick
//!
//! ```text
//! open[k]  = go[k] > midpoint
//! pre(L)   = sum over open (L <- F, Copy) of  W x_F + b
//!          + recurrent(x_L)                      if (L, L, Decay) is closed
//! x_L'     = squash(pre(L))
//! learn    (T <- F, Learn) open: store x_F -> x_T  (old activities)
//! ```
//!
//! Every layer reads the old activities before any is replaced. Learning is
//! applied after the update and only affects the next tick.
//!
//! ## Step
//!
//! One instruction runs from the `start` hub back to `start`. `step` ticks
//! until the control layer decodes to `start` or `exit`, or the tick budget
//! runs out.

use std::collections::BTreeMap;

use crate::config::NvmConfig;
use crate::error::{NvmError, Result};
use crate::gate::GateKey;
use crate::layer::{Pattern, UNKNOWN_TOKEN};
use crate::network::{LayerId, Network, Pathway, Weights};

use super::assembler::ProgramAssembler;
use super::devices::{self, Plasticity, FALSE_TOKEN};
use super::instruction_set::{self, InstructionSet};
use super::program::{parse, Program};

/// How one instruction step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Back at `start`, ready for the next instruction
    Completed { ticks: usize },
    /// Reached the `exit` state
    Exited { ticks: usize },
    /// Neither hub reached within the budget
    Stalled { ticks: usize },
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited { steps: usize },
    Stalled { steps: usize },
    StepLimit { steps: usize },
}

/// Neural virtual machine
pub struct Machine {
    config: NvmConfig,
    net: Network,
    weights: Weights,
    plasticity: BTreeMap<Pathway, Plasticity>,
    /// Per layer: inbound copy pathways and their gate index
    inbound: Vec<Vec<(Pathway, usize)>>,
    /// Per layer: gate index of its decay key
    decay: Vec<usize>,
    learning: Vec<(Pathway, usize)>,
    activity: Vec<Pattern>,
    assembler: ProgramAssembler,
    control: InstructionSet,
    build_errors: usize,
    ticks: u64,
}

impl Machine {
    /// Build the network, flash pointer devices and compile the instruction set
    pub fn new(config: NvmConfig) -> Result<Self> {
        let mut net = Network::new(&config)?;
        let pointers = devices::flash_pointers(&mut net, config.pointer_slots)?;
        let control = instruction_set::compile(&mut net, false)?;
        let plasticity = devices::plasticity(&mut net);

        let mut weights = pointers.weights;
        weights.extend(control.weights.iter().map(|(p, w)| (*p, w.clone())));
        for (pathway, rule) in &plasticity {
            weights.insert(*pathway, devices::baseline(&net, pathway, rule));
        }

        let build_errors = pointers.errors + control.errors;
        if build_errors > 0 {
            log::warn!("machine built with {} recall errors", build_errors);
        }
        log::info!(
            "machine: {} layers, {} gates, {} control transits",
            net.layers().len(),
            net.gate_map().len(),
            control.transits
        );

        let mut inbound = vec![Vec::new(); net.layers().len()];
        for pathway in net.flows() {
            let gate = net.gate_index(&GateKey::copy(pathway.to, pathway.from))?;
            inbound[pathway.to.index()].push((*pathway, gate));
        }
        let decay = (0..net.layers().len())
            .map(|i| net.gate_index(&GateKey::decay(LayerId(i as u16))))
            .collect::<Result<Vec<_>>>()?;
        let learning = net
            .plastic()
            .iter()
            .map(|p| net.gate_index(&GateKey::learn(p.to, p.from)).map(|gate| (*p, gate)))
            .collect::<Result<Vec<_>>>()?;
        let activity = net.layers().iter().map(|l| l.blank()).collect();

        Ok(Self {
            config,
            net,
            weights,
            plasticity,
            inbound,
            decay,
            learning,
            activity,
            assembler: ProgramAssembler::new(),
            control,
            build_errors,
            ticks: 0,
        })
    }

    pub fn config(&self) -> &NvmConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.net
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Recall errors from pointer and control flashes
    pub fn build_errors(&self) -> usize {
        self.build_errors
    }

    /// Ticks since the last load
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Parse and assemble `source` under `name`; returns the recall error count
    pub fn assemble(&mut self, source: &str, name: &str) -> Result<usize> {
        let program = parse(source, &self.net.register_names())?;
        self.assemble_program(&program, name)
    }

    pub fn assemble_program(&mut self, program: &Program, name: &str) -> Result<usize> {
        let assembly = self
            .assembler
            .assemble(&mut self.net, program, name, self.config.orthogonal, false)?;
        self.weights.extend(assembly.weights);
        Ok(assembly.errors)
    }

    /// Reset every layer and point `ip` at the entry of `program`
    pub fn load<S: AsRef<str>>(&mut self, program: &str, registers: &[(S, S)]) -> Result<()> {
        let c = *self.net.control();
        let entry = self
            .net
            .layer(c.ip)
            .pattern(program)
            .cloned()
            .filter(|_| self.assembler.programs().iter().any(|p| p == program))
            .ok_or_else(|| NvmError::UnknownProgram(program.to_string()))?;

        for (i, layer) in self.net.layers().iter().enumerate() {
            self.activity[i] = layer.blank();
        }
        self.activity[c.gh.index()] = self.control.start.hidden().clone();
        self.activity[c.go.index()] = self.control.start.gates().clone();
        self.activity[c.ip.index()] = entry;
        self.activity[c.co.index()] = self.net.layer_mut(c.co).encode(FALSE_TOKEN);
        let origin = devices::slot_token(0);
        for layer in [c.sf, c.sb, c.mf, c.mb, c.mp] {
            self.activity[layer.index()] = self.net.layer_mut(layer).encode(&origin);
        }

        for (register, token) in registers {
            let register = register.as_ref();
            if !self.net.is_register(register) {
                return Err(NvmError::UnknownLayer(register.to_string()));
            }
            let id = self.net.id(register)?;
            self.activity[id.index()] = self.net.layer_mut(id).encode(token.as_ref());
        }

        for (pathway, rule) in &self.plasticity {
            self.weights
                .insert(*pathway, devices::baseline(&self.net, pathway, rule));
        }
        self.ticks = 0;
        log::debug!("loaded {}", program);
        Ok(())
    }

    /// One synchronous update of every layer
    pub fn tick(&mut self) {
        let go = self.net.control().go;
        let go_act = *self.net.layer(go).activator();
        let open: Vec<bool> = self.activity[go.index()].iter().map(|&v| go_act.is_on(v)).collect();

        let mut next = Vec::with_capacity(self.activity.len());
        for (i, layer) in self.net.layers().iter().enumerate() {
            let act = *layer.activator();
            let mut pre = if open[self.decay[i]] {
                Pattern::zeros(layer.size())
            } else {
                self.activity[i].mapv(|v| act.recurrent(v))
            };
            for &(pathway, gate) in &self.inbound[i] {
                if !open[gate] {
                    continue;
                }
                if let Some(conn) = self.weights.get(&pathway) {
                    pre += &conn.weights.dot(&self.activity[pathway.from.index()]);
                    pre += &conn.bias;
                }
            }
            next.push(pre.mapv(|v| act.squash(v)));
        }

        let rule = self.net.rule();
        for &(pathway, gate) in &self.learning {
            if !open[gate] {
                continue;
            }
            let (Some(plasticity), Some(conn)) =
                (self.plasticity.get(&pathway), self.weights.get_mut(&pathway))
            else {
                continue;
            };
            devices::learn(
                rule,
                conn,
                plasticity,
                &self.activity[pathway.from.index()],
                &self.activity[pathway.to.index()],
                self.net.layer(pathway.from).activator(),
                self.net.layer(pathway.to).activator(),
            );
        }

        self.activity = next;
        self.ticks += 1;
    }

    /// Run one instruction
    pub fn step(&mut self, max_ticks: usize) -> StepOutcome {
        for t in 1..=max_ticks {
            self.tick();
            if self.at_exit() {
                return StepOutcome::Exited { ticks: t };
            }
            if self.at_start() {
                return StepOutcome::Completed { ticks: t };
            }
        }
        log::warn!(
            "no control hub reached after {} ticks (gh = {})",
            max_ticks,
            self.decode_id(self.net.control().gh)
        );
        StepOutcome::Stalled { ticks: max_ticks }
    }

    /// Step until exit, a stall, or `max_steps` instructions
    pub fn run(&mut self, max_steps: usize) -> RunOutcome {
        if self.at_exit() {
            return RunOutcome::Exited { steps: 0 };
        }
        for steps in 1..=max_steps {
            match self.step(self.config.max_ticks) {
                StepOutcome::Exited { .. } => return RunOutcome::Exited { steps },
                StepOutcome::Stalled { .. } => return RunOutcome::Stalled { steps },
                StepOutcome::Completed { .. } => {}
            }
        }
        RunOutcome::StepLimit { steps: max_steps }
    }

    pub fn at_start(&self) -> bool {
        self.decode_id(self.net.control().gh) == "start"
    }

    pub fn at_ready(&self) -> bool {
        self.decode_id(self.net.control().gh) == "ready"
    }

    pub fn at_exit(&self) -> bool {
        self.decode_id(self.net.control().gh) == "exit"
    }

    /// Token currently held by the named layer
    pub fn decode(&self, layer: &str) -> Result<&str> {
        Ok(self.decode_id(self.net.id(layer)?))
    }

    fn decode_id(&self, id: LayerId) -> &str {
        self.net.layer(id).decode(&self.activity[id.index()])
    }

    /// Every layer except the gate output, decoded
    pub fn decode_state(&self) -> BTreeMap<String, String> {
        let go = self.net.control().go;
        self.net
            .layers()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != go.index())
            .map(|(i, l)| (l.name().to_string(), l.decode(&self.activity[i]).to_string()))
            .collect()
    }

    /// One-line summary: pointer, loaded instruction and registers
    pub fn state_string(&self) -> String {
        let c = self.net.control();
        let registers: Vec<String> = self
            .net
            .registers()
            .iter()
            .map(|&r| format!("{}:{}", self.net.name(r), self.decode_id(r)))
            .collect();
        format!(
            "ip {}: {} {} {}, {}",
            self.decode_id(c.ip),
            self.decode_id(c.opc),
            self.decode_id(c.op1),
            self.decode_id(c.op2),
            registers.join(",")
        )
    }

    pub fn activity(&self, layer: &str) -> Result<&Pattern> {
        Ok(&self.activity[self.net.id(layer)?.index()])
    }

    /// Overwrite a layer's activity
    pub fn set_activity(&mut self, layer: &str, pattern: Pattern) -> Result<()> {
        let id = self.net.id(layer)?;
        let size = self.net.layer(id).size();
        if pattern.len() != size {
            return Err(NvmError::ShapeMismatch {
                expected: vec![size],
                actual: vec![pattern.len()],
            });
        }
        self.activity[id.index()] = pattern;
        Ok(())
    }

    /// Whether the control layer decodes to a known state
    pub fn control_known(&self) -> bool {
        self.decode_id(self.net.control().gh) != UNKNOWN_TOKEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        let m = Machine::new(NvmConfig::default()).unwrap();
        assert_eq!(m.build_errors(), 0);
        m
    }

    #[test]
    fn test_nop_then_exit() {
        let mut m = machine();
        assert_eq!(m.assemble("start: nop\nend: exit", "test").unwrap(), 0);
        m.load::<&str>("test", &[]).unwrap();
        assert!(m.at_start());

        let mut steps = 0;
        while !m.at_exit() && steps < 3 {
            for _ in 0..m.config().max_ticks {
                m.tick();
                assert!(m.control_known(), "control drifted at tick {}", m.ticks());
                if m.at_start() || m.at_exit() {
                    break;
                }
            }
            steps += 1;
        }
        assert!(m.at_exit());
        assert_eq!(steps, 2);

        // exit is absorbing
        assert!(matches!(m.step(5), StepOutcome::Exited { ticks: 1 }));
    }

    #[test]
    fn test_moves() {
        let mut m = machine();
        let source = "movv r1 A\nmovd r2 r1\nexit";
        assert_eq!(m.assemble(source, "test").unwrap(), 0);
        m.load("test", &[("r1", "C"), ("r2", "C")]).unwrap();
        assert_eq!(m.decode("r1").unwrap(), "C");

        assert!(matches!(m.step(50), StepOutcome::Completed { .. }));
        assert_eq!(m.decode("r1").unwrap(), "A");
        assert_eq!(m.decode("r2").unwrap(), "C");

        assert_eq!(m.run(10), RunOutcome::Exited { steps: 2 });
        assert_eq!(m.decode("r1").unwrap(), "A");
        assert_eq!(m.decode("r2").unwrap(), "A");
        assert_eq!(m.state_string(), "ip test.2: exit null null, r0:?,r1:A,r2:A");
    }

    #[test]
    fn test_nested_calls_return() {
        let mut m = machine();
        let source = r#"
            subv f1
            exit
        f1: subv f2
            ret
        f2: subv f3
            ret
        f3: subv f4
            ret
        f4: nop
            ret
        "#;
        assert_eq!(m.assemble(source, "calls").unwrap(), 0);
        m.load::<&str>("calls", &[]).unwrap();

        let mut returns: Vec<String> = Vec::new();
        let mut depth = 0;
        let mut checked = 0;
        let mut pending_ret = false;
        for _ in 0..2000 {
            m.tick();
            if m.at_ready() {
                match m.decode("opc").unwrap() {
                    "subv" => {
                        returns.push(m.decode("ip").unwrap().to_string());
                        depth = depth.max(returns.len());
                    }
                    "ret" => pending_ret = true,
                    _ => {}
                }
            }
            if pending_ret && m.at_start() {
                let expected = returns.pop().expect("ret without subv");
                assert_eq!(m.decode("ip").unwrap(), expected);
                pending_ret = false;
                checked += 1;
            }
            if m.at_exit() {
                break;
            }
        }
        assert!(m.at_exit());
        assert_eq!(depth, 4);
        assert_eq!(checked, 4);
        assert!(returns.is_empty());
    }

    #[test]
    fn test_compare_and_branch() {
        let mut m = machine();
        let source = r#"
            cmpv r0 A
            jie same
            movv r1 differ
            exit
        same: movv r1 equal
            exit
        "#;
        assert_eq!(m.assemble(source, "cmp").unwrap(), 0);

        m.load("cmp", &[("r0", "A")]).unwrap();
        assert!(matches!(m.run(10), RunOutcome::Exited { .. }));
        assert_eq!(m.decode("r1").unwrap(), "equal");

        m.load("cmp", &[("r0", "equal")]).unwrap();
        assert!(matches!(m.run(10), RunOutcome::Exited { .. }));
        assert_eq!(m.decode("r1").unwrap(), "differ");
    }

    #[test]
    fn test_register_compare_and_jump() {
        let mut m = machine();
        let source = r#"
            movv r2 away
            cmpd r0 r1
            jie same
            jmpd r2
        same: movv r0 equal
            exit
        away: movv r0 apart
            exit
        "#;
        assert_eq!(m.assemble(source, "cmpd").unwrap(), 0);

        m.load("cmpd", &[("r0", "equal"), ("r1", "equal")]).unwrap();
        assert!(matches!(m.run(10), RunOutcome::Exited { .. }));
        assert_eq!(m.decode("r0").unwrap(), "equal");
        assert_eq!(m.decode("r2").unwrap(), "cmpd:away");

        m.load("cmpd", &[("r0", "apart"), ("r1", "equal")]).unwrap();
        assert!(matches!(m.run(10), RunOutcome::Exited { .. }));
        assert_eq!(m.decode("r0").unwrap(), "apart");
    }

    #[test]
    fn test_programs_keep_their_labels() {
        let mut m = machine();
        assert_eq!(m.assemble("jmpv skip\nmovv r0 bad\nskip: movv r0 one\nexit", "one").unwrap(), 0);
        assert_eq!(m.assemble("skip: movv r0 two\nexit", "two").unwrap(), 0);

        m.load::<&str>("one", &[]).unwrap();
        assert_eq!(m.run(10), RunOutcome::Exited { steps: 3 });
        assert_eq!(m.decode("r0").unwrap(), "one");

        m.load::<&str>("two", &[]).unwrap();
        assert_eq!(m.run(10), RunOutcome::Exited { steps: 2 });
        assert_eq!(m.decode("r0").unwrap(), "two");
    }

    #[test]
    fn test_label_named_like_program_keeps_entry() {
        let mut m = machine();
        assert_eq!(m.assemble("movv r0 first\nmain: nop\nexit", "main").unwrap(), 0);
        m.load::<&str>("main", &[]).unwrap();
        assert_eq!(m.run(10), RunOutcome::Exited { steps: 3 });
        assert_eq!(m.decode("r0").unwrap(), "first");
        assert!(matches!(m.assemble("exit", "main.0"), Err(NvmError::Config(_))));
    }

    #[test]
    fn test_jump_target_settles() {
        let mut m = machine();
        assert_eq!(m.assemble("jmpv end\nnop\nend: exit", "jump").unwrap(), 0);
        let c = *m.network().control();
        let act = *m.network().layer(c.ip).activator();
        let target = m.network().layer(c.ip).pattern("jump:end").unwrap().clone();
        let halted = m.network().layer(c.gh).pattern("exit").unwrap().clone();
        let mid = act.midpoint();
        // every third unit pulled to a tenth of its distance from the midpoint
        let degraded = Pattern::from_shape_fn(target.len(), |i| {
            if i % 3 == 0 {
                mid + 0.1 * (target[i] - mid)
            } else {
                target[i]
            }
        });

        let land = |m: &mut Machine| {
            m.load::<&str>("jump", &[]).unwrap();
            for _ in 0..m.config().max_ticks {
                m.tick();
                if m.decode("ip").unwrap() == "jump:end" {
                    return;
                }
            }
            panic!("jump never landed");
        };

        // hold ip under default gates and watch it settle
        land(&mut m);
        let idle = m.control.start.gates().clone();
        m.set_activity("gh", halted).unwrap();
        m.set_activity("go", idle).unwrap();
        m.set_activity("ip", degraded.clone()).unwrap();

        let mut history = Vec::new();
        for _ in 0..=8 {
            let ip = m.activity("ip").unwrap();
            let settled = ip
                .iter()
                .zip(target.iter())
                .filter(|(x, t)| (*x - *t).abs() < act.pad())
                .count();
            let correct = act
                .quantize(ip)
                .iter()
                .zip(act.quantize(&target))
                .filter(|(a, b)| **a == *b)
                .count();
            history.push((settled, correct));
            assert!(m.at_exit());
            m.tick();
        }

        let full = target.len();
        let k = history
            .iter()
            .position(|&(settled, _)| settled == full)
            .expect("ip never settled within pad");
        assert!(k > 0, "degraded pattern already settled");
        for pair in history.windows(2) {
            assert!(pair[1].0 >= pair[0].0, "settling went backwards: {:?}", history);
            assert!(pair[1].1 >= pair[0].1, "decoding went backwards: {:?}", history);
        }
        assert!(history[k..].iter().all(|&(settled, correct)| settled == full && correct == full));

        // a degraded landing still runs to completion
        land(&mut m);
        m.set_activity("ip", degraded).unwrap();
        assert!(matches!(m.run(5), RunOutcome::Exited { .. }));
    }

    #[test]
    fn test_memory_stream() {
        let mut m = machine();
        let source = r#"
            movv r0 A
            mem r0
            nxt
            movv r0 B
            mem r0
            prv
            movv r0 C
            rem r0
            movd r1 r0
            nxt
            rem r0
            exit
        "#;
        assert_eq!(m.assemble(source, "mem").unwrap(), 0);
        m.load::<&str>("mem", &[]).unwrap();
        assert!(matches!(m.run(20), RunOutcome::Exited { .. }));
        assert_eq!(m.decode("r1").unwrap(), "A");
        assert_eq!(m.decode("r0").unwrap(), "B");
        assert_eq!(m.decode("mf").unwrap(), "1");
    }

    #[test]
    fn test_pointer_reference() {
        let mut m = machine();
        let source = r#"
            ref r0
            nxt
            nxt
            drf r0
            exit
        "#;
        assert_eq!(m.assemble(source, "ptr").unwrap(), 0);
        m.load("ptr", &[("r0", "P")]).unwrap();
        assert!(matches!(m.run(10), RunOutcome::Exited { .. }));
        assert_eq!(m.decode("mf").unwrap(), "0");
        assert_eq!(m.decode("mb").unwrap(), "0");
    }

    #[test]
    fn test_load_errors() {
        let mut m = machine();
        assert!(matches!(m.load::<&str>("missing", &[]), Err(NvmError::UnknownProgram(_))));
        m.assemble("exit", "p").unwrap();
        assert!(matches!(m.load("p", &[("ip", "x")]), Err(NvmError::UnknownLayer(_))));
        assert!(matches!(m.assemble("bogus", "q"), Err(NvmError::Program(_))));
    }

    #[test]
    fn test_set_activity_checks_shape() {
        let mut m = Machine::new(NvmConfig::compact()).unwrap();
        let err = m.set_activity("r0", Pattern::zeros(3)).unwrap_err();
        assert!(matches!(err, NvmError::ShapeMismatch { .. }));
        assert!(m.set_activity("r0", Pattern::zeros(32)).is_ok());
        assert!(m.activity("r0").is_ok());
    }

    #[test]
    fn test_decode_state_lists_layers() {
        let mut m = machine();
        m.assemble("exit", "p").unwrap();
        m.load("p", &[("r0", "hello")]).unwrap();
        let state = m.decode_state();
        assert_eq!(state["gh"], "start");
        assert_eq!(state["ip"], "p");
        assert_eq!(state["co"], "false");
        assert_eq!(state["r0"], "hello");
        assert!(!state.contains_key("go"));
    }
}
