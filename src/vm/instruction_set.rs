//! Instruction-set compiler - the control automaton for every opcode
//!
//! ```text
//! start --> load --> ready --opc=movv--> ... --> start
//!                          --opc=jie---> ... --> start
//!                          --opc=exit--> exit (self loop)
//! ```
//!
//! `load` copies the next instruction out of `ip`, `ready` reads the opcode.
//! Each opcode then runs its own short sequence of gate patterns and returns
//! to `start`. Register operands are dispatched on `op1`, then on `op2`, one
//! register per branch. Many states dispatch on the same operand layer, so
//! each dispatch lands in a composed default-gated state first and opens the
//! register's gates one tick later.

use crate::error::{NvmError, Result};
use crate::gate::{flow, GateKey};
use crate::network::{ControlLayers, LayerId, Network, Weights};

use super::opcode::Opcode;
use super::sequencer::{ControlState, GateSequencer};

/// Settle ticks after a jump lands in `ip`
const JUMP_SETTLE: usize = 3;
/// Settle ticks after a taken conditional branch
const BRANCH_SETTLE: usize = 5;

/// Flashed control automaton for the whole instruction set
#[derive(Debug, Clone)]
pub struct InstructionSet {
    pub weights: Weights,
    pub errors: usize,
    pub transits: usize,
    /// Hub every instruction starts from
    pub start: ControlState,
}

struct Hubs {
    c: ControlLayers,
    registers: Vec<(LayerId, String)>,
    start: ControlState,
    ready: ControlState,
}

/// Open `(gh, layer)` and `(go, layer)` so `layer` can key the next transit
fn bias(c: &ControlLayers, layer: LayerId) -> [GateKey; 2] {
    [GateKey::copy(c.gh, layer), GateKey::copy(c.go, layer)]
}

/// Leave `ready` on this opcode's token
fn enter(gs: &mut GateSequencer, hubs: &Hubs, opcode: Opcode, ungate: &[GateKey]) -> Result<ControlState> {
    let state = gs.add_transit(ungate, &hubs.ready, Some((hubs.c.opc, opcode.mnemonic())), None)?;
    gs.name(&state, opcode.mnemonic());
    Ok(state)
}

/// Dispatch `from` on the register token in `layer`, then open `ungate`
fn operand(
    gs: &mut GateSequencer,
    from: &ControlState,
    layer: LayerId,
    register: &str,
    ungate: &[GateKey],
) -> Result<ControlState> {
    let chosen = gs.dispatch(from, layer, register)?;
    gs.add_transit(ungate, &chosen, None, None)
}

/// Compile the control automaton of `net`'s configuration
pub fn compile(net: &mut Network, verbose: bool) -> Result<InstructionSet> {
    let c = *net.control();
    let registers: Vec<(LayerId, String)> = net
        .registers()
        .iter()
        .map(|&r| (r, net.name(r).to_string()))
        .collect();

    let mut gs = GateSequencer::new(net);
    gs.set_context("fetch");
    let start = gs.initial("start")?;
    let fetch = [flow(c.ip, c.ip), flow(c.opc, c.ip), flow(c.op1, c.ip), flow(c.op2, c.ip)].concat();
    let load = gs.add_transit(&fetch, &start, None, None)?;
    gs.name(&load, "load");
    let ready = gs.add_transit(&bias(&c, c.opc), &load, None, None)?;
    gs.name(&ready, "ready");

    let hubs = Hubs {
        c,
        registers,
        start,
        ready,
    };
    for opcode in Opcode::ALL {
        gs.set_context(opcode.mnemonic());
        compile_opcode(&mut gs, &hubs, opcode)?;
    }

    let flashed = gs.flash(verbose)?;
    Ok(InstructionSet {
        weights: flashed.weights,
        errors: flashed.errors,
        transits: flashed.transits,
        start: hubs.start,
    })
}

fn compile_opcode(gs: &mut GateSequencer, hubs: &Hubs, opcode: Opcode) -> Result<()> {
    let c = &hubs.c;
    let start = &hubs.start;
    let key = Some((c.opc, opcode.mnemonic()));

    match opcode {
        Opcode::Nop => {
            gs.add_transit(&[], &hubs.ready, key, Some(start))?;
        }
        Opcode::Exit => {
            let halted = gs.add_transit(&[], &hubs.ready, key, None)?;
            gs.name(&halted, "exit");
            gs.add_transit(&[], &halted, None, Some(&halted))?;
        }
        Opcode::Movv => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (r, name) in &hubs.registers {
                let copy = operand(gs, &entry, c.op1, name, &flow(*r, c.op2))?;
                gs.add_transit(&[], &copy, None, Some(start))?;
            }
        }
        Opcode::Movd => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (dst, dst_name) in &hubs.registers {
                let source = operand(gs, &entry, c.op1, dst_name, &bias(c, c.op2))?;
                for (src, src_name) in &hubs.registers {
                    let copy = operand(gs, &source, c.op2, src_name, &flow(*dst, *src))?;
                    gs.add_transit(&[], &copy, None, Some(start))?;
                }
            }
        }
        Opcode::Jmpv => {
            let jump = enter(gs, hubs, opcode, &flow(c.ip, c.op1))?;
            let settled = gs.stabilize(&jump, JUMP_SETTLE)?;
            gs.add_transit(&[], &settled, None, Some(start))?;
        }
        Opcode::Jmpd => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (r, name) in &hubs.registers {
                let jump = operand(gs, &entry, c.op1, name, &flow(c.ip, *r))?;
                let settled = gs.stabilize(&jump, JUMP_SETTLE)?;
                gs.add_transit(&[], &settled, None, Some(start))?;
            }
        }
        Opcode::Cmpv => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (r, name) in &hubs.registers {
                let first = operand(gs, &entry, c.op1, name, &flow(c.ci, *r))?;
                let learn = gs.add_transit(&[GateKey::learn(c.co, c.ci)], &first, None, None)?;
                let second = gs.add_transit(&flow(c.ci, c.op2), &learn, None, None)?;
                let result = gs.add_transit(&flow(c.co, c.ci), &second, None, None)?;
                gs.add_transit(&[], &result, None, Some(start))?;
            }
        }
        Opcode::Cmpd => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (a, a_name) in &hubs.registers {
                let first = operand(gs, &entry, c.op1, a_name, &flow(c.ci, *a))?;
                let learn = gs.add_transit(&[GateKey::learn(c.co, c.ci)], &first, None, None)?;
                let select = gs.add_transit(&bias(c, c.op2), &learn, None, None)?;
                for (b, b_name) in &hubs.registers {
                    let second = operand(gs, &select, c.op2, b_name, &flow(c.ci, *b))?;
                    let result = gs.add_transit(&flow(c.co, c.ci), &second, None, None)?;
                    gs.add_transit(&[], &result, None, Some(start))?;
                }
            }
        }
        Opcode::Jie => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.co))?;
            gs.add_transit(&[], &entry, Some((c.co, "false")), Some(start))?;
            let jump = gs.add_transit(&flow(c.ip, c.op1), &entry, Some((c.co, "true")), None)?;
            let settled = gs.stabilize(&jump, BRANCH_SETTLE)?;
            gs.add_transit(&[], &settled, None, Some(start))?;
        }
        Opcode::Subv => {
            let push = enter(gs, hubs, opcode, &[GateKey::learn(c.ip, c.sf)])?;
            let advance = gs.add_transit(&[flow(c.sf, c.sf), flow(c.sb, c.sf)].concat(), &push, None, None)?;
            let jump = gs.add_transit(&flow(c.ip, c.op1), &advance, None, None)?;
            let settled = gs.stabilize(&jump, JUMP_SETTLE)?;
            gs.add_transit(&[], &settled, None, Some(start))?;
        }
        Opcode::Subd => {
            let push = enter(gs, hubs, opcode, &[GateKey::learn(c.ip, c.sf)])?;
            let advance = gs.add_transit(&[flow(c.sf, c.sf), flow(c.sb, c.sf)].concat(), &push, None, None)?;
            let select = gs.add_transit(&bias(c, c.op1), &advance, None, None)?;
            for (r, name) in &hubs.registers {
                let jump = operand(gs, &select, c.op1, name, &flow(c.ip, *r))?;
                let settled = gs.stabilize(&jump, JUMP_SETTLE)?;
                gs.add_transit(&[], &settled, None, Some(start))?;
            }
        }
        Opcode::Ret => {
            let retreat = enter(gs, hubs, opcode, &[flow(c.sb, c.sb), flow(c.sf, c.sb)].concat())?;
            let jump = gs.add_transit(&flow(c.ip, c.sf), &retreat, None, None)?;
            gs.add_transit(&[], &jump, None, Some(start))?;
        }
        Opcode::Mem => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (r, name) in &hubs.registers {
                let write = operand(gs, &entry, c.op1, name, &[GateKey::learn(*r, c.mf)])?;
                gs.add_transit(&[], &write, None, Some(start))?;
            }
        }
        Opcode::Rem => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (r, name) in &hubs.registers {
                let read = operand(gs, &entry, c.op1, name, &flow(*r, c.mf))?;
                gs.add_transit(&[], &read, None, Some(start))?;
            }
        }
        Opcode::Nxt => {
            let step = enter(gs, hubs, opcode, &[flow(c.mf, c.mf), flow(c.mb, c.mf)].concat())?;
            gs.add_transit(&[], &step, None, Some(start))?;
        }
        Opcode::Prv => {
            let step = enter(gs, hubs, opcode, &[flow(c.mb, c.mb), flow(c.mf, c.mb)].concat())?;
            gs.add_transit(&[], &step, None, Some(start))?;
        }
        Opcode::Ref => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (r, name) in &hubs.registers {
                let learn = [GateKey::learn(c.mf, *r), GateKey::learn(c.mb, *r)];
                let bind = operand(gs, &entry, c.op1, name, &learn)?;
                gs.add_transit(&[], &bind, None, Some(start))?;
            }
        }
        Opcode::Drf => {
            let entry = enter(gs, hubs, opcode, &bias(c, c.op1))?;
            for (r, name) in &hubs.registers {
                let follow = [flow(c.mf, *r), flow(c.mb, *r)].concat();
                let deref = operand(gs, &entry, c.op1, name, &follow)?;
                gs.add_transit(&[], &deref, None, Some(start))?;
            }
        }
        Opcode::Mref => {
            let entry = enter(gs, hubs, opcode, &[bias(c, c.op1), flow(c.mp, c.mb)].concat())?;
            let mut converge: Option<ControlState> = None;
            for (r, name) in &hubs.registers {
                let follow = [flow(c.mf, *r), flow(c.mb, *r)].concat();
                let deref = operand(gs, &entry, c.op1, name, &follow)?;
                let store = gs.add_transit(&[GateKey::learn(c.mp, c.mf)], &deref, None, converge.as_ref())?;
                converge.get_or_insert(store);
            }
            let Some(store) = converge else {
                return Err(NvmError::Config("mref needs at least one register".into()));
            };
            let restore = gs.add_transit(&[flow(c.mf, c.mp), flow(c.mb, c.mp)].concat(), &store, None, None)?;
            gs.add_transit(&[], &restore, None, Some(start))?;
        }
        Opcode::Mdrf => {
            let follow = enter(gs, hubs, opcode, &flow(c.mp, c.mf))?;
            let restore = gs.add_transit(&[flow(c.mf, c.mp), flow(c.mb, c.mp)].concat(), &follow, None, None)?;
            gs.add_transit(&[], &restore, None, Some(start))?;
        }
    }
    Ok(())
}
