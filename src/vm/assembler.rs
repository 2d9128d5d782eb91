//! Assembler - compiles a parsed program into data-pathway weights
//!
//! ## Steps
//!
//! ```text
//! 1. literals      -> ci and every register
//! 2. operand words -> op1 / op2
//! 3. ip tokens     name, name.0 .. name.(n-1); labels, scoped as name:label,
//!                  alias their line's pattern
//! 4. ip <- ip      name.(l-1) -> name.l
//! 5. opc/op1/op2 <- ip   line l's fields
//! 6. data pathways r<-r', r<-op2, ci<-r, ci<-op2, ip<-r, ip<-op1
//!                  over the tokens both layers know
//! ```
//!
//! The `ip` pattern that loads line `l` is the one reached after line `l-1`
//! (or the bare program name for line 0), which is why labels map onto
//! `ip_patterns[l]`.
//!
//! Labels are scoped to their program: `jmpv skip` in `one` carries the token
//! `one:skip` on `op1`, as does any literal operand spelling a label. Program
//! names may not contain `.`, `:` or whitespace, so entry, line and label
//! tokens of different programs never coincide.
//!
//! Builders persist across programs: assembling a second program appends its
//! pairs, and every pathway is re-solved over everything seen so far.

use std::collections::BTreeMap;

use ndarray::s;

use crate::error::{NvmError, Result};
use crate::learning::PathwayBuilder;
use crate::network::{Connection, Network, Pathway, Weights};

use super::program::Program;

/// Weights produced by one assembly
#[derive(Debug, Clone)]
pub struct Assembly {
    pub weights: Weights,
    pub errors: usize,
}

/// Assembler session for one network
#[derive(Debug, Clone, Default)]
pub struct ProgramAssembler {
    builders: BTreeMap<Pathway, PathwayBuilder>,
    programs: Vec<String>,
}

/// Digits needed to index `lines` instructions
fn index_width(lines: usize) -> usize {
    (lines as f64).log10().ceil() as usize
}

/// Instruction-pointer tokens: the entry token then one per line
pub fn ip_tokens(name: &str, lines: usize) -> Vec<String> {
    let width = index_width(lines);
    std::iter::once(name.to_string())
        .chain((0..lines).map(|l| format!("{}.{:0width$}", name, l, width = width)))
        .collect()
}

/// Program names become `ip` tokens, so they must not look like line or label tokens
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(|ch: char| ch == '.' || ch == ':' || ch.is_whitespace()) {
        return Err(NvmError::Config(format!(
            "invalid program name {:?}: use no '.', ':' or whitespace",
            name
        )));
    }
    Ok(())
}

impl ProgramAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the programs assembled so far
    pub fn programs(&self) -> &[String] {
        &self.programs
    }

    /// Encode `program` under `name` and re-solve every session pathway
    pub fn assemble(
        &mut self,
        net: &mut Network,
        program: &Program,
        name: &str,
        orthogonal: bool,
        verbose: bool,
    ) -> Result<Assembly> {
        check_name(name)?;
        if program.is_empty() {
            return Err(NvmError::Config(format!("program {} has no instructions", name)));
        }
        let program = &program.scoped(name);
        if self.programs.iter().any(|p| p == name) {
            log::warn!("program {} assembled again, earlier pairs are overridden", name);
        } else {
            self.programs.push(name.to_string());
        }

        let c = *net.control();
        let registers = net.registers().to_vec();
        let register_names = net.register_names();
        let lines = program.len();

        // 1. literals on the comparison input and every register
        let literals = program.literals(&register_names);
        for layer in std::iter::once(c.ci).chain(registers.iter().copied()) {
            net.layer_mut(layer).encode_tokens(&literals, orthogonal)?;
        }

        // 2. operand layers
        for (index, layer) in [(1, c.op1), (2, c.op2)] {
            net.layer_mut(layer).encode_tokens(&program.field_tokens(index), orthogonal)?;
        }

        // 3. instruction pointer
        let ip_patterns = net.layer_mut(c.ip).encode_tokens(&ip_tokens(name, lines), orthogonal)?;
        for (label, &line) in &program.labels {
            let pattern = ip_patterns.column(line).to_owned();
            net.layer_mut(c.ip).encode_as(label, &pattern);
        }

        // 4. sequencing
        let current = ip_patterns.slice(s![.., ..lines]).to_owned();
        let next = ip_patterns.slice(s![.., 1..]).to_owned();
        self.add(net, Pathway::new(c.ip, c.ip), &current, &next);

        // 5. instruction fields
        for (index, layer) in [(0, c.opc), (1, c.op1), (2, c.op2)] {
            let fields: Vec<&str> = program.instructions.iter().map(|i| i.field(index)).collect();
            let targets = net.layer_mut(layer).encode_tokens(&fields, false)?;
            self.add(net, Pathway::new(layer, c.ip), &current, &targets);
        }

        // 6. data pathways over shared tokens
        let mut data = Vec::new();
        for &to in &registers {
            for &from in &registers {
                data.push(Pathway::new(to, from));
            }
            data.push(Pathway::new(to, c.op2));
            data.push(Pathway::new(c.ci, to));
            data.push(Pathway::new(c.ip, to));
        }
        data.push(Pathway::new(c.ci, c.op2));
        data.push(Pathway::new(c.ip, c.op1));

        for pathway in data {
            let shared: Vec<String> = net
                .layer(pathway.from)
                .all_tokens()
                .iter()
                .filter(|t| net.layer(pathway.to).knows(t))
                .cloned()
                .collect();
            if shared.is_empty() {
                continue;
            }
            let x = net.layer_mut(pathway.from).encode_tokens(&shared, false)?;
            let y = net.layer_mut(pathway.to).encode_tokens(&shared, false)?;
            self.add(net, pathway, &x, &y);
        }

        self.flash(net, name, verbose)
    }

    fn add(&mut self, net: &Network, pathway: Pathway, x: &ndarray::Array2<f64>, y: &ndarray::Array2<f64>) {
        self.builders
            .entry(pathway)
            .or_insert_with(|| {
                PathwayBuilder::new(net.layer(pathway.to).size(), net.layer(pathway.from).size())
            })
            .add(x, y);
    }

    fn flash(&self, net: &Network, name: &str, verbose: bool) -> Result<Assembly> {
        let rule = net.rule();
        let mut weights = Weights::new();
        let mut errors = 0;
        for (pathway, builder) in &self.builders {
            let flashed = builder.flash(
                rule,
                net.layer(pathway.from).activator(),
                net.layer(pathway.to).activator(),
            );
            if flashed.errors > 0 {
                log::warn!(
                    "{}: pathway {} recalls {} of {} pairs wrong",
                    name,
                    net.describe(pathway),
                    flashed.errors,
                    builder.len()
                );
            }
            errors += flashed.errors;
            weights.insert(*pathway, Connection::new(flashed.weights, flashed.bias));
        }

        if verbose {
            log::info!("{}: {} pathways flashed, {} errors", name, weights.len(), errors);
        } else {
            log::debug!("{}: {} pathways flashed, {} errors", name, weights.len(), errors);
        }
        Ok(Assembly { weights, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NvmConfig;
    use crate::layer::Pattern;
    use crate::vm::program::parse;

    fn recall(net: &Network, weights: &Weights, pathway: Pathway, x: &Pattern) -> String {
        let conn = &weights[&pathway];
        let act = net.layer(pathway.to).activator();
        let out = (conn.weights.dot(x) + &conn.bias).mapv(|v| act.squash(v));
        net.layer(pathway.to).decode(&out).to_string()
    }

    #[test]
    fn test_ip_tokens() {
        assert_eq!(ip_tokens("p", 1), vec!["p", "p.0"]);
        assert_eq!(ip_tokens("p", 3), vec!["p", "p.0", "p.1", "p.2"]);
        let long = ip_tokens("main", 12);
        assert_eq!(long[1], "main.00");
        assert_eq!(long[12], "main.11");
    }

    #[test]
    fn test_assemble_links_lines() {
        let mut net = Network::new(&NvmConfig::default()).unwrap();
        let registers = net.register_names();
        let source = "start: movv r0 A\n movd r1 r0\n jmpv start\n exit";
        let program = parse(source, &registers).unwrap();

        let mut assembler = ProgramAssembler::new();
        let assembly = assembler.assemble(&mut net, &program, "main", false, false).unwrap();
        assert_eq!(assembly.errors, 0);

        let c = *net.control();
        let ip = |net: &Network, t: &str| net.layer(c.ip).pattern(t).unwrap().clone();

        // main -> line 0 loads movv r0 A
        let entry = ip(&net, "main");
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.opc, c.ip), &entry), "movv");
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.op2, c.ip), &entry), "A");
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.ip, c.ip), &entry), "main.0");

        // label start names the pattern that loads line 0
        assert_eq!(net.layer(c.ip).pattern("main:start"), net.layer(c.ip).pattern("main"));
        assert_eq!(net.layer(c.ip).decode(&entry), "main:start");
        assert!(!net.layer(c.ip).knows("start"));

        // jmpv start: op1 carries the label, ip <- op1 lands on it
        let third = ip(&net, "main.1");
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.op1, c.ip), &third), "main:start");
        let label = net.layer(c.op1).pattern("main:start").unwrap().clone();
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.ip, c.op1), &label), "main:start");

        // registers copy literals between each other
        let r0 = net.id("r0").unwrap();
        let r1 = net.id("r1").unwrap();
        let a = net.layer(r0).pattern("A").unwrap().clone();
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(r1, r0), &a), "A");
        let op2_a = net.layer(c.op2).pattern("A").unwrap().clone();
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(r0, c.op2), &op2_a), "A");
    }

    #[test]
    fn test_second_program_appends() {
        let mut net = Network::new(&NvmConfig::default()).unwrap();
        let registers = net.register_names();
        let mut assembler = ProgramAssembler::new();
        let first = parse("movv r0 A\nexit", &registers).unwrap();
        let second = parse("movv r1 B\nnop\nexit", &registers).unwrap();
        assembler.assemble(&mut net, &first, "one", false, false).unwrap();
        let assembly = assembler.assemble(&mut net, &second, "two", false, false).unwrap();
        assert_eq!(assembly.errors, 0);
        assert_eq!(assembler.programs(), &["one".to_string(), "two".to_string()]);

        let c = *net.control();
        let one = net.layer(c.ip).pattern("one").unwrap().clone();
        let two = net.layer(c.ip).pattern("two").unwrap().clone();
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.op2, c.ip), &one), "A");
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.op2, c.ip), &two), "B");
    }

    #[test]
    fn test_labels_stay_in_their_program() {
        let mut net = Network::new(&NvmConfig::default()).unwrap();
        let registers = net.register_names();
        let mut assembler = ProgramAssembler::new();
        let first = parse("jmpv skip\nmovv r0 bad\nskip: movv r0 one\nexit", &registers).unwrap();
        let second = parse("skip: movv r0 two\nexit", &registers).unwrap();
        assembler.assemble(&mut net, &first, "one", false, false).unwrap();
        let assembly = assembler.assemble(&mut net, &second, "two", false, false).unwrap();
        assert_eq!(assembly.errors, 0);

        let c = *net.control();
        let ip = net.layer(c.ip);
        assert_eq!(ip.pattern("one:skip"), ip.pattern("one.1"));
        assert_eq!(ip.pattern("two:skip"), ip.pattern("two"));

        let label = net.layer(c.op1).pattern("one:skip").unwrap().clone();
        let landed = recall(&net, &assembly.weights, Pathway::new(c.ip, c.op1), &label);
        assert_eq!(landed, "one:skip");
        let loads = net.layer(c.ip).pattern("one:skip").unwrap().clone();
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.op2, c.ip), &loads), "one");
    }

    #[test]
    fn test_label_cannot_replace_entry() {
        let mut net = Network::new(&NvmConfig::default()).unwrap();
        let registers = net.register_names();
        let program = parse("movv r0 first\nmain: nop\nexit", &registers).unwrap();
        let mut assembler = ProgramAssembler::new();
        let assembly = assembler.assemble(&mut net, &program, "main", false, false).unwrap();

        let c = *net.control();
        let entry = net.layer(c.ip).pattern("main").unwrap().clone();
        assert_eq!(net.layer(c.ip).decode(&entry), "main");
        assert_eq!(net.layer(c.ip).pattern("main:main"), net.layer(c.ip).pattern("main.0"));
        assert_eq!(recall(&net, &assembly.weights, Pathway::new(c.opc, c.ip), &entry), "movv");

        for bad in ["", "a.0", "a:b", "two words"] {
            let err = assembler.assemble(&mut net, &program, bad, false, false).unwrap_err();
            assert!(matches!(err, NvmError::Config(_)), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_orthogonal_assembly() {
        let config = NvmConfig {
            orthogonal: true,
            ..NvmConfig::default()
        };
        let mut net = Network::new(&config).unwrap();
        let registers = net.register_names();
        let program = parse("l: cmpv r0 X\njie l\nexit", &registers).unwrap();
        let assembly = ProgramAssembler::new()
            .assemble(&mut net, &program, "p", true, false)
            .unwrap();
        assert_eq!(assembly.errors, 0);
    }
}
