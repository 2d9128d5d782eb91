//! Devices - pointer layers and runtime plasticity
//!
//! The stack pointer (`sf`/`sb`) and memory pointer (`mf`/`mb`, staged
//! through `mp`) are pairs of layers holding slot `i` in forward and backward
//! form. Moving one step flows both layers from one side at once:
//!
//! ```text
//! advance:  sf <- sf : s_i -> s_{i+1}     sb <- sf : s_i -> b_{i+1}
//! retreat:  sb <- sb : b_i -> b_{i-1}     sf <- sb : b_i -> s_{i-1}
//! stage:    mp <- mb : b_i -> p_i         mf <- mp : p_i -> m_i     mb <- mp : p_i -> b_i
//! ```
//!
//! Slot patterns come from each layer's orthogonal family, so every move
//! pathway recalls exactly.
//!
//! Learn-gated pathways start from a baseline and are written while the
//! program runs. The comparison pathway `co <- ci` is a dipole: each write
//! resets it so that only the newest key maps to `true`.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::activator::Activator;
use crate::error::Result;
use crate::layer::Pattern;
use crate::learning::{flash, LearningRule, PathwayBuilder};
use crate::network::{Connection, LayerId, Network, Pathway, Weights};

/// Truth tokens on the comparison output
pub const TRUE_TOKEN: &str = "true";
pub const FALSE_TOKEN: &str = "false";

/// How a learn-gated pathway is written
#[derive(Debug, Clone, PartialEq)]
pub enum Plasticity {
    /// Add the current association on top of what is stored
    Store,
    /// Forget everything, then map the current input to `on`; all else maps to `off`
    Dipole { on: Pattern, off: Pattern },
}

/// Flashed pointer pathways
#[derive(Debug, Clone)]
pub struct Devices {
    pub weights: Weights,
    pub errors: usize,
}

/// Token for pointer slot `i`
pub fn slot_token(i: usize) -> String {
    i.to_string()
}

/// Flash the stack and memory pointer pathways over `slots` positions
pub fn flash_pointers(net: &mut Network, slots: usize) -> Result<Devices> {
    let c = *net.control();
    let tokens: Vec<String> = (0..slots).map(slot_token).collect();

    let mut patterns = BTreeMap::new();
    for layer in [c.sf, c.sb, c.mf, c.mb, c.mp] {
        patterns.insert(layer, net.layer_mut(layer).encode_tokens(&tokens, true)?);
    }

    let mut builders: BTreeMap<Pathway, PathwayBuilder> = BTreeMap::new();
    let mut add = |to: LayerId, from: LayerId, shift: isize| {
        let (x, y) = shifted(&patterns[&from], &patterns[&to], shift);
        builders
            .entry(Pathway::new(to, from))
            .or_insert_with(|| PathwayBuilder::new(y.nrows(), x.nrows()))
            .add(&x, &y);
    };
    for (forward, backward) in [(c.sf, c.sb), (c.mf, c.mb)] {
        add(forward, forward, 1);
        add(backward, forward, 1);
        add(backward, backward, -1);
        add(forward, backward, -1);
    }
    add(c.mp, c.mb, 0);
    add(c.mf, c.mp, 0);
    add(c.mb, c.mp, 0);

    let rule = net.rule();
    let mut weights = Weights::new();
    let mut errors = 0;
    for (pathway, builder) in &builders {
        let flashed = builder.flash(
            rule,
            net.layer(pathway.from).activator(),
            net.layer(pathway.to).activator(),
        );
        if flashed.errors > 0 {
            log::warn!("pointer pathway {}: {} errors", net.describe(pathway), flashed.errors);
        }
        errors += flashed.errors;
        weights.insert(*pathway, Connection::new(flashed.weights, flashed.bias));
    }
    log::debug!("devices: {} pointer pathways over {} slots", weights.len(), slots);
    Ok(Devices { weights, errors })
}

/// Pairs `from[i] -> to[i + shift]` for every slot where both exist
fn shifted(from: &Array2<f64>, to: &Array2<f64>, shift: isize) -> (Array2<f64>, Array2<f64>) {
    let slots = from.ncols() as isize;
    let pairs: Vec<(usize, usize)> = (0..slots)
        .filter(|i| (0..slots).contains(&(i + shift)))
        .map(|i| (i as usize, (i + shift) as usize))
        .collect();
    let x = Array2::from_shape_fn((from.nrows(), pairs.len()), |(r, k)| from[[r, pairs[k].0]]);
    let y = Array2::from_shape_fn((to.nrows(), pairs.len()), |(r, k)| to[[r, pairs[k].1]]);
    (x, y)
}

/// Plasticity of every learn-gated pathway
pub fn plasticity(net: &mut Network) -> BTreeMap<Pathway, Plasticity> {
    let c = *net.control();
    let co = net.layer_mut(c.co);
    let on = co.encode(TRUE_TOKEN);
    let off = co.encode(FALSE_TOKEN);

    net.plastic()
        .iter()
        .map(|&pathway| {
            let rule = if pathway == Pathway::new(c.co, c.ci) {
                Plasticity::Dipole {
                    on: on.clone(),
                    off: off.clone(),
                }
            } else {
                Plasticity::Store
            };
            (pathway, rule)
        })
        .collect()
}

/// Connection a learn-gated pathway holds before anything is written
pub fn baseline(net: &Network, pathway: &Pathway, plasticity: &Plasticity) -> Connection {
    let to = net.layer(pathway.to);
    let from = net.layer(pathway.from);
    match plasticity {
        Plasticity::Store => Connection::zeros(to.size(), from.size()),
        Plasticity::Dipole { off, .. } => {
            let act = to.activator();
            Connection::new(
                Array2::zeros((to.size(), from.size())),
                off.mapv(|v| act.inverse(v)),
            )
        }
    }
}

/// Write the association `x -> y` into `connection`
pub fn learn(
    rule: LearningRule,
    connection: &mut Connection,
    plasticity: &Plasticity,
    x: &Pattern,
    y: &Pattern,
    from: &Activator,
    to: &Activator,
) {
    let target = match plasticity {
        Plasticity::Store => y,
        Plasticity::Dipole { on, off } => {
            connection.weights.fill(0.0);
            connection.bias = off.mapv(|v| to.inverse(v));
            on
        }
    };
    let column = |v: &Array1<f64>| Array2::from_shape_fn((v.len(), 1), |(i, _)| v[i]);
    let flashed = flash(
        rule,
        &connection.weights,
        &connection.bias,
        &column(x),
        &column(target),
        from,
        to,
    );
    connection.weights = flashed.weights;
    connection.bias = flashed.bias;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NvmConfig;

    fn step(net: &Network, weights: &Weights, to: LayerId, from: LayerId, x: &Pattern) -> Pattern {
        let conn = &weights[&Pathway::new(to, from)];
        let act = net.layer(to).activator();
        (conn.weights.dot(x) + &conn.bias).mapv(|v| act.squash(v))
    }

    #[test]
    fn test_stack_moves() {
        let mut net = Network::new(&NvmConfig::compact()).unwrap();
        let devices = flash_pointers(&mut net, 16).unwrap();
        assert_eq!(devices.errors, 0);

        let c = *net.control();
        let s3 = net.layer(c.sf).pattern("3").unwrap().clone();
        let next = step(&net, &devices.weights, c.sf, c.sf, &s3);
        assert_eq!(net.layer(c.sf).decode(&next), "4");
        let back = step(&net, &devices.weights, c.sb, c.sf, &s3);
        assert_eq!(net.layer(c.sb).decode(&back), "4");
        let prev = step(&net, &devices.weights, c.sf, c.sb, &back);
        assert_eq!(net.layer(c.sf).decode(&prev), "3");

        let b5 = net.layer(c.mb).pattern("5").unwrap().clone();
        let staged = step(&net, &devices.weights, c.mp, c.mb, &b5);
        assert_eq!(net.layer(c.mp).decode(&staged), "5");
        let restored = step(&net, &devices.weights, c.mf, c.mp, &staged);
        assert_eq!(net.layer(c.mf).decode(&restored), "5");
    }

    #[test]
    fn test_dipole_keeps_only_latest_key() {
        let mut net = Network::new(&NvmConfig::compact()).unwrap();
        let c = *net.control();
        let table = plasticity(&mut net);
        let dipole = &table[&Pathway::new(c.co, c.ci)];
        let mut conn = baseline(&net, &Pathway::new(c.co, c.ci), dipole);

        let keys = net.layer_mut(c.ci).encode_tokens(&["A", "B"], true).unwrap();
        let a = keys.column(0).to_owned();
        let b = keys.column(1).to_owned();
        let act = *net.layer(c.ci).activator();
        let recall = |conn: &Connection, x: &Pattern| {
            let pre = conn.weights.dot(x) + &conn.bias;
            net.layer(c.co).decode(&pre.mapv(|v| act.squash(v))).to_string()
        };

        assert_eq!(recall(&conn, &a), FALSE_TOKEN);
        learn(LearningRule::Rehebbian, &mut conn, dipole, &a, &a, &act, &act);
        assert_eq!(recall(&conn, &a), TRUE_TOKEN);
        assert_eq!(recall(&conn, &b), FALSE_TOKEN);

        learn(LearningRule::Rehebbian, &mut conn, dipole, &b, &b, &act, &act);
        assert_eq!(recall(&conn, &b), TRUE_TOKEN);
        assert_eq!(recall(&conn, &a), FALSE_TOKEN);
    }

    #[test]
    fn test_store_accumulates() {
        let mut net = Network::new(&NvmConfig::compact()).unwrap();
        flash_pointers(&mut net, 16).unwrap();
        let c = *net.control();
        let r = net.registers()[0];
        let mut conn = Connection::zeros(net.layer(r).size(), net.layer(c.mf).size());
        let act = *net.layer(r).activator();

        let keys: Vec<Pattern> = (0..4).map(|i| net.layer(c.mf).pattern(&slot_token(i)).unwrap().clone()).collect();
        let values: Vec<Pattern> = (0..4).map(|i| net.layer_mut(r).encode(&format!("v{}", i))).collect();
        for (k, v) in keys.iter().zip(&values) {
            learn(LearningRule::Rehebbian, &mut conn, &Plasticity::Store, k, v, &act, &act);
        }
        for (i, k) in keys.iter().enumerate() {
            let out = (conn.weights.dot(k) + &conn.bias).mapv(|v| act.squash(v));
            assert_eq!(net.layer(r).decode(&out), format!("v{}", i));
        }
    }
}
