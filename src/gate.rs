//! Gate keys and the dense gate map
//!
//! Every unit of the gate-output layer `go` switches one pathway behaviour:
//!
//! ```text
//! (to, from, Copy)   add W(to<-from) x_from + b into `to`
//! (to, to,   Decay)  drop `to`'s identity self-pathway (the layer forgets)
//! (to, from, Learn)  store the current from -> to association in W(to<-from)
//! ```
//!
//! The gate map fixes which unit of `go` carries which key. It is built once
//! per configuration and never changes afterwards.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NvmError, Result};
use crate::network::LayerId;

/// What an open gate does to its pathway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GateMode {
    Copy,
    Decay,
    Learn,
}

impl GateMode {
    pub fn symbol(&self) -> char {
        match self {
            GateMode::Copy => 'u',
            GateMode::Decay => 'd',
            GateMode::Learn => 'l',
        }
    }
}

/// One controllable switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GateKey {
    pub to: LayerId,
    pub from: LayerId,
    pub mode: GateMode,
}

impl GateKey {
    pub const fn copy(to: LayerId, from: LayerId) -> Self {
        Self { to, from, mode: GateMode::Copy }
    }

    pub const fn decay(layer: LayerId) -> Self {
        Self { to: layer, from: layer, mode: GateMode::Decay }
    }

    pub const fn learn(to: LayerId, from: LayerId) -> Self {
        Self { to, from, mode: GateMode::Learn }
    }
}

impl fmt::Display for GateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}<-{}:{})", self.to.0, self.from.0, self.mode.symbol())
    }
}

/// Copy through `to <- from` and let `to` forget its previous value
pub fn flow(to: LayerId, from: LayerId) -> [GateKey; 2] {
    [GateKey::copy(to, from), GateKey::decay(to)]
}

/// Bijection between gate keys and units of the gate-output layer
#[derive(Debug, Clone, Default)]
pub struct GateMap {
    keys: Vec<GateKey>,
    index: HashMap<GateKey, usize>,
}

impl GateMap {
    pub fn new(keys: impl IntoIterator<Item = GateKey>) -> Result<Self> {
        let mut map = Self::default();
        for key in keys {
            if map.index.contains_key(&key) {
                return Err(NvmError::DuplicateGate(key.to_string()));
            }
            map.index.insert(key, map.keys.len());
            map.keys.push(key);
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn index_of(&self, key: &GateKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn key(&self, index: usize) -> Option<&GateKey> {
        self.keys.get(index)
    }

    pub fn keys(&self) -> &[GateKey] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_map_positions() {
        let a = LayerId(0);
        let b = LayerId(1);
        let map = GateMap::new([GateKey::copy(a, b), GateKey::decay(a), GateKey::learn(a, b)]).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.index_of(&GateKey::decay(a)), Some(1));
        assert_eq!(map.index_of(&GateKey::copy(b, a)), None);
        assert_eq!(map.key(2), Some(&GateKey::learn(a, b)));
    }

    #[test]
    fn test_gate_map_rejects_duplicates() {
        let a = LayerId(3);
        let err = GateMap::new(flow(a, a).into_iter().chain([GateKey::decay(a)])).unwrap_err();
        assert!(matches!(err, NvmError::DuplicateGate(_)));
    }

    #[test]
    fn test_flow_keys() {
        let [copy, decay] = flow(LayerId(2), LayerId(5));
        assert_eq!(copy.mode, GateMode::Copy);
        assert_eq!(decay, GateKey::decay(LayerId(2)));
        assert_eq!(copy.to_string(), "(2<-5:u)");
    }
}
