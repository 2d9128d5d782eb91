//! Compiled weight artifacts
//!
//! A flashed network's weights as JSON, keyed by layer names so the file
//! survives a change in layer ordering:
//!
//! ```text
//! { "version": 1,
//!   "pathways": [ { "to": "gh", "from": "opc", "weights": ..., "bias": ... }, ... ] }
//! ```

use std::io::{Read, Write};
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{NvmError, Result};
use crate::network::{Connection, Network, Pathway, Weights};

/// Current artifact format version
pub const ARTIFACT_VERSION: u32 = 1;

/// One pathway's connection, named by its layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub to: String,
    pub from: String,
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

/// Serializable form of a weight mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub version: u32,
    pub pathways: Vec<ArtifactEntry>,
}

impl Artifact {
    pub fn from_weights(net: &Network, weights: &Weights) -> Self {
        let pathways = weights
            .iter()
            .map(|(p, c)| ArtifactEntry {
                to: net.name(p.to).to_string(),
                from: net.name(p.from).to_string(),
                weights: c.weights.clone(),
                bias: c.bias.clone(),
            })
            .collect();
        Self {
            version: ARTIFACT_VERSION,
            pathways,
        }
    }

    /// Resolve layer names against `net`, checking every shape
    pub fn into_weights(self, net: &Network) -> Result<Weights> {
        if self.version != ARTIFACT_VERSION {
            return Err(NvmError::Config(format!(
                "unsupported artifact version {}",
                self.version
            )));
        }
        let mut weights = Weights::new();
        for entry in self.pathways {
            let pathway = Pathway::new(net.id(&entry.to)?, net.id(&entry.from)?);
            let expected = vec![net.layer(pathway.to).size(), net.layer(pathway.from).size()];
            let actual = entry.weights.shape().to_vec();
            if actual != expected || entry.bias.len() != expected[0] {
                return Err(NvmError::ShapeMismatch { expected, actual });
            }
            weights.insert(pathway, Connection::new(entry.weights, entry.bias));
        }
        Ok(weights)
    }

    pub fn len(&self) -> usize {
        self.pathways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pathways.is_empty()
    }
}

/// Write `weights` as a JSON artifact
pub fn save_to_file(net: &Network, weights: &Weights, path: impl AsRef<Path>) -> Result<()> {
    let artifact = Artifact::from_weights(net, weights);
    let json = serde_json::to_string(&artifact)?;
    let mut file = std::fs::File::create(path)?;
    file.write_all(json.as_bytes())?;
    log::debug!("saved {} pathways", artifact.len());
    Ok(())
}

/// Read a JSON artifact back into weights for `net`
pub fn load_from_file(net: &Network, path: impl AsRef<Path>) -> Result<Weights> {
    let mut file = std::fs::File::open(path)?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    let artifact: Artifact = serde_json::from_str(&text)?;
    artifact.into_weights(net)
}
