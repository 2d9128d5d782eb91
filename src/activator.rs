//! Activator - saturation levels and squashing nonlinearity of a layer
//!
//! Every pattern written to a layer sits at one of two saturation levels,
//! `on` or `off`. Both are kept `pad` away from the asymptotes of the
//! squashing function so that `inverse` stays finite; the learning rule
//! solves for `inverse(target)` directly.
//!
//! ```text
//! tanh:      on =  1 - pad    off = -(1 - pad)    midpoint = 0
//! logistic:  on =  1 - pad    off =      pad      midpoint = 0.5
//! ```
//!
//! ## Retention
//!
//! A layer whose decay gate is closed feeds itself through an implicit
//! identity pathway of slope `gain()`. `hold` is one tick of that pathway;
//! its only stable fixed points are `on` and `off`, so repeated holds pull
//! a degraded pattern back to saturation unit by unit.

use serde::{Deserialize, Serialize};

/// Squashing function family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivatorKind {
    #[default]
    Tanh,
    Logistic,
}

/// Saturation levels plus squash/inverse pair for one layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activator {
    kind: ActivatorKind,
    on: f64,
    off: f64,
    pad: f64,
}

impl Activator {
    pub fn new(kind: ActivatorKind, pad: f64) -> Self {
        let (on, off) = match kind {
            ActivatorKind::Tanh => (1.0 - pad, -(1.0 - pad)),
            ActivatorKind::Logistic => (1.0 - pad, pad),
        };
        Self { kind, on, off, pad }
    }

    pub fn tanh(pad: f64) -> Self {
        Self::new(ActivatorKind::Tanh, pad)
    }

    pub fn logistic(pad: f64) -> Self {
        Self::new(ActivatorKind::Logistic, pad)
    }

    pub fn kind(&self) -> ActivatorKind {
        self.kind
    }

    pub fn on(&self) -> f64 {
        self.on
    }

    pub fn off(&self) -> f64 {
        self.off
    }

    pub fn pad(&self) -> f64 {
        self.pad
    }

    /// Decision threshold between the two saturation levels
    pub fn midpoint(&self) -> f64 {
        (self.on + self.off) / 2.0
    }

    pub fn squash(&self, x: f64) -> f64 {
        match self.kind {
            ActivatorKind::Tanh => x.tanh(),
            ActivatorKind::Logistic => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// Analytic inverse of `squash`, clamped to `[off, on]`
    pub fn inverse(&self, y: f64) -> f64 {
        let y = y.clamp(self.off, self.on);
        match self.kind {
            ActivatorKind::Tanh => y.atanh(),
            ActivatorKind::Logistic => (y / (1.0 - y)).ln(),
        }
    }

    /// Pre-activation span per unit of post-activation span between the levels
    pub fn gain(&self) -> f64 {
        (self.inverse(self.on) - self.inverse(self.off)) / (self.on - self.off)
    }

    /// Pre-activation contributed by the identity self-pathway
    pub fn recurrent(&self, y: f64) -> f64 {
        let mid = self.midpoint();
        self.inverse(mid) + self.gain() * (y - mid)
    }

    /// One tick of retention with no other input
    pub fn hold(&self, y: f64) -> f64 {
        self.squash(self.recurrent(y))
    }

    pub fn is_on(&self, y: f64) -> bool {
        y > self.midpoint()
    }

    /// Saturation level for a bit
    pub fn level(&self, bit: bool) -> f64 {
        if bit {
            self.on
        } else {
            self.off
        }
    }

    /// Threshold every unit against the midpoint
    pub fn quantize<'a>(&self, values: impl IntoIterator<Item = &'a f64>) -> Vec<bool> {
        values.into_iter().map(|&v| self.is_on(v)).collect()
    }
}

impl Default for Activator {
    fn default() -> Self {
        Self::tanh(1e-3)
    }
}
