//! Layer - named vector state with a token <-> pattern coder
//!
//! Each layer owns a private code book. A token is assigned a pattern the
//! first time it is encoded and keeps it for the life of the layer. Decoding
//! thresholds an activity vector against the activator midpoint and looks the
//! bit pattern up exactly; anything unrecognized decodes to [`UNKNOWN_TOKEN`].
//!
//! ## Pattern families
//!
//! ```text
//! random      each unit on/off with probability 1/2, redrawn on collision
//! orthogonal  columns of a Sylvester-Hadamard matrix, unit signs flipped by a
//!             fixed random mask and columns taken in shuffled order
//! ```
//!
//! The orthogonal family needs a power-of-two layer size and holds exactly
//! `size` patterns.

use std::collections::HashMap;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::activator::Activator;
use crate::error::{NvmError, Result};

/// Activity or code vector of one layer
pub type Pattern = Array1<f64>;

/// Decoding of a pattern that matches no token
pub const UNKNOWN_TOKEN: &str = "?";

const MAX_REDRAWS: usize = 64;

/// Sign of entry `(i, j)` of the Sylvester-Hadamard matrix
pub(crate) fn sylvester(i: usize, j: usize) -> f64 {
    if (i & j).count_ones() % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

#[derive(Debug, Clone)]
struct OrthogonalFamily {
    signs: Vec<f64>,
    order: Vec<usize>,
    next: usize,
}

/// Token <-> pattern code book of one layer
#[derive(Debug, Clone)]
pub struct Coder {
    size: usize,
    activator: Activator,
    rng: StdRng,
    tokens: Vec<String>,
    patterns: HashMap<String, Pattern>,
    decodings: HashMap<Vec<bool>, String>,
    family: Option<OrthogonalFamily>,
}

impl Coder {
    pub fn new(size: usize, activator: Activator, seed: u64) -> Self {
        Self {
            size,
            activator,
            rng: StdRng::seed_from_u64(seed),
            tokens: Vec::new(),
            patterns: HashMap::new(),
            decodings: HashMap::new(),
            family: None,
        }
    }

    pub fn pattern(&self, token: &str) -> Option<&Pattern> {
        self.patterns.get(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.patterns.contains_key(token)
    }

    /// Known tokens in registration order
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Pattern for `token`, drawing a fresh random one if it is new
    pub fn encode(&mut self, token: &str) -> Pattern {
        if let Some(pattern) = self.patterns.get(token) {
            return pattern.clone();
        }
        let pattern = self.random_pattern();
        self.assign(token, pattern.clone());
        pattern
    }

    /// Bind `token` to an explicit pattern; the newest binding wins when decoding
    pub fn encode_as(&mut self, token: &str, pattern: &Pattern) {
        self.assign(token, pattern.clone());
    }

    /// Patterns for all tokens as columns, assigning any that are new
    pub fn encode_tokens<S: AsRef<str>>(
        &mut self,
        tokens: &[S],
        orthogonal: bool,
        layer: &str,
    ) -> Result<Array2<f64>> {
        let mut columns = Array2::zeros((self.size, tokens.len()));
        for (j, token) in tokens.iter().enumerate() {
            let token = token.as_ref();
            let pattern = match self.patterns.get(token) {
                Some(pattern) => pattern.clone(),
                None => {
                    let pattern = if orthogonal {
                        self.orthogonal_pattern(layer)?
                    } else {
                        self.random_pattern()
                    };
                    self.assign(token, pattern.clone());
                    pattern
                }
            };
            columns.column_mut(j).assign(&pattern);
        }
        Ok(columns)
    }

    pub fn decode(&self, activity: &Pattern) -> &str {
        let bits = self.activator.quantize(activity);
        self.decodings
            .get(&bits)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_TOKEN)
    }

    fn assign(&mut self, token: &str, pattern: Pattern) {
        let bits = self.activator.quantize(&pattern);
        self.decodings.insert(bits, token.to_string());
        if self.patterns.insert(token.to_string(), pattern).is_none() {
            self.tokens.push(token.to_string());
        }
    }

    fn random_pattern(&mut self) -> Pattern {
        let mut bits: Vec<bool> = Vec::new();
        for _ in 0..MAX_REDRAWS {
            bits = (0..self.size).map(|_| self.rng.gen::<bool>()).collect();
            if !self.decodings.contains_key(&bits) {
                break;
            }
        }
        bits.iter().map(|&b| self.activator.level(b)).collect()
    }

    fn orthogonal_pattern(&mut self, layer: &str) -> Result<Pattern> {
        if !self.size.is_power_of_two() {
            return Err(NvmError::Config(format!(
                "orthogonal patterns on {} need a power-of-two size, got {}",
                layer, self.size
            )));
        }
        let size = self.size;
        let activator = self.activator;
        let rng = &mut self.rng;
        let family = self.family.get_or_insert_with(|| {
            let signs = (0..size)
                .map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 })
                .collect();
            let mut order: Vec<usize> = (0..size).collect();
            order.shuffle(rng);
            OrthogonalFamily { signs, order, next: 0 }
        });
        if family.next >= size {
            return Err(NvmError::Exhausted {
                layer: layer.to_string(),
                requested: family.next + 1,
                capacity: size,
            });
        }
        let column = family.order[family.next];
        family.next += 1;
        Ok((0..size)
            .map(|i| activator.level(family.signs[i] * sylvester(i, column) > 0.0))
            .collect())
    }
}

/// Named layer: size, activator and code book
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    size: usize,
    activator: Activator,
    coder: Coder,
}

impl Layer {
    pub fn new(name: impl Into<String>, size: usize, activator: Activator, seed: u64) -> Self {
        Self {
            name: name.into(),
            size,
            activator,
            coder: Coder::new(size, activator, seed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn activator(&self) -> &Activator {
        &self.activator
    }

    /// Activity with every unit at the midpoint
    pub fn blank(&self) -> Pattern {
        Array1::from_elem(self.size, self.activator.midpoint())
    }

    pub fn encode(&mut self, token: &str) -> Pattern {
        self.coder.encode(token)
    }

    pub fn encode_as(&mut self, token: &str, pattern: &Pattern) {
        self.coder.encode_as(token, pattern)
    }

    pub fn encode_tokens<S: AsRef<str>>(&mut self, tokens: &[S], orthogonal: bool) -> Result<Array2<f64>> {
        self.coder.encode_tokens(tokens, orthogonal, &self.name)
    }

    pub fn pattern(&self, token: &str) -> Option<&Pattern> {
        self.coder.pattern(token)
    }

    pub fn knows(&self, token: &str) -> bool {
        self.coder.contains(token)
    }

    pub fn decode(&self, activity: &Pattern) -> &str {
        self.coder.decode(activity)
    }

    pub fn all_tokens(&self) -> &[String] {
        self.coder.tokens()
    }
}
