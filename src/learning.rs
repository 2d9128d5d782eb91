//! Associative memory learning rule
//!
//! One-shot computation of a weight matrix and bias that realize a batch of
//! input -> output pattern associations through a layer's nonlinearity.
//! Targets are pulled back through `Activator::inverse`, so the linear system
//! behind the nonlinearity is solved directly instead of by iterative descent.
//!
//! # Rules
//!
//! - **Hebbian**: residual correlation, `dW = sum_p e_p x_p^T / |x_p|^2`.
//!   Exact for mutually orthogonal inputs, approximate otherwise.
//! - **Rehebbian**: minimal-norm regression, `dW = E (X^T X)^-1 X^T`.
//!   Exact whenever the inputs are linearly independent, best linear fit
//!   when they are not.
//!
//! Both rules write only the residual `E = inverse(Y) - (W X + b)`, so
//! flashing a pair that is already recalled exactly leaves the weights alone.
//!
//! # Capacity
//!
//! Inputs are augmented with a constant bias unit. Exact recall needs the
//! augmented columns to be linearly independent: at most `from.size + 1`
//! associations per pathway. Past that, `Flash::errors` counts the columns
//! whose recalled sign pattern no longer matches the intended one.

use std::collections::HashMap;

use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::activator::Activator;

/// Ridge added to the Gram diagonal, relative to its largest entry
const RIDGE: f64 = 1e-10;
/// Ridge growth factor when factorization fails
const RIDGE_GROWTH: f64 = 100.0;
const MAX_FACTOR_ATTEMPTS: usize = 12;

/// Weight update rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningRule {
    Hebbian,
    #[default]
    Rehebbian,
}

/// Result of one flash
#[derive(Debug, Clone)]
pub struct Flash {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
    /// Columns whose thresholded recall differs from the intended pattern
    pub errors: usize,
}

/// Extend `weights`/`bias` so that `squash(W x_p + b) ~= y_p` for every column `p`.
///
/// `x` is `from.size x P`, `y` is `to.size x P`. The returned weights replace
/// the inputs; `weights` and `bias` are not modified in place.
pub fn flash(
    rule: LearningRule,
    weights: &Array2<f64>,
    bias: &Array1<f64>,
    x: &Array2<f64>,
    y: &Array2<f64>,
    from: &Activator,
    to: &Activator,
) -> Flash {
    assert_eq!(weights.nrows(), y.nrows(), "weights rows vs target size");
    assert_eq!(weights.ncols(), x.nrows(), "weights cols vs input size");
    assert_eq!(bias.len(), y.nrows(), "bias vs target size");
    assert_eq!(x.ncols(), y.ncols(), "input vs target columns");

    let (m, n) = weights.dim();
    let p = x.ncols();
    if p == 0 {
        return Flash {
            weights: weights.clone(),
            bias: bias.clone(),
            errors: 0,
        };
    }

    // Centered inputs plus a constant bias row
    let mid = from.midpoint();
    let mut inputs = Array2::<f64>::ones((n + 1, p));
    inputs.slice_mut(s![..n, ..]).assign(&x.mapv(|v| v - mid));

    // W x + b == W (x - mid) + (b + mid * rowsum(W))
    let mut augmented = Array2::<f64>::zeros((m, n + 1));
    augmented.slice_mut(s![.., ..n]).assign(weights);
    let centered_bias = bias + &weights.sum_axis(Axis(1)).mapv(|r| r * mid);
    augmented.column_mut(n).assign(&centered_bias);

    let targets = y.mapv(|v| to.inverse(v));
    let residual = &targets - &augmented.dot(&inputs);

    let delta = match rule {
        LearningRule::Hebbian => {
            let norms = inputs.map_axis(Axis(0), |c| c.dot(&c));
            let scaled = Array2::from_shape_fn((m, p), |(i, j)| residual[[i, j]] / norms[j]);
            scaled.dot(&inputs.t())
        }
        LearningRule::Rehebbian => {
            let gram = inputs.t().dot(&inputs);
            let coefficients = solve_gram(&gram, &residual.t().to_owned());
            inputs.dot(&coefficients).reversed_axes()
        }
    };
    augmented += &delta;

    let new_weights = augmented.slice(s![.., ..n]).to_owned();
    let new_bias = augmented.column(n).to_owned() - new_weights.sum_axis(Axis(1)).mapv(|r| r * mid);
    let errors = count_errors(&new_weights, &new_bias, x, y, to);

    Flash {
        weights: new_weights,
        bias: new_bias,
        errors,
    }
}

/// Columns of `x` whose recall through `(weights, bias)` misses the sign pattern of `y`
pub fn count_errors(
    weights: &Array2<f64>,
    bias: &Array1<f64>,
    x: &Array2<f64>,
    y: &Array2<f64>,
    to: &Activator,
) -> usize {
    let recalled = weights.dot(x);
    (0..x.ncols())
        .filter(|&p| {
            let column = recalled.column(p);
            column
                .iter()
                .zip(bias.iter())
                .zip(y.column(p).iter())
                .any(|((&r, &b), &t)| to.is_on(to.squash(r + b)) != to.is_on(t))
        })
        .count()
}

/// Solve `(G + ridge I) Z = rhs` for symmetric positive semi-definite `G`
fn solve_gram(gram: &Array2<f64>, rhs: &Array2<f64>) -> Array2<f64> {
    let scale = gram
        .diag()
        .iter()
        .fold(0.0_f64, |acc, &d| acc.max(d))
        .max(f64::MIN_POSITIVE);
    let mut ridge = scale * RIDGE;

    for _ in 0..MAX_FACTOR_ATTEMPTS {
        if let Some(lower) = cholesky(gram, ridge) {
            return cholesky_solve(&lower, rhs);
        }
        log::trace!("cholesky failed with ridge {:e}, retrying", ridge);
        ridge *= RIDGE_GROWTH;
    }

    log::warn!(
        "Gram matrix of {} columns could not be factored, leaving weights unchanged",
        gram.nrows()
    );
    Array2::zeros(rhs.dim())
}

/// Lower Cholesky factor of `G + ridge I`, or None if a pivot is not positive
fn cholesky(gram: &Array2<f64>, ridge: f64) -> Option<Array2<f64>> {
    let n = gram.nrows();
    let mut lower = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut pivot = gram[[j, j]] + ridge;
        for k in 0..j {
            pivot -= lower[[j, k]] * lower[[j, k]];
        }
        // Also rejects NaN
        if !(pivot > 0.0) {
            return None;
        }
        let pivot = pivot.sqrt();
        lower[[j, j]] = pivot;
        for i in (j + 1)..n {
            let mut sum = gram[[i, j]];
            for k in 0..j {
                sum -= lower[[i, k]] * lower[[j, k]];
            }
            lower[[i, j]] = sum / pivot;
        }
    }
    Some(lower)
}

/// Solve `L L^T Z = rhs`, row operations span every right-hand side at once
fn cholesky_solve(lower: &Array2<f64>, rhs: &Array2<f64>) -> Array2<f64> {
    let n = lower.nrows();
    let mut z = rhs.clone();

    // Forward: L w = rhs
    for i in 0..n {
        let (done, mut rest) = z.view_mut().split_at(Axis(0), i);
        let mut row = rest.row_mut(0);
        for k in 0..i {
            row.scaled_add(-lower[[i, k]], &done.row(k));
        }
        let pivot = lower[[i, i]];
        row.mapv_inplace(|v| v / pivot);
    }

    // Backward: L^T z = w
    for i in (0..n).rev() {
        let (mut head, tail) = z.view_mut().split_at(Axis(0), i + 1);
        let mut row = head.row_mut(i);
        for k in (i + 1)..n {
            row.scaled_add(-lower[[k, i]], &tail.row(k - i - 1));
        }
        let pivot = lower[[i, i]];
        row.mapv_inplace(|v| v / pivot);
    }

    z
}

/// Accumulated training pairs of one pathway
///
/// Weights are always recomputed from zero over every pair seen so far, so
/// appending pairs never degrades earlier associations beyond what capacity
/// forces. An input seen again replaces its target.
#[derive(Debug, Clone)]
pub struct PathwayBuilder {
    to_size: usize,
    from_size: usize,
    inputs: Vec<Array1<f64>>,
    outputs: Vec<Array1<f64>>,
    index: HashMap<Vec<u64>, usize>,
}

impl PathwayBuilder {
    pub fn new(to_size: usize, from_size: usize) -> Self {
        Self {
            to_size,
            from_size,
            inputs: Vec::new(),
            outputs: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Append the columns of `x -> y`
    pub fn add(&mut self, x: &Array2<f64>, y: &Array2<f64>) {
        assert_eq!(x.nrows(), self.from_size, "input size");
        assert_eq!(y.nrows(), self.to_size, "target size");
        assert_eq!(x.ncols(), y.ncols(), "input vs target columns");

        for p in 0..x.ncols() {
            let input = x.column(p).to_owned();
            let output = y.column(p).to_owned();
            let key: Vec<u64> = input.iter().map(|v| v.to_bits()).collect();
            match self.index.get(&key) {
                Some(&i) => self.outputs[i] = output,
                None => {
                    self.index.insert(key, self.inputs.len());
                    self.inputs.push(input);
                    self.outputs.push(output);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Stacked `(inputs, targets)`, one column per pair
    pub fn columns(&self) -> (Array2<f64>, Array2<f64>) {
        let p = self.inputs.len();
        let x = Array2::from_shape_fn((self.from_size, p), |(i, j)| self.inputs[j][i]);
        let y = Array2::from_shape_fn((self.to_size, p), |(i, j)| self.outputs[j][i]);
        (x, y)
    }

    /// Weights realizing every accumulated pair, starting from zero
    pub fn flash(&self, rule: LearningRule, from: &Activator, to: &Activator) -> Flash {
        let (x, y) = self.columns();
        let weights = Array2::zeros((self.to_size, self.from_size));
        let bias = Array1::zeros(self.to_size);
        flash(rule, &weights, &bias, &x, &y, from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::sylvester;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_patterns(act: &Activator, size: usize, count: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((size, count), |_| act.level(rng.gen::<bool>()))
    }

    fn hadamard_patterns(act: &Activator, size: usize) -> Array2<f64> {
        Array2::from_shape_fn((size, size), |(i, j)| act.level(sylvester(i, j) > 0.0))
    }

    fn recall(f: &Flash, x: &Array2<f64>, act: &Activator) -> Array2<f64> {
        let mut pre = f.weights.dot(x);
        for mut column in pre.columns_mut() {
            column += &f.bias;
        }
        pre.mapv(|v| act.squash(v))
    }

    fn max_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        a.iter().zip(b.iter()).fold(0.0, |acc, (x, y)| acc.max((x - y).abs()))
    }

    #[test]
    fn test_rehebbian_exact_recall() {
        let act = Activator::tanh(1e-3);
        let x = random_patterns(&act, 32, 20, 1);
        let y = random_patterns(&act, 24, 20, 2);
        let w = Array2::zeros((24, 32));
        let b = Array1::zeros(24);

        let f = flash(LearningRule::Rehebbian, &w, &b, &x, &y, &act, &act);
        assert_eq!(f.errors, 0);
        assert!(max_diff(&recall(&f, &x, &act), &y) < 1e-6);
    }

    #[test]
    fn test_flash_idempotent() {
        let act = Activator::tanh(1e-3);
        let x = random_patterns(&act, 16, 10, 3);
        let y = random_patterns(&act, 16, 10, 4);
        let w = Array2::zeros((16, 16));
        let b = Array1::zeros(16);

        let once = flash(LearningRule::Rehebbian, &w, &b, &x, &y, &act, &act);
        let twice = flash(LearningRule::Rehebbian, &once.weights, &once.bias, &x, &y, &act, &act);
        assert!(max_diff(&once.weights, &twice.weights) < 1e-8);
        assert!(once.bias.iter().zip(twice.bias.iter()).all(|(a, b)| (a - b).abs() < 1e-8));
    }

    #[test]
    fn test_capacity_orthogonal_within_width() {
        let act = Activator::tanh(1e-3);
        let x = hadamard_patterns(&act, 16);
        let y = random_patterns(&act, 16, 16, 5);
        let w = Array2::zeros((16, 16));
        let b = Array1::zeros(16);

        for rule in [LearningRule::Hebbian, LearningRule::Rehebbian] {
            let f = flash(rule, &w, &b, &x, &y, &act, &act);
            assert_eq!(f.errors, 0, "{:?}", rule);
        }
    }

    #[test]
    fn test_capacity_overflow_counts_errors() {
        let act = Activator::tanh(1e-3);
        let width = 16;
        let outputs = 64;
        let orthogonal = hadamard_patterns(&act, width);
        let extras = random_patterns(&act, width, width, 6);
        let targets = random_patterns(&act, outputs, 2 * width, 7);

        // nested pair sets: each one extends the previous by one column
        let errors_for = |extra: usize| {
            let mut x = Array2::zeros((width, width + extra));
            x.slice_mut(s![.., ..width]).assign(&orthogonal);
            x.slice_mut(s![.., width..]).assign(&extras.slice(s![.., ..extra]));
            let y = targets.slice(s![.., ..width + extra]).to_owned();
            let f = flash(
                LearningRule::Rehebbian,
                &Array2::zeros((outputs, width)),
                &Array1::zeros(outputs),
                &x,
                &y,
                &act,
                &act,
            );
            f.errors
        };

        let counts: Vec<usize> = (1..=width).map(errors_for).collect();
        assert!(counts[width - 1] > 0, "{:?}", counts);
        for pair in counts.windows(2) {
            assert!(pair[1] >= pair[0], "errors dropped as pairs were added: {:?}", counts);
        }
    }

    #[test]
    fn test_logistic_exact_recall() {
        let act = Activator::logistic(1e-3);
        let x = random_patterns(&act, 32, 12, 8);
        let y = random_patterns(&act, 16, 12, 9);
        let f = flash(
            LearningRule::Rehebbian,
            &Array2::zeros((16, 32)),
            &Array1::zeros(16),
            &x,
            &y,
            &act,
            &act,
        );
        assert_eq!(f.errors, 0);
        assert!(max_diff(&recall(&f, &x, &act), &y) < 1e-6);
    }

    #[test]
    fn test_builder_appends_without_forgetting() {
        let act = Activator::tanh(1e-3);
        let x = random_patterns(&act, 32, 8, 10);
        let y = random_patterns(&act, 32, 8, 11);

        let mut builder = PathwayBuilder::new(32, 32);
        builder.add(&x.slice(s![.., ..4]).to_owned(), &y.slice(s![.., ..4]).to_owned());
        let first = builder.flash(LearningRule::Rehebbian, &act, &act);
        assert_eq!(first.errors, 0);

        builder.add(&x.slice(s![.., 4..]).to_owned(), &y.slice(s![.., 4..]).to_owned());
        let second = builder.flash(LearningRule::Rehebbian, &act, &act);
        assert_eq!(builder.len(), 8);
        assert_eq!(second.errors, 0);
        assert!(max_diff(&recall(&second, &x, &act), &y) < 1e-6);
    }

    #[test]
    fn test_builder_duplicate_input_overwrites() {
        let act = Activator::tanh(1e-3);
        let x = random_patterns(&act, 16, 1, 12);
        let y = random_patterns(&act, 16, 2, 13);

        let mut builder = PathwayBuilder::new(16, 16);
        builder.add(&x, &y.slice(s![.., 0..1]).to_owned());
        builder.add(&x, &y.slice(s![.., 1..2]).to_owned());
        builder.add(&x, &y.slice(s![.., 1..2]).to_owned());
        assert_eq!(builder.len(), 1);

        for rule in [LearningRule::Hebbian, LearningRule::Rehebbian] {
            let f = builder.flash(rule, &act, &act);
            let out = recall(&f, &x, &act);
            assert!(max_diff(&out, &y.slice(s![.., 1..2]).to_owned()) < 1e-6, "{:?}", rule);
        }
    }

    #[test]
    fn test_empty_flash_is_identity() {
        let act = Activator::tanh(1e-3);
        let w = Array2::from_elem((4, 3), 0.5);
        let b = Array1::from_elem(4, -0.25);
        let f = flash(
            LearningRule::Hebbian,
            &w,
            &b,
            &Array2::zeros((3, 0)),
            &Array2::zeros((4, 0)),
            &act,
            &act,
        );
        assert_eq!(f.weights, w);
        assert_eq!(f.bias, b);
        assert_eq!(f.errors, 0);
    }
}
