//! Matrix Factorization using weighted Alternating Least Squares (ALS)
//!
//! Completes a sparse rating matrix Q ≈ X·Y where X is [users x k] and Y is
//! [k x items]. In weighted mode the observed mask W zeroes out the
//! contribution of unrated cells, so only genuine ratings shape the factors.
//! Every cell of X·Y is returned, including smoothed observed cells.

use crate::error::{EstimatorError, FactorAxis, Result};
use crate::matrix::{CompletedMatrix, RatingMatrix, RatingScale};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Relative pivot size below which a Cholesky factorization is rejected
const PIVOT_TOLERANCE: f64 = 1e-12;

/// How to handle a per-row or per-column solve whose normal matrix is singular
///
/// Reachable with zero regularization, when a user or item has no observed
/// weight (or too little to pin down all factors), or when λ is lost to
/// rounding against very large factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// Keep the factor from the previous sweep
    #[default]
    Skip,
    /// Replace the factor with zeros
    ZeroFill,
    /// Abort the fit with `DegenerateSystem`
    Fail,
}

/// ALS configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ALSConfig {
    /// Number of latent factors (k)
    pub latent_factors: usize,
    /// Regularization parameter (lambda)
    pub regularization: f64,
    /// Number of sweeps; always run in full
    pub iterations: usize,
    /// Weight solves by the observed mask
    pub weighted: bool,
    /// Factors start uniform in [0, init_scale)
    pub init_scale: f64,
    /// Seed for factor initialization
    pub seed: u64,
    pub degenerate_policy: DegeneratePolicy,
    /// Upper bound on users x items
    pub max_cells: usize,
    /// Wall-clock budget for the whole fit, checked between sweeps
    pub timeout_ms: Option<u64>,
}

impl Default for ALSConfig {
    fn default() -> Self {
        Self {
            latent_factors: 10,
            regularization: 0.1,
            iterations: 10,
            weighted: true,
            init_scale: 5.0,
            seed: 42,
            degenerate_policy: DegeneratePolicy::Skip,
            max_cells: 50_000_000,
            timeout_ms: None,
        }
    }
}

impl ALSConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.latent_factors == 0 {
            return Err(EstimatorError::config(
                "latent_factors must be greater than 0",
                "als.latent_factors",
            ));
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(EstimatorError::config(
                format!(
                    "regularization must be finite and non-negative, got {}",
                    self.regularization
                ),
                "als.regularization",
            ));
        }
        if self.iterations == 0 {
            return Err(EstimatorError::config(
                "iterations must be greater than 0",
                "als.iterations",
            ));
        }
        if !self.init_scale.is_finite() || self.init_scale <= 0.0 {
            return Err(EstimatorError::config(
                format!("init_scale must be positive, got {}", self.init_scale),
                "als.init_scale",
            ));
        }
        if self.max_cells == 0 {
            return Err(EstimatorError::config(
                "max_cells must be greater than 0",
                "als.max_cells",
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(EstimatorError::config(
                "timeout_ms must be greater than 0 when set",
                "als.timeout_ms",
            ));
        }
        Ok(())
    }
}

/// Low-rank factors: user factors [users x k] and item factors [k x items]
#[derive(Debug, Clone)]
pub struct FactorPair {
    pub user_factors: Array2<f64>,
    pub item_factors: Array2<f64>,
}

impl FactorPair {
    pub fn latent_factors(&self) -> usize {
        self.user_factors.ncols()
    }

    /// Full reconstruction X·Y
    pub fn product(&self) -> Array2<f64> {
        self.user_factors.dot(&self.item_factors)
    }

    /// Reconstructed value for a single cell
    pub fn predict(&self, row: usize, col: usize) -> f64 {
        self.user_factors.row(row).dot(&self.item_factors.column(col))
    }
}

/// Result of an ALS fit
#[derive(Debug, Clone)]
pub struct ALSFit {
    pub factors: FactorPair,
    /// Unclamped X·Y
    pub product: Array2<f64>,
    /// Weighted squared reconstruction error after each sweep
    pub errors: Vec<f64>,
    /// Solves resolved by the degenerate policy instead of Cholesky
    pub degenerate_solves: usize,
}

impl ALSFit {
    /// Clamp the reconstruction into the rating scale
    pub fn complete(&self, scale: RatingScale) -> Result<CompletedMatrix> {
        CompletedMatrix::from_product(self.product.clone(), scale)
    }

    pub fn final_error(&self) -> Option<f64> {
        self.errors.last().copied()
    }
}

/// Outcome of one row or column solve
enum Solved {
    Factor(Array1<f64>),
    Degenerate(Array1<f64>),
}

impl Solved {
    fn into_parts(self) -> (Array1<f64>, bool) {
        match self {
            Solved::Factor(factor) => (factor, false),
            Solved::Degenerate(factor) => (factor, true),
        }
    }
}

/// Weighted ALS matrix completion
pub struct WeightedALS {
    config: ALSConfig,
}

impl WeightedALS {
    pub fn new(config: ALSConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ALSConfig {
        &self.config
    }

    /// Fit with a generator seeded from `config.seed`
    pub fn fit_seeded(&self, matrix: &RatingMatrix) -> Result<ALSFit> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.fit(matrix, &mut rng)
    }

    /// Factorize `matrix`, drawing the initial factors from `rng`
    ///
    /// Runs exactly `iterations` sweeps. Each sweep solves every user row
    /// against the current item factors, then every item column against the
    /// freshly updated user factors.
    pub fn fit<R: Rng>(&self, matrix: &RatingMatrix, rng: &mut R) -> Result<ALSFit> {
        self.config.validate()?;

        let (m, n) = matrix.dim();
        let k = self.config.latent_factors;

        let cells = m.checked_mul(n).unwrap_or(usize::MAX);
        if cells > self.config.max_cells {
            return Err(EstimatorError::ResourceExceeded {
                limit: "max_cells",
                detail: format!(
                    "{} users x {} items = {} cells exceeds {}",
                    m, n, cells, self.config.max_cells
                ),
            });
        }

        let started = Instant::now();
        let deadline = self.config.timeout().map(|budget| started + budget);

        tracing::info!(
            users = m,
            items = n,
            latent_factors = k,
            regularization = self.config.regularization,
            iterations = self.config.iterations,
            weighted = self.config.weighted,
            "Starting ALS fit"
        );

        let ratings = matrix.zero_filled();
        let observed = matrix.mask();
        let solve_weights = if self.config.weighted {
            observed.clone()
        } else {
            Array2::ones((m, n))
        };

        let scale = self.config.init_scale;
        let mut user_factors = Array2::from_shape_fn((m, k), |_| rng.gen_range(0.0..scale));
        let mut item_factors = Array2::from_shape_fn((k, n), |_| rng.gen_range(0.0..scale));

        let mut errors = Vec::with_capacity(self.config.iterations);
        let mut degenerate_solves = 0;

        for iteration in 0..self.config.iterations {
            self.check_deadline(deadline, started, iteration)?;
            let (next_users, skipped) = self.update_users(
                matrix,
                &ratings,
                &solve_weights,
                &user_factors,
                &item_factors,
            )?;
            user_factors = next_users;
            degenerate_solves += skipped;

            self.check_deadline(deadline, started, iteration)?;
            let (next_items, skipped) = self.update_items(
                matrix,
                &ratings,
                &solve_weights,
                &user_factors,
                &item_factors,
            )?;
            item_factors = next_items;
            degenerate_solves += skipped;

            let error = weighted_error(&ratings, observed, &user_factors, &item_factors);
            tracing::debug!("ALS iteration {}: weighted error = {:.4}", iteration, error);
            errors.push(error);
        }

        let factors = FactorPair {
            user_factors,
            item_factors,
        };
        let product = factors.product();

        tracing::info!(
            final_error = errors.last().copied().unwrap_or(0.0),
            degenerate_solves,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ALS fit complete"
        );

        Ok(ALSFit {
            factors,
            product,
            errors,
            degenerate_solves,
        })
    }

    fn check_deadline(
        &self,
        deadline: Option<Instant>,
        started: Instant,
        iteration: usize,
    ) -> Result<()> {
        match deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(EstimatorError::ResourceExceeded {
                    limit: "als_timeout",
                    detail: format!(
                        "stopped in iteration {} of {} after {:?}",
                        iteration + 1,
                        self.config.iterations,
                        started.elapsed()
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Solve every user row against the item factors
    fn update_users(
        &self,
        matrix: &RatingMatrix,
        ratings: &Array2<f64>,
        weights: &Array2<f64>,
        user_factors: &Array2<f64>,
        item_factors: &Array2<f64>,
    ) -> Result<(Array2<f64>, usize)> {
        // Rows of `items` are the item vectors the user rows are regressed on
        let items = item_factors.t();

        let solved = (0..matrix.num_users())
            .into_par_iter()
            .map(|u| {
                self.solve_slot(
                    FactorAxis::User,
                    u,
                    matrix,
                    items,
                    weights.row(u),
                    ratings.row(u),
                    user_factors.row(u),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut next = Array2::<f64>::zeros(user_factors.raw_dim());
        let mut degenerate = 0;
        for (u, slot) in solved.into_iter().enumerate() {
            let (factor, was_degenerate) = slot.into_parts();
            next.row_mut(u).assign(&factor);
            degenerate += usize::from(was_degenerate);
        }

        if degenerate > 0 {
            tracing::warn!(count = degenerate, "Degenerate user solves in sweep");
        }

        Ok((next, degenerate))
    }

    /// Solve every item column against the user factors
    fn update_items(
        &self,
        matrix: &RatingMatrix,
        ratings: &Array2<f64>,
        weights: &Array2<f64>,
        user_factors: &Array2<f64>,
        item_factors: &Array2<f64>,
    ) -> Result<(Array2<f64>, usize)> {
        let users = user_factors.view();

        let solved = (0..matrix.num_items())
            .into_par_iter()
            .map(|i| {
                self.solve_slot(
                    FactorAxis::Item,
                    i,
                    matrix,
                    users,
                    weights.column(i),
                    ratings.column(i),
                    item_factors.column(i),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut next = Array2::<f64>::zeros(item_factors.raw_dim());
        let mut degenerate = 0;
        for (i, slot) in solved.into_iter().enumerate() {
            let (factor, was_degenerate) = slot.into_parts();
            next.column_mut(i).assign(&factor);
            degenerate += usize::from(was_degenerate);
        }

        if degenerate > 0 {
            tracing::warn!(count = degenerate, "Degenerate item solves in sweep");
        }

        Ok((next, degenerate))
    }

    /// Solve (Fᵀ·diag(w)·F + λI) x = Fᵀ·diag(w)·r for one row or column
    ///
    /// `fixed` holds one fixed-side factor vector per row.
    #[allow(clippy::too_many_arguments)]
    fn solve_slot(
        &self,
        axis: FactorAxis,
        index: usize,
        matrix: &RatingMatrix,
        fixed: ArrayView2<f64>,
        weights: ArrayView1<f64>,
        targets: ArrayView1<f64>,
        previous: ArrayView1<f64>,
    ) -> Result<Solved> {
        let k = fixed.ncols();
        let weighted = &fixed * &weights.insert_axis(Axis(1));

        let mut a = weighted.t().dot(&fixed);
        for d in 0..k {
            a[[d, d]] += self.config.regularization;
        }
        let b = weighted.t().dot(&targets);

        if let Some(x) = cholesky_solve(&a, &b, self.config.regularization) {
            return Ok(Solved::Factor(x));
        }

        match self.config.degenerate_policy {
            DegeneratePolicy::Skip => Ok(Solved::Degenerate(previous.to_owned())),
            DegeneratePolicy::ZeroFill => Ok(Solved::Degenerate(Array1::zeros(k))),
            DegeneratePolicy::Fail => {
                let id = match axis {
                    FactorAxis::User => matrix.user_at(index).clone(),
                    FactorAxis::Item => matrix.item_at(index).clone(),
                };
                Err(EstimatorError::DegenerateSystem { axis, index, id })
            }
        }
    }
}

/// Solve A * x = b for symmetric positive definite A via Cholesky (A = L * Lᵀ)
///
/// `regularization` is the λ already added to the diagonal. Every exact
/// pivot is then at least λ, so the pivot tolerance never exceeds λ / 2.
/// Returns `None` when A is not numerically positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>, regularization: f64) -> Option<Array1<f64>> {
    let n = a.nrows();
    let max_diag = a.diag().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if max_diag == 0.0 || !max_diag.is_finite() {
        return None;
    }
    let mut tolerance = PIVOT_TOLERANCE * max_diag;
    if regularization > 0.0 {
        tolerance = tolerance.min(0.5 * regularization);
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= tolerance {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: Lᵀ * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Σ (W ⊙ (Q − X·Y))²
pub fn weighted_error(
    ratings: &Array2<f64>,
    weights: &Array2<f64>,
    user_factors: &Array2<f64>,
    item_factors: &Array2<f64>,
) -> f64 {
    let residual = (ratings - &user_factors.dot(item_factors)) * weights;
    residual.mapv(|r| r * r).sum()
}
