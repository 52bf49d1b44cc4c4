//! Matrix completion properties across ALS and clamping

use crate::matrix::{RatingMatrix, RatingScale};
use crate::matrix_factorization::{ALSConfig, WeightedALS};
use crate::types::EntityId;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn ids(count: usize) -> Vec<EntityId> {
    (0..count as i64).map(EntityId::from).collect()
}

/// Sparse matrix with roughly `density` of its cells observed
fn random_sparse(users: usize, items: usize, density: f64, seed: u64) -> RatingMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let values = Array2::from_shape_fn((users, items), |_| {
        if rng.gen_bool(density) {
            rng.gen_range(1.0..10.0)
        } else {
            f64::NAN
        }
    });
    RatingMatrix::from_dense(ids(users), ids(items), values).unwrap()
}

/// Two taste groups with a clean low-rank structure
fn separable(users: usize, items: usize, seed: u64) -> RatingMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let values = Array2::from_shape_fn((users, items), |(u, i)| {
        if rng.gen_bool(0.6) {
            if (u % 2 == 0) == (i % 2 == 0) {
                9.0
            } else {
                2.0
            }
        } else {
            f64::NAN
        }
    });
    RatingMatrix::from_dense(ids(users), ids(items), values).unwrap()
}

fn config(k: usize, lambda: f64, iterations: usize, seed: u64) -> ALSConfig {
    ALSConfig {
        latent_factors: k,
        regularization: lambda,
        iterations,
        seed,
        ..ALSConfig::default()
    }
}

#[test]
fn test_positive_lambda_never_produces_nan() {
    for seed in 0..5 {
        let matrix = random_sparse(12, 9, 0.25, seed);
        for lambda in [0.01, 0.1, 1.0] {
            let fit = WeightedALS::new(config(4, lambda, 6, seed))
                .fit_seeded(&matrix)
                .unwrap();
            assert!(fit.product.iter().all(|v| v.is_finite()));

            let completed = fit.complete(RatingScale::default()).unwrap();
            assert!(completed.values().iter().all(|v| !v.is_nan()));
        }
    }
}

#[test]
fn test_completed_values_within_scale() {
    let nan = f64::NAN;
    // Ratings far outside the scale push the raw product outside it too
    let values = ndarray::array![
        [40.0, nan, -20.0],
        [nan, 35.0, nan],
        [-15.0, nan, 50.0],
    ];
    let matrix = RatingMatrix::from_dense(ids(3), ids(3), values).unwrap();
    let fit = WeightedALS::new(config(2, 0.1, 8, 3))
        .fit_seeded(&matrix)
        .unwrap();

    let completed = fit.complete(RatingScale::default()).unwrap();
    assert!(completed
        .values()
        .iter()
        .all(|&v| (1.0..=10.0).contains(&v)));
}

#[test]
fn test_error_trace_length_and_trend() {
    let matrix = separable(16, 10, 11);
    let iterations = 10;
    let fit = WeightedALS::new(config(2, 0.1, iterations, 5))
        .fit_seeded(&matrix)
        .unwrap();

    assert_eq!(fit.errors.len(), iterations);
    assert!(fit.errors.iter().all(|&e| e >= 0.0));

    // Individual sweeps may rise; the trace as a whole must not
    let first = fit.errors[0];
    let last = *fit.errors.last().unwrap();
    assert!(last <= first, "error grew from {} to {}", first, last);
}

#[test]
fn test_same_seed_same_completion() {
    let matrix = random_sparse(10, 8, 0.4, 21);
    let als = WeightedALS::new(config(3, 0.1, 8, 99));

    let first = als.fit_seeded(&matrix).unwrap();
    let second = als.fit_seeded(&matrix).unwrap();
    assert_eq!(first.product, second.product);
    assert_eq!(first.errors, second.errors);

    let mut rng_a = ChaCha8Rng::seed_from_u64(1234);
    let mut rng_b = ChaCha8Rng::seed_from_u64(1234);
    let third = als.fit(&matrix, &mut rng_a).unwrap();
    let fourth = als.fit(&matrix, &mut rng_b).unwrap();
    assert_eq!(third.product, fourth.product);
}

#[test]
fn test_different_seeds_start_differently() {
    let matrix = random_sparse(10, 8, 0.4, 21);
    let first = WeightedALS::new(config(3, 0.1, 1, 1))
        .fit_seeded(&matrix)
        .unwrap();
    let second = WeightedALS::new(config(3, 0.1, 1, 2))
        .fit_seeded(&matrix)
        .unwrap();
    assert_ne!(first.product, second.product);
}

#[test]
fn test_observed_cells_are_fitted_closely() {
    let matrix = separable(20, 12, 8);
    let fit = WeightedALS::new(config(2, 0.01, 15, 4))
        .fit_seeded(&matrix)
        .unwrap();

    let (m, n) = matrix.dim();
    let mut worst: f64 = 0.0;
    for u in 0..m {
        for i in 0..n {
            if matrix.is_observed(u, i) {
                worst = worst.max((fit.product[[u, i]] - matrix.value(u, i)).abs());
            }
        }
    }
    assert!(worst < 1.0, "worst observed residual {}", worst);
}
