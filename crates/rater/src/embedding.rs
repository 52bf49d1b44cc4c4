//! User-space embedding via truncated SVD
//!
//! Projects the rows of a completed rating matrix onto its leading singular
//! directions. Coordinates are the row scores `U_d · Σ_d` (equivalently
//! `A · V_d`), one row per user in the rating matrix's row order.

use crate::error::{EstimatorError, Result};
use crate::matrix::CompletedMatrix;
use nalgebra::{DMatrix, SVD};
use ndarray::{Array2, ArrayView1};

/// Low-dimensional coordinates for every user row
#[derive(Debug, Clone)]
pub struct UserEmbedding {
    coordinates: Array2<f64>,
    singular_values: Vec<f64>,
}

impl UserEmbedding {
    /// Wrap precomputed coordinates (one row per user)
    pub fn from_coordinates(coordinates: Array2<f64>) -> Self {
        Self {
            coordinates,
            singular_values: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.coordinates.nrows()
    }

    pub fn dimensions(&self) -> usize {
        self.coordinates.ncols()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.coordinates.row(index)
    }

    pub fn coordinates(&self) -> &Array2<f64> {
        &self.coordinates
    }

    /// Retained singular values, largest first (empty for precomputed coordinates)
    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }
}

/// Truncated SVD projector
#[derive(Debug, Clone)]
pub struct EmbeddingProjector {
    dimensions: usize,
}

impl Default for EmbeddingProjector {
    fn default() -> Self {
        Self::new(4)
    }
}

impl EmbeddingProjector {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Project every row of `completed` onto the leading `dimensions` components
    pub fn project(&self, completed: &CompletedMatrix) -> Result<UserEmbedding> {
        let (m, n) = completed.dim();
        let available = m.min(n);
        if self.dimensions == 0 || self.dimensions > available {
            return Err(EstimatorError::Dimensionality {
                requested: self.dimensions,
                available,
            });
        }

        let values = completed.values();
        let dense = DMatrix::from_fn(m, n, |r, c| values[[r, c]]);
        let svd = SVD::new(dense, true, false);
        let u = svd
            .u
            .ok_or_else(|| EstimatorError::NumericalFailure("SVD failed to compute U".into()))?;
        let sigma = svd.singular_values;

        // `SVD::new` sorts singular values in descending order
        let mut coordinates = Array2::<f64>::zeros((m, self.dimensions));
        for component in 0..self.dimensions {
            let mut column: Vec<f64> = (0..m)
                .map(|r| u[(r, component)] * sigma[component])
                .collect();

            // Fix the sign so the largest-magnitude entry is positive
            let pivot = column
                .iter()
                .copied()
                .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            if pivot < 0.0 {
                column.iter_mut().for_each(|v| *v = -*v);
            }

            for (r, value) in column.into_iter().enumerate() {
                coordinates[[r, component]] = value;
            }
        }

        let singular_values: Vec<f64> = sigma.iter().take(self.dimensions).copied().collect();

        tracing::info!(
            users = m,
            dimensions = self.dimensions,
            leading_singular_value = singular_values.first().copied().unwrap_or(0.0),
            "Projected completed matrix onto user space"
        );

        Ok(UserEmbedding {
            coordinates,
            singular_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::RatingScale;
    use ndarray::array;

    fn completed(values: Array2<f64>) -> CompletedMatrix {
        CompletedMatrix::from_product(values, RatingScale::default()).unwrap()
    }

    #[test]
    fn test_projection_shape_and_order() {
        let matrix = completed(array![
            [9.0, 8.0, 2.0],
            [8.5, 8.0, 1.5],
            [2.0, 3.0, 9.0],
            [1.0, 2.5, 8.0],
        ]);

        let embedding = EmbeddingProjector::new(2).project(&matrix).unwrap();
        assert_eq!(embedding.num_rows(), 4);
        assert_eq!(embedding.dimensions(), 2);

        let sv = embedding.singular_values();
        assert!(sv[0] >= sv[1]);
    }

    #[test]
    fn test_full_rank_projection_preserves_row_distances() {
        let values = array![[9.0, 2.0], [3.0, 7.0], [5.0, 5.0]];
        let matrix = completed(values.clone());
        let embedding = EmbeddingProjector::new(2).project(&matrix).unwrap();

        // With all components kept, the projection is an isometry of the rows
        for a in 0..3 {
            for b in 0..3 {
                let original = (&values.row(a) - &values.row(b)).mapv(|d| d * d).sum();
                let projected = (&embedding.row(a) - &embedding.row(b))
                    .mapv(|d| d * d)
                    .sum();
                assert!((original - projected).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_similar_rows_stay_close() {
        let matrix = completed(array![
            [9.0, 8.0, 2.0, 1.0],
            [9.0, 8.0, 2.0, 1.0],
            [1.0, 2.0, 9.0, 9.0],
        ]);
        let embedding = EmbeddingProjector::new(2).project(&matrix).unwrap();

        let twin = (&embedding.row(0) - &embedding.row(1)).mapv(|d| d * d).sum();
        let far = (&embedding.row(0) - &embedding.row(2)).mapv(|d| d * d).sum();
        assert!(twin < 1e-12);
        assert!(far > 1.0);
    }

    #[test]
    fn test_projection_is_reproducible() {
        let matrix = completed(array![[4.0, 6.0, 8.0], [1.0, 5.0, 9.0], [7.0, 7.0, 2.0]]);
        let projector = EmbeddingProjector::new(2);

        let first = projector.project(&matrix).unwrap();
        let second = projector.project(&matrix).unwrap();
        assert_eq!(first.coordinates(), second.coordinates());
    }

    #[test]
    fn test_too_many_dimensions() {
        let matrix = completed(array![[4.0, 6.0, 8.0], [1.0, 5.0, 9.0]]);
        let result = EmbeddingProjector::new(3).project(&matrix);

        assert!(matches!(
            result,
            Err(EstimatorError::Dimensionality {
                requested: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn test_zero_dimensions() {
        let matrix = completed(array![[4.0, 6.0], [1.0, 5.0]]);
        assert!(EmbeddingProjector::new(0).project(&matrix).is_err());
    }
}
