//! Nearest-neighbor rating estimation in user space
//!
//! For a query (user, item), users are ranked by Euclidean distance to the
//! query user's embedding coordinate and the item's *observed* ratings are
//! averaged over the nearest users that actually rated it. The observed mask
//! decides eligibility: after completion every cell has a value, so imputed
//! cells must never count as a neighbor's rating.

use crate::embedding::UserEmbedding;
use crate::error::{EstimatorError, Result};
use crate::matrix::RatingMatrix;
use crate::types::{Query, RatingEstimate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Neighbor search parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborConfig {
    /// Maximum number of observed neighbor ratings to average
    pub neighbors: usize,
    /// Whether the query user (distance 0) is a candidate
    pub include_self: bool,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            neighbors: 50,
            include_self: true,
        }
    }
}

impl NeighborConfig {
    pub fn validate(&self) -> Result<()> {
        if self.neighbors == 0 {
            return Err(EstimatorError::config(
                "neighbors must be greater than 0",
                "neighbors.neighbors",
            ));
        }
        Ok(())
    }
}

/// Estimates ratings from the nearest users that rated the item
pub struct NeighborEstimator<'a> {
    matrix: &'a RatingMatrix,
    embedding: &'a UserEmbedding,
    config: NeighborConfig,
}

impl<'a> NeighborEstimator<'a> {
    /// Pair a rating matrix with the embedding of its rows
    pub fn new(
        matrix: &'a RatingMatrix,
        embedding: &'a UserEmbedding,
        config: NeighborConfig,
    ) -> Result<Self> {
        config.validate()?;

        if embedding.num_rows() != matrix.num_users() {
            return Err(EstimatorError::NumericalFailure(format!(
                "embedding has {} rows but the rating matrix has {} users",
                embedding.num_rows(),
                matrix.num_users()
            )));
        }

        Ok(Self {
            matrix,
            embedding,
            config,
        })
    }

    pub fn config(&self) -> &NeighborConfig {
        &self.config
    }

    /// All candidate rows ordered by ascending distance from `row`
    ///
    /// The sort is stable, so equal distances keep matrix row order.
    pub fn rank_neighbors(&self, row: usize) -> Vec<(usize, f64)> {
        let origin = self.embedding.row(row);

        let mut ranked: Vec<(usize, f64)> = (0..self.embedding.num_rows())
            .filter(|&candidate| self.config.include_self || candidate != row)
            .map(|candidate| {
                let distance = origin
                    .iter()
                    .zip(self.embedding.row(candidate).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                (candidate, distance)
            })
            .collect();

        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked
    }

    /// Estimate a single query
    ///
    /// Unknown users or items are per-query errors. A query whose neighbors
    /// never rated the item yields a NaN estimate with `neighbors_used == 0`.
    pub fn estimate(&self, query: &Query) -> Result<RatingEstimate> {
        let row = self
            .matrix
            .row_of(&query.user_id)
            .ok_or_else(|| EstimatorError::Alignment {
                user: query.user_id.clone(),
                item: query.item_id.clone(),
            })?;
        let col = self
            .matrix
            .col_of(&query.item_id)
            .ok_or_else(|| EstimatorError::UnknownItem {
                user: query.user_id.clone(),
                item: query.item_id.clone(),
            })?;

        let limit = self.config.neighbors;
        let mut collected = Vec::with_capacity(limit.min(self.matrix.num_users()));
        for (neighbor, _) in self.rank_neighbors(row) {
            if self.matrix.is_observed(neighbor, col) {
                collected.push(self.matrix.value(neighbor, col));
                if collected.len() == limit {
                    break;
                }
            }
        }

        let value = if collected.is_empty() {
            tracing::debug!(
                user = %query.user_id,
                item = %query.item_id,
                "No neighbor with an observed rating"
            );
            f64::NAN
        } else {
            collected.iter().sum::<f64>() / collected.len() as f64
        };

        Ok(RatingEstimate {
            user_id: query.user_id.clone(),
            item_id: query.item_id.clone(),
            value,
            neighbors_used: collected.len(),
        })
    }

    /// Estimate every query; outcomes keep the input order
    pub fn estimate_batch(&self, queries: &[Query]) -> Vec<Result<RatingEstimate>> {
        queries.par_iter().map(|query| self.estimate(query)).collect()
    }
}
