//! End-to-end estimation pipeline
//!
//! Composes the four stages with explicit inputs and outputs:
//!
//! 1. `MatrixBuilder`: ratings of the queried users -> `RatingMatrix`
//! 2. `WeightedALS`: `RatingMatrix` -> `ALSFit` -> `CompletedMatrix`
//! 3. `EmbeddingProjector`: `CompletedMatrix` -> `UserEmbedding`
//! 4. `NeighborEstimator`: one `RatingEstimate` per query
//!
//! Training is restricted to users that appear in the query set, which also
//! restricts the pool of candidate neighbors.

use crate::config::RaterConfig;
use crate::embedding::{EmbeddingProjector, UserEmbedding};
use crate::error::{EstimatorError, Result};
use crate::matrix::{CompletedMatrix, MatrixBuilder, RatingMatrix};
use crate::matrix_factorization::{ALSFit, WeightedALS};
use crate::neighbors::{NeighborConfig, NeighborEstimator};
use crate::types::{EntityId, EstimateRow, Query, RatingEstimate, RatingRecord};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Instant;

/// Stage outputs from a training pass
#[derive(Debug)]
pub struct TrainedModel {
    pub matrix: RatingMatrix,
    pub fit: ALSFit,
    pub completed: CompletedMatrix,
    pub embedding: UserEmbedding,
}

impl TrainedModel {
    pub fn estimator(&self, config: NeighborConfig) -> Result<NeighborEstimator<'_>> {
        NeighborEstimator::new(&self.matrix, &self.embedding, config)
    }
}

/// A query that could not be answered
#[derive(Debug)]
pub struct QueryFailure {
    /// Position in the query set
    pub index: usize,
    pub error: EstimatorError,
}

/// Results of a full run
#[derive(Debug)]
pub struct PipelineReport {
    /// One row per query, in query order; failed queries carry NaN
    pub rows: Vec<EstimateRow>,
    pub failures: Vec<QueryFailure>,
    /// Queries answered with NaN because no neighbor rated the item
    pub undefined: usize,
    pub training_users: usize,
    pub items: usize,
    pub observed_ratings: usize,
    /// Weighted reconstruction error after each ALS sweep
    pub als_errors: Vec<f64>,
}

impl PipelineReport {
    pub fn estimated(&self) -> usize {
        self.rows.len() - self.failures.len() - self.undefined
    }
}

pub struct Pipeline {
    config: RaterConfig,
}

impl Pipeline {
    pub fn new(config: RaterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RaterConfig {
        &self.config
    }

    /// Train with a generator seeded from `als.seed`
    pub fn train(&self, records: &[RatingRecord], queries: &[Query]) -> Result<TrainedModel> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.als.seed);
        self.train_with_rng(records, queries, &mut rng)
    }

    /// Build, complete and project the training matrix for `queries`
    pub fn train_with_rng<R: Rng>(
        &self,
        records: &[RatingRecord],
        queries: &[Query],
        rng: &mut R,
    ) -> Result<TrainedModel> {
        if records.is_empty() {
            return Err(EstimatorError::EmptyInput("no training ratings".to_string()));
        }

        let query_users: HashSet<EntityId> = queries.iter().map(|q| q.user_id.clone()).collect();

        let matrix = MatrixBuilder::new()
            .with_duplicate_policy(self.config.matrix.duplicate_policy)
            .register_items(queries.iter().map(|q| q.item_id.clone()))
            .build(records, Some(&query_users))?;

        let fit = WeightedALS::new(self.config.als.clone()).fit(&matrix, rng)?;
        let completed = fit.complete(self.config.scale)?;
        let embedding = EmbeddingProjector::new(self.config.embedding.dimensions).project(&completed)?;

        Ok(TrainedModel {
            matrix,
            fit,
            completed,
            embedding,
        })
    }

    /// Train and estimate every query
    ///
    /// Fatal errors abort the run. Per-query failures are logged, counted and
    /// written out as NaN rows.
    pub fn run(&self, records: &[RatingRecord], queries: &[Query]) -> Result<PipelineReport> {
        let started = Instant::now();
        tracing::info!(
            ratings = records.len(),
            queries = queries.len(),
            "Starting rating pipeline"
        );

        let model = self.train(records, queries)?;
        let estimator = model.estimator(self.config.neighbors.clone())?;
        let outcomes = estimator.estimate_batch(queries);

        let mut rows = Vec::with_capacity(queries.len());
        let mut failures = Vec::new();
        let mut undefined = 0;

        for (index, (query, outcome)) in queries.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(RatingEstimate {
                    value,
                    neighbors_used,
                    ..
                }) => {
                    if neighbors_used == 0 {
                        undefined += 1;
                    }
                    rows.push(EstimateRow {
                        user_id: query.user_id.clone(),
                        item_id: query.item_id.clone(),
                        estimate: value,
                    });
                }
                Err(error) if error.is_per_query() => {
                    tracing::warn!(index, error = %error, "Query could not be estimated");
                    rows.push(EstimateRow {
                        user_id: query.user_id.clone(),
                        item_id: query.item_id.clone(),
                        estimate: f64::NAN,
                    });
                    failures.push(QueryFailure { index, error });
                }
                Err(error) => return Err(error),
            }
        }

        let report = PipelineReport {
            rows,
            failures,
            undefined,
            training_users: model.matrix.num_users(),
            items: model.matrix.num_items(),
            observed_ratings: model.matrix.observed_count(),
            als_errors: model.fit.errors.clone(),
        };

        tracing::info!(
            estimated = report.estimated(),
            undefined = report.undefined,
            failed = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rating pipeline complete"
        );

        Ok(report)
    }
}
