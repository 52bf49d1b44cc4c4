//! Board game rating estimation
//!
//! Completes a sparse user×game rating matrix with weighted ALS, projects
//! the completed rows into a low-dimensional user space with truncated SVD,
//! and estimates held-out ratings from the nearest users that actually rated
//! the game.

pub mod config;
pub mod embedding;
pub mod error;
pub mod io;
pub mod matrix;
pub mod matrix_factorization;
pub mod neighbors;
pub mod observability;
pub mod pipeline;
pub mod types;

// Re-export key types
pub use config::{EmbeddingConfig, IoConfig, LogFormat, LoggingConfig, MatrixConfig, RaterConfig};
pub use embedding::{EmbeddingProjector, UserEmbedding};
pub use error::{EstimatorError, FactorAxis, Result};
pub use io::{CsvEstimateWriter, CsvSource, EstimateSink, QuerySource, RatingSource};
pub use matrix::{CompletedMatrix, DuplicatePolicy, MatrixBuilder, RatingMatrix, RatingScale};
pub use matrix_factorization::{ALSConfig, ALSFit, DegeneratePolicy, FactorPair, WeightedALS};
pub use neighbors::{NeighborConfig, NeighborEstimator};
pub use observability::init_logging;
pub use pipeline::{Pipeline, PipelineReport, QueryFailure, TrainedModel};
pub use types::*;

#[cfg(test)]
mod tests;
