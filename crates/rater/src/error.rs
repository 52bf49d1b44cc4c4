//! Error types for the rating pipeline
//!
//! Per-query failures (`Alignment`, `UnknownItem`) are reported alongside the
//! batch results. Everything else aborts the run.

use crate::types::EntityId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EstimatorError>;

/// Factor axis on which a degenerate least-squares system was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorAxis {
    User,
    Item,
}

impl std::fmt::Display for FactorAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactorAxis::User => write!(f, "user"),
            FactorAxis::Item => write!(f, "item"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("User {user} is not part of the training matrix (query item {item})")]
    Alignment { user: EntityId, item: EntityId },

    #[error("Item {item} has no column in the training matrix (query user {user})")]
    UnknownItem { user: EntityId, item: EntityId },

    #[error("Cannot project onto {requested} dimensions: only {available} available")]
    Dimensionality { requested: usize, available: usize },

    #[error("Singular least-squares system for {axis} {id} (index {index})")]
    DegenerateSystem {
        axis: FactorAxis,
        index: usize,
        id: EntityId,
    },

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Resource limit '{limit}' exceeded: {detail}")]
    ResourceExceeded { limit: &'static str, detail: String },

    #[error("Duplicate rating for user {user}, item {item}")]
    DuplicateRating { user: EntityId, item: EntityId },

    #[error("Invalid rating {rating} for user {user}, item {item}")]
    InvalidRating {
        user: EntityId,
        item: EntityId,
        rating: f64,
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed record at line {line}: {message}")]
    MalformedRecord { line: u64, message: String },
}

impl EstimatorError {
    pub(crate) fn config(message: impl Into<String>, key: &str) -> Self {
        EstimatorError::Configuration {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Whether this error only invalidates a single query
    pub fn is_per_query(&self) -> bool {
        matches!(
            self,
            EstimatorError::Alignment { .. } | EstimatorError::UnknownItem { .. }
        )
    }
}
