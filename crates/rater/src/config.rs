//! Configuration for the rating pipeline
//!
//! Values are layered: built-in defaults < `config/rater.{toml,yaml,json}` <
//! an explicit file < environment variables prefixed with `RATER_`. Nested
//! keys use a double underscore, for example:
//!
//! ```bash
//! export RATER_ALS__LATENT_FACTORS=12
//! export RATER_ALS__SEED=7
//! export RATER_NEIGHBORS__NEIGHBORS=25
//! export RATER_LOGGING__FORMAT=pretty
//! ```

use crate::error::{EstimatorError, Result};
use crate::matrix::{DuplicatePolicy, RatingScale};
use crate::matrix_factorization::ALSConfig;
use crate::neighbors::NeighborConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config/rater";
const ENV_PREFIX: &str = "RATER";

/// Pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RaterConfig {
    /// Matrix factorization settings
    pub als: ALSConfig,

    /// User-space projection settings
    pub embedding: EmbeddingConfig,

    /// Neighbor search settings
    pub neighbors: NeighborConfig,

    /// Matrix construction settings
    pub matrix: MatrixConfig,

    /// Valid rating range
    pub scale: RatingScale,

    /// Column names for CSV input and output
    pub io: IoConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Number of retained SVD components (default: 4)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimensions: 4 }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Handling of repeated (user, item) ratings
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IoConfig {
    pub user_column: String,
    pub item_column: String,
    pub rating_column: String,
    /// Header of the estimate column in the output file
    pub estimate_column: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            user_column: "userID".to_string(),
            item_column: "gameID".to_string(),
            rating_column: "rating".to_string(),
            estimate_column: "rating".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback level when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl RaterConfig {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an optional extra config file layered over the default one
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_PATH).required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EstimatorError::Configuration {
                message: format!("Failed to read configuration: {}", e),
                key: None,
            })?;

        let config: Self =
            settings
                .try_deserialize()
                .map_err(|e| EstimatorError::Configuration {
                    message: format!("Invalid configuration: {}", e),
                    key: None,
                })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.als.validate()?;
        self.neighbors.validate()?;

        if self.embedding.dimensions == 0 {
            return Err(EstimatorError::config(
                "dimensions must be greater than 0",
                "embedding.dimensions",
            ));
        }

        if self.embedding.dimensions > self.als.latent_factors {
            return Err(EstimatorError::config(
                format!(
                    "embedding dimensions ({}) cannot exceed latent_factors ({})",
                    self.embedding.dimensions, self.als.latent_factors
                ),
                "embedding.dimensions",
            ));
        }

        self.scale.validate()?;

        for (key, column) in [
            ("io.user_column", &self.io.user_column),
            ("io.item_column", &self.io.item_column),
            ("io.rating_column", &self.io.rating_column),
            ("io.estimate_column", &self.io.estimate_column),
        ] {
            if column.trim().is_empty() {
                return Err(EstimatorError::config("column name must not be empty", key));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(EstimatorError::config(
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_log_levels.join(", ")
                ),
                "logging.level",
            ));
        }

        Ok(())
    }
}
