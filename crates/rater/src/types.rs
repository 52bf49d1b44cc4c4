//! Core record types shared by every pipeline stage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque user or item identifier
///
/// Integer identifiers order numerically and sort before text identifiers,
/// which order lexicographically. This ordering fixes the row and column
/// layout of every rating matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "{}", id),
            EntityId::Text(id) => write!(f, "{}", id),
        }
    }
}

impl EntityId {
    /// Integer form when `raw` is a canonically written `i64`, text form otherwise
    ///
    /// "007" and "+7" stay text so they never collide with "7".
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(id) if id.to_string() == trimmed => EntityId::Int(id),
            _ => EntityId::Text(trimmed.to_string()),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EntityId::parse(s))
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Int(id)
    }
}

impl From<i32> for EntityId {
    fn from(id: i32) -> Self {
        EntityId::Int(i64::from(id))
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Text(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Text(id)
    }
}

/// A single historical rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub user_id: EntityId,
    pub item_id: EntityId,
    pub rating: f64,
}

impl RatingRecord {
    pub fn new(user_id: impl Into<EntityId>, item_id: impl Into<EntityId>, rating: f64) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            rating,
        }
    }
}

/// A (user, item) pair awaiting an estimate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub user_id: EntityId,
    pub item_id: EntityId,
}

impl Query {
    pub fn new(user_id: impl Into<EntityId>, item_id: impl Into<EntityId>) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
        }
    }
}

/// Neighbor-averaged rating for one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingEstimate {
    pub user_id: EntityId,
    pub item_id: EntityId,
    /// NaN when no neighbor had an observed rating for the item
    pub value: f64,
    /// Number of observed neighbor ratings averaged into `value`
    pub neighbors_used: usize,
}

impl RatingEstimate {
    /// True when the neighbor walk found no observed rating
    pub fn is_undefined(&self) -> bool {
        self.neighbors_used == 0
    }
}

/// Output row handed to the estimate writer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateRow {
    pub user_id: EntityId,
    pub item_id: EntityId,
    pub estimate: f64,
}
