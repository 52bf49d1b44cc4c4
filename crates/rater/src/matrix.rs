//! Dense user×item rating matrices
//!
//! `MatrixBuilder` turns rating records into a `RatingMatrix` whose row and
//! column layout is fixed once (sorted by `EntityId`) and shared by every
//! downstream stage. Missing cells hold NaN and a 0 in the observed mask.

use crate::error::{EstimatorError, Result};
use crate::types::{EntityId, RatingRecord};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// What to do when the same (user, item) pair is rated twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the rating that appears last in the input
    #[default]
    LastWriteWins,
    /// Fail with `DuplicateRating`
    Reject,
}

/// Valid rating range; completed values are clamped into it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    pub min: f64,
    pub max: f64,
}

impl Default for RatingScale {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 10.0,
        }
    }
}

impl RatingScale {
    /// Bounds must be finite with min < max
    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(EstimatorError::config(
                format!(
                    "rating scale must satisfy min < max, got [{}, {}]",
                    self.min, self.max
                ),
                "scale",
            ));
        }
        Ok(())
    }

    /// Caller must have checked `validate`
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Ratings laid out as a dense matrix with an observed mask
#[derive(Debug, Clone)]
pub struct RatingMatrix {
    users: Vec<EntityId>,
    items: Vec<EntityId>,
    user_index: HashMap<EntityId, usize>,
    item_index: HashMap<EntityId, usize>,
    values: Array2<f64>,
    mask: Array2<f64>,
}

impl RatingMatrix {
    /// Build directly from a dense grid where NaN marks a missing rating
    ///
    /// Rows and columns keep the order given here.
    pub fn from_dense(
        users: Vec<EntityId>,
        items: Vec<EntityId>,
        values: Array2<f64>,
    ) -> Result<Self> {
        if values.dim() != (users.len(), items.len()) {
            return Err(EstimatorError::NumericalFailure(format!(
                "grid shape {:?} does not match {} users x {} items",
                values.dim(),
                users.len(),
                items.len()
            )));
        }

        let user_index = index_of(&users, "user")?;
        let item_index = index_of(&items, "item")?;
        let mask = values.mapv(|v| if v.is_nan() { 0.0 } else { 1.0 });

        Ok(Self {
            users,
            items,
            user_index,
            item_index,
            values,
            mask,
        })
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn users(&self) -> &[EntityId] {
        &self.users
    }

    pub fn items(&self) -> &[EntityId] {
        &self.items
    }

    pub fn row_of(&self, user: &EntityId) -> Option<usize> {
        self.user_index.get(user).copied()
    }

    pub fn col_of(&self, item: &EntityId) -> Option<usize> {
        self.item_index.get(item).copied()
    }

    pub fn user_at(&self, row: usize) -> &EntityId {
        &self.users[row]
    }

    pub fn item_at(&self, col: usize) -> &EntityId {
        &self.items[col]
    }

    /// Observed rating, or NaN
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[[row, col]]
    }

    pub fn is_observed(&self, row: usize, col: usize) -> bool {
        self.mask[[row, col]] > 0.0
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Observed mask: 1.0 where a rating exists, 0.0 elsewhere
    pub fn mask(&self) -> &Array2<f64> {
        &self.mask
    }

    pub fn observed_count(&self) -> usize {
        self.mask.iter().filter(|&&w| w > 0.0).count()
    }

    /// Copy of the ratings with missing cells set to 0 for numerical use
    pub fn zero_filled(&self) -> Array2<f64> {
        self.values.mapv(|v| if v.is_nan() { 0.0 } else { v })
    }
}

fn index_of(ids: &[EntityId], kind: &str) -> Result<HashMap<EntityId, usize>> {
    let mut index = HashMap::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        if index.insert(id.clone(), position).is_some() {
            return Err(EstimatorError::NumericalFailure(format!(
                "{} {} appears twice in the matrix layout",
                kind, id
            )));
        }
    }
    Ok(index)
}

/// Builds `RatingMatrix` values from rating records
#[derive(Debug, Clone, Default)]
pub struct MatrixBuilder {
    duplicate_policy: DuplicatePolicy,
    extra_users: BTreeSet<EntityId>,
    extra_items: BTreeSet<EntityId>,
}

impl MatrixBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Guarantee rows for these users even if they have no ratings
    pub fn register_users(mut self, users: impl IntoIterator<Item = EntityId>) -> Self {
        self.extra_users.extend(users);
        self
    }

    /// Guarantee columns for these items even if nobody rated them
    pub fn register_items(mut self, items: impl IntoIterator<Item = EntityId>) -> Self {
        self.extra_items.extend(items);
        self
    }

    /// Lay out `records` as a dense matrix
    ///
    /// Rows are the distinct users passing `user_filter` (all users when
    /// `None`); columns are the distinct items across *all* of `records`, so
    /// filtering users never drops an item column.
    pub fn build(
        &self,
        records: &[RatingRecord],
        user_filter: Option<&HashSet<EntityId>>,
    ) -> Result<RatingMatrix> {
        let keep = |user: &EntityId| user_filter.map_or(true, |filter| filter.contains(user));

        let mut users = self.extra_users.clone();
        let mut items = self.extra_items.clone();
        for record in records {
            items.insert(record.item_id.clone());
            if keep(&record.user_id) {
                users.insert(record.user_id.clone());
            }
        }

        if users.is_empty() {
            return Err(EstimatorError::EmptyInput(
                "no users left after training filter".to_string(),
            ));
        }
        if items.is_empty() {
            return Err(EstimatorError::EmptyInput("no items in ratings".to_string()));
        }

        let users: Vec<EntityId> = users.into_iter().collect();
        let items: Vec<EntityId> = items.into_iter().collect();
        let user_index = index_of(&users, "user")?;
        let item_index = index_of(&items, "item")?;

        let mut values = Array2::from_elem((users.len(), items.len()), f64::NAN);
        let mut mask = Array2::<f64>::zeros((users.len(), items.len()));
        let mut duplicates = 0usize;

        for record in records.iter().filter(|r| keep(&r.user_id)) {
            if !record.rating.is_finite() {
                return Err(EstimatorError::InvalidRating {
                    user: record.user_id.clone(),
                    item: record.item_id.clone(),
                    rating: record.rating,
                });
            }

            let row = user_index[&record.user_id];
            let col = item_index[&record.item_id];

            if mask[[row, col]] > 0.0 {
                match self.duplicate_policy {
                    DuplicatePolicy::Reject => {
                        return Err(EstimatorError::DuplicateRating {
                            user: record.user_id.clone(),
                            item: record.item_id.clone(),
                        });
                    }
                    DuplicatePolicy::LastWriteWins => {
                        tracing::warn!(
                            user = %record.user_id,
                            item = %record.item_id,
                            previous = values[[row, col]],
                            replacement = record.rating,
                            "Duplicate rating, keeping the later value"
                        );
                        duplicates += 1;
                    }
                }
            }

            values[[row, col]] = record.rating;
            mask[[row, col]] = 1.0;
        }

        let matrix = RatingMatrix {
            users,
            items,
            user_index,
            item_index,
            values,
            mask,
        };

        tracing::info!(
            users = matrix.num_users(),
            items = matrix.num_items(),
            observed = matrix.observed_count(),
            duplicates,
            "Built rating matrix"
        );

        Ok(matrix)
    }
}

/// Completed ratings: every cell defined and within the rating scale
#[derive(Debug, Clone)]
pub struct CompletedMatrix {
    values: Array2<f64>,
    scale: RatingScale,
}

impl CompletedMatrix {
    /// Clamp a factor product into `scale`
    ///
    /// Fails if `scale` is invalid or any cell is NaN or infinite before
    /// clamping.
    pub fn from_product(product: Array2<f64>, scale: RatingScale) -> Result<Self> {
        scale.validate()?;
        if let Some(((row, col), value)) = product.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(EstimatorError::NumericalFailure(format!(
                "completed cell ({}, {}) is {}",
                row, col, value
            )));
        }

        let values = product.mapv(|v| scale.clamp(v));
        Ok(Self { values, scale })
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[[row, col]]
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn scale(&self) -> RatingScale {
        self.scale
    }
}
