//! Tabular input and output collaborators
//!
//! The pipeline only depends on the three traits below. The CSV
//! implementations map configurable column names onto record fields.

use crate::config::IoConfig;
use crate::error::{EstimatorError, Result};
use crate::types::{EntityId, EstimateRow, Query, RatingRecord};
use csv::StringRecord;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Supplies historical ratings
pub trait RatingSource {
    fn read_ratings(&mut self) -> Result<Vec<RatingRecord>>;
}

/// Supplies queries awaiting estimates
pub trait QuerySource {
    fn read_queries(&mut self) -> Result<Vec<Query>>;
}

/// Receives estimates in query order
pub trait EstimateSink {
    fn write_estimates(&mut self, rows: &[EstimateRow]) -> Result<()>;
}

/// CSV-backed rating and query source
pub struct CsvSource<R: Read> {
    reader: csv::Reader<R>,
    columns: IoConfig,
}

impl CsvSource<File> {
    pub fn from_path(path: impl AsRef<Path>, columns: IoConfig) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_reader(file, columns))
    }
}

impl<R: Read> CsvSource<R> {
    pub fn from_reader(reader: R, columns: IoConfig) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        Self { reader, columns }
    }

    fn column(&mut self, name: &str) -> Result<usize> {
        let headers = self.reader.headers()?;
        headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| EstimatorError::MalformedRecord {
                line: 1,
                message: format!("missing column '{}'", name),
            })
    }
}

fn field<'r>(record: &'r StringRecord, index: usize, name: &str) -> Result<&'r str> {
    let line = record.position().map_or(0, |p| p.line());
    match record.get(index) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(EstimatorError::MalformedRecord {
            line,
            message: format!("empty '{}' field", name),
        }),
    }
}

fn entity(record: &StringRecord, index: usize, name: &str) -> Result<EntityId> {
    Ok(EntityId::parse(field(record, index, name)?))
}

impl<R: Read> RatingSource for CsvSource<R> {
    fn read_ratings(&mut self) -> Result<Vec<RatingRecord>> {
        let user_name = self.columns.user_column.clone();
        let item_name = self.columns.item_column.clone();
        let rating_name = self.columns.rating_column.clone();

        let user_col = self.column(&user_name)?;
        let item_col = self.column(&item_name)?;
        let rating_col = self.column(&rating_name)?;

        let mut records = Vec::new();
        for row in self.reader.records() {
            let row = row?;
            let raw_rating = field(&row, rating_col, &rating_name)?;
            let rating = raw_rating
                .parse::<f64>()
                .map_err(|e| EstimatorError::MalformedRecord {
                    line: row.position().map_or(0, |p| p.line()),
                    message: format!("rating '{}' is not a number: {}", raw_rating, e),
                })?;

            records.push(RatingRecord {
                user_id: entity(&row, user_col, &user_name)?,
                item_id: entity(&row, item_col, &item_name)?,
                rating,
            });
        }

        tracing::debug!(count = records.len(), "Read rating records");
        Ok(records)
    }
}

impl<R: Read> QuerySource for CsvSource<R> {
    fn read_queries(&mut self) -> Result<Vec<Query>> {
        let user_name = self.columns.user_column.clone();
        let item_name = self.columns.item_column.clone();

        let user_col = self.column(&user_name)?;
        let item_col = self.column(&item_name)?;

        let mut queries = Vec::new();
        for row in self.reader.records() {
            let row = row?;
            queries.push(Query {
                user_id: entity(&row, user_col, &user_name)?,
                item_id: entity(&row, item_col, &item_name)?,
            });
        }

        tracing::debug!(count = queries.len(), "Read queries");
        Ok(queries)
    }
}

/// CSV estimate writer; undefined estimates are written as empty fields
pub struct CsvEstimateWriter<W: Write> {
    writer: csv::Writer<W>,
    columns: IoConfig,
}

impl CsvEstimateWriter<File> {
    pub fn create(path: impl AsRef<Path>, columns: IoConfig) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::from_writer(file, columns))
    }
}

impl<W: Write> CsvEstimateWriter<W> {
    pub fn from_writer(writer: W, columns: IoConfig) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            columns,
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| EstimatorError::Io(e.into_error()))
    }
}

impl<W: Write> EstimateSink for CsvEstimateWriter<W> {
    fn write_estimates(&mut self, rows: &[EstimateRow]) -> Result<()> {
        self.writer.write_record([
            self.columns.user_column.as_str(),
            self.columns.item_column.as_str(),
            self.columns.estimate_column.as_str(),
        ])?;

        for row in rows {
            let estimate = if row.estimate.is_nan() {
                String::new()
            } else {
                row.estimate.to_string()
            };
            self.writer.write_record([
                row.user_id.to_string(),
                row.item_id.to_string(),
                estimate,
            ])?;
        }

        self.writer.flush()?;
        Ok(())
    }
}
