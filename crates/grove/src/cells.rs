// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Per-cell rendering for presentation layers.
//!
//! Nothing in the projection, mutation or query code consults these.

use arrow::array::{Array, AsArray};
use arrow::datatypes::{Float64Type, Int32Type, Int64Type};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;

use crate::error::Result;

/// Renders cells of the columns it recognises.
pub trait CellFormatter: Send + Sync {
    /// `None` passes the cell on to the next formatter.
    fn format_cell(&self, field: &Field, column: &dyn Array, row: usize) -> Option<String>;
}

/// Formatters asked in order, then Arrow's display formatting.
pub struct FormatterChain {
    formatters: Vec<Box<dyn CellFormatter>>,
    options: FormatOptions<'static>,
}

impl Default for FormatterChain {
    fn default() -> Self {
        Self {
            formatters: Vec::new(),
            options: FormatOptions::default().with_null("NULL"),
        }
    }
}

impl FormatterChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, formatter: Box<dyn CellFormatter>) -> Self {
        self.formatters.push(formatter);
        self
    }

    pub fn format_cell(&self, field: &Field, column: &dyn Array, row: usize) -> Result<String> {
        if let Some(text) = self
            .formatters
            .iter()
            .find_map(|f| f.format_cell(field, column, row))
        {
            return Ok(text);
        }
        let formatter =
            ArrayFormatter::try_new(column, &self.options).map_err(hstore::Error::from)?;
        Ok(formatter.value(row).to_string())
    }

    pub fn format_row(&self, batch: &RecordBatch, row: usize) -> Result<Vec<String>> {
        let schema = batch.schema();
        schema
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, column)| self.format_cell(field, column.as_ref(), row))
            .collect()
    }
}

/// Shows epoch-second columns as RFC 3339 timestamps.
#[derive(Debug, Clone, Default)]
pub struct TimestampFormatter {
    columns: BTreeSet<String>,
}

impl TimestampFormatter {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

fn from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

impl CellFormatter for TimestampFormatter {
    fn format_cell(&self, field: &Field, column: &dyn Array, row: usize) -> Option<String> {
        if !self.columns.contains(field.name()) || column.is_null(row) {
            return None;
        }
        let instant = match column.data_type() {
            DataType::Int64 => {
                DateTime::from_timestamp(column.as_primitive::<Int64Type>().value(row), 0)
            }
            DataType::Int32 => DateTime::from_timestamp(
                i64::from(column.as_primitive::<Int32Type>().value(row)),
                0,
            ),
            DataType::Float64 => from_seconds(column.as_primitive::<Float64Type>().value(row)),
            _ => None,
        }?;
        Some(instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}
