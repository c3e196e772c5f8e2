// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Row predicates: SQL boolean expressions compiled once against a table
//! schema and evaluated chunk by chunk.

use arrow::array::{Array, AsArray, BooleanArray};
use arrow_array::RecordBatch;
use arrow_schema::{Field, Schema, SchemaRef};
use datafusion::common::DFSchema;
use datafusion::error::DataFusionError;
use datafusion::physical_expr::PhysicalExpr;
use datafusion::prelude::{SessionConfig, SessionContext};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{GroveError, Result};

/// A compiled condition.
///
/// Bound variables are aliases for source columns; they are evaluated as
/// extra columns appended to each chunk.
pub struct Predicate {
    condition: String,
    expr: Arc<dyn PhysicalExpr>,
    schema: SchemaRef,
    /// Source column index behind each alias, in schema order.
    aliases: Vec<usize>,
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate")
            .field("condition", &self.condition)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

fn classify(condition: &str, err: &DataFusionError) -> GroveError {
    let message = err.to_string();
    match err.find_root() {
        DataFusionError::SQL(..) => GroveError::PredicateSyntax {
            condition: condition.to_string(),
            message,
        },
        _ => GroveError::PredicateType {
            condition: condition.to_string(),
            message,
        },
    }
}

impl Predicate {
    pub fn compile(
        condition: &str,
        source: &SchemaRef,
        variables: &BTreeMap<String, String>,
    ) -> Result<Self> {
        if condition.trim().is_empty() {
            return Err(GroveError::PredicateSyntax {
                condition: condition.to_string(),
                message: "empty condition".into(),
            });
        }

        let mut fields: Vec<Field> = source.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut aliases = Vec::with_capacity(variables.len());
        for (alias, column) in variables {
            if source.index_of(alias).is_ok() {
                return Err(GroveError::InvalidQuery(format!(
                    "variable {alias} shadows a column of the table"
                )));
            }
            let idx = source.index_of(column).map_err(|_| GroveError::PredicateType {
                condition: condition.to_string(),
                message: format!("variable {alias} refers to unknown column {column}"),
            })?;
            let target = source.field(idx);
            fields.push(Field::new(
                alias,
                target.data_type().clone(),
                target.is_nullable(),
            ));
            aliases.push(idx);
        }
        let schema = Arc::new(Schema::new(fields));
        let df_schema = DFSchema::try_from(schema.as_ref().clone())
            .map_err(|e| classify(condition, &e))?;

        let mut config = SessionConfig::new();
        config.options_mut().sql_parser.enable_ident_normalization = false;
        let ctx = SessionContext::new_with_config(config);

        let logical = ctx
            .parse_sql_expr(condition, &df_schema)
            .map_err(|e| classify(condition, &e))?;
        let expr = ctx
            .create_physical_expr(logical, &df_schema)
            .map_err(|e| classify(condition, &e))?;
        let data_type = expr
            .data_type(&schema)
            .map_err(|e| classify(condition, &e))?;
        if data_type != arrow_schema::DataType::Boolean {
            return Err(GroveError::PredicateType {
                condition: condition.to_string(),
                message: format!("condition yields {data_type}, not a boolean"),
            });
        }

        Ok(Self {
            condition: condition.to_string(),
            expr,
            schema,
            aliases,
        })
    }

    #[must_use]
    pub fn condition(&self) -> &str {
        &self.condition
    }

    /// Evaluate against one chunk whose first row is row `first` of the
    /// table. Null results count as false.
    pub fn evaluate(&self, chunk: &RecordBatch, first: usize) -> Result<BooleanArray> {
        let rows = chunk.num_rows();
        let failed = |message: String| GroveError::PredicateEvaluation {
            condition: self.condition.clone(),
            start: first,
            stop: first + rows,
            message,
        };

        let mut columns = chunk.columns().to_vec();
        columns.extend(self.aliases.iter().map(|idx| chunk.column(*idx).clone()));
        let input = RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| failed(e.to_string()))?;

        let value = self
            .expr
            .evaluate(&input)
            .and_then(|v| v.into_array(rows))
            .map_err(|e| failed(e.to_string()))?;
        let mask = value
            .as_boolean_opt()
            .ok_or_else(|| failed(format!("expected booleans, got {}", value.data_type())))?;
        Ok(if mask.null_count() == 0 {
            mask.clone()
        } else {
            mask.iter().map(|v| Some(v.unwrap_or(false))).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Float64Array, Int64Array, StringArray};
    use arrow_schema::DataType;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("Temp", DataType::Float64, true),
            Field::new("site", DataType::Utf8, false),
        ]))
    }

    fn batch() -> RecordBatch {
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(vec![0, 1, 2, 3])),
                Arc::new(Float64Array::from(vec![Some(10.0), None, Some(30.0), Some(5.0)])),
                Arc::new(StringArray::from(vec!["a", "b", "a", "c"])),
            ],
        )
        .expect("batch")
    }

    fn no_vars() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn selected(mask: &BooleanArray) -> Vec<bool> {
        mask.iter().map(|v| v.unwrap_or(false)).collect()
    }

    #[test]
    fn test_mixed_case_column_and_nulls() {
        let p = Predicate::compile("Temp > 8 AND site = 'a'", &schema(), &no_vars())
            .expect("compile");
        let mask = p.evaluate(&batch(), 0).expect("eval");
        assert_eq!(selected(&mask), vec![true, false, true, false]);
        assert_eq!(mask.null_count(), 0);
    }

    #[test]
    fn test_bound_variable() {
        let vars = BTreeMap::from([("t".to_string(), "Temp".to_string())]);
        let p = Predicate::compile("t < 20", &schema(), &vars).expect("compile");
        let mask = p.evaluate(&batch(), 0).expect("eval");
        assert_eq!(selected(&mask), vec![true, false, false, true]);
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            Predicate::compile("id >", &schema(), &no_vars()),
            Err(GroveError::PredicateSyntax { .. })
        ));
        assert!(matches!(
            Predicate::compile("   ", &schema(), &no_vars()),
            Err(GroveError::PredicateSyntax { .. })
        ));
    }

    #[test]
    fn test_unknown_column_and_non_boolean() {
        assert!(matches!(
            Predicate::compile("missing > 1", &schema(), &no_vars()),
            Err(GroveError::PredicateType { .. })
        ));
        assert!(matches!(
            Predicate::compile("id + 1", &schema(), &no_vars()),
            Err(GroveError::PredicateType { .. })
        ));
    }

    #[test]
    fn test_variable_errors() {
        let shadow = BTreeMap::from([("id".to_string(), "Temp".to_string())]);
        assert!(matches!(
            Predicate::compile("id > 1", &schema(), &shadow),
            Err(GroveError::InvalidQuery(_))
        ));
        let dangling = BTreeMap::from([("x".to_string(), "nope".to_string())]);
        assert!(matches!(
            Predicate::compile("x > 1", &schema(), &dangling),
            Err(GroveError::PredicateType { .. })
        ));
    }
}
