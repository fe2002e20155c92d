use std::collections::HashSet;

use log::debug;
use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::fetch::decode::{find_value, value_to_string};
use crate::fetch::{RawPage, RawRow};
use crate::utils::parse_timestamp;

use super::{Cell, ColumnDef, ColumnSpec, ColumnType, Record, Table};

/// Merge ordered pages into one typed table.
///
/// Rows are concatenated in page order and the first row seen for a key wins.
/// Any value that fails coercion rejects the whole table, naming the page,
/// column and row it came from.
pub fn normalize<R: Record>(pages: &[RawPage]) -> Result<Table<R>> {
    let spec = R::SPEC;
    let mut seen = HashSet::new();
    let mut rows: Vec<R> = Vec::new();
    let mut duplicates = 0;

    for (page_index, page) in pages.iter().enumerate() {
        for (row_index, raw) in page.rows.iter().enumerate() {
            let record = coerce_row(raw, &spec, row_index)
                .and_then(|cells| R::from_cells(cells, row_index))
                .map_err(|err| err.on_page(page_index))?;

            if seen.insert(record.key()) {
                rows.push(record);
            } else {
                duplicates += 1;
            }
        }
    }

    if duplicates > 0 {
        debug!(
            "Dropped {} rows repeating an earlier `{}`",
            duplicates, spec.key
        );
    }

    if R::ORDERED && !rows.windows(2).all(|pair| pair[0].key() < pair[1].key()) {
        rows.sort_by_key(|row| row.key());
    }

    Ok(Table::new(rows))
}

/// Coerce one raw row into cells laid out in `spec` order.
pub fn coerce_row(raw: &RawRow, spec: &ColumnSpec, row: usize) -> Result<Vec<Cell>> {
    spec.columns
        .iter()
        .map(|column| coerce_value(find_value(raw, column.aliases), column, row))
        .collect()
}

fn coerce_value(value: Option<&Value>, column: &ColumnDef, row: usize) -> Result<Cell> {
    let value = match value {
        None | Some(Value::Null) => return missing(column, row),
        Some(Value::String(text)) if text.trim().is_empty() => return missing(column, row),
        Some(value) => value,
    };

    let fail = |expected: &str| {
        FetchError::coercion(
            column.name,
            row,
            format!("expected {expected}, found `{}`", value_to_string(value)),
        )
    };

    match column.kind {
        ColumnType::Float => match value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|number| number.is_finite())
        .map(Cell::Float)
        .ok_or_else(|| fail("a finite number")),
        ColumnType::Integer => match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().and_then(whole_number))
                .map(Cell::Integer)
                .ok_or_else(|| fail("an integer")),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().and_then(whole_number))
                    .map(Cell::Integer)
                    .ok_or_else(|| fail("an integer"))
            }
            _ => Err(fail("an integer")),
        },
        ColumnType::Text => match value {
            Value::String(text) => Ok(Cell::Text(text.trim().to_string())),
            Value::Number(_) | Value::Bool(_) => Ok(Cell::Text(value_to_string(value))),
            _ => Err(fail("text")),
        },
        ColumnType::Timestamp => match value {
            Value::String(text) => parse_timestamp(text)
                .map(Cell::Timestamp)
                .ok_or_else(|| fail("a timestamp")),
            _ => Err(fail("a timestamp")),
        },
    }
}

fn missing(column: &ColumnDef, row: usize) -> Result<Cell> {
    if column.nullable {
        Ok(Cell::Null)
    } else {
        Err(FetchError::coercion(column.name, row, "value is missing"))
    }
}

fn whole_number(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
}
