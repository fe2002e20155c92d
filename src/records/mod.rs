use std::fs::File;
use std::hash::Hash;
use std::io;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::error::{Context, FetchError, Result};

pub mod candle;
pub mod normalize;
pub mod security;

pub use candle::CandleRow;
pub use normalize::{coerce_row, normalize};
pub use security::SecurityRow;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Float,
    Integer,
    Text,
    Timestamp,
}

/// One output column: its fixed name, the raw names it may arrive under, and its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub const fn required(
        name: &'static str,
        aliases: &'static [&'static str],
        kind: ColumnType,
    ) -> Self {
        Self {
            name,
            aliases,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(
        name: &'static str,
        aliases: &'static [&'static str],
        kind: ColumnType,
    ) -> Self {
        Self {
            name,
            aliases,
            kind,
            nullable: true,
        }
    }
}

/// Fixed schema of a row kind; output order follows `columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub columns: &'static [ColumnDef],
    /// Column whose value identifies a row for deduplication.
    pub key: &'static str,
}

impl ColumnSpec {
    pub fn names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|column| column.name).collect()
    }
}

/// A coerced value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Float(f64),
    Integer(i64),
    Text(String),
    Timestamp(NaiveDateTime),
    Null,
}

impl Cell {
    pub fn into_float(self, column: &str, row: usize) -> Result<f64> {
        match self {
            Cell::Float(value) => Ok(value),
            Cell::Integer(value) => Ok(value as f64),
            other => Err(mismatch(column, row, "a number", &other)),
        }
    }

    pub fn into_timestamp(self, column: &str, row: usize) -> Result<NaiveDateTime> {
        match self {
            Cell::Timestamp(value) => Ok(value),
            other => Err(mismatch(column, row, "a timestamp", &other)),
        }
    }

    pub fn into_text(self, column: &str, row: usize) -> Result<String> {
        match self {
            Cell::Text(value) => Ok(value),
            other => Err(mismatch(column, row, "text", &other)),
        }
    }

    pub fn into_optional_integer(self, column: &str, row: usize) -> Result<Option<i64>> {
        match self {
            Cell::Integer(value) => Ok(Some(value)),
            Cell::Null => Ok(None),
            other => Err(mismatch(column, row, "an integer", &other)),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Cell::Float(value) => value.to_string(),
            Cell::Integer(value) => value.to_string(),
            Cell::Text(value) => value.clone(),
            Cell::Timestamp(value) => value.format(TIMESTAMP_FORMAT).to_string(),
            Cell::Null => String::new(),
        }
    }
}

fn mismatch(column: &str, row: usize, expected: &str, found: &Cell) -> FetchError {
    FetchError::coercion(column, row, format!("expected {expected}, found {found:?}"))
}

/// A strongly typed row built from cells coerced against `SPEC`.
pub trait Record: Sized {
    type Key: Eq + Hash + Ord + Clone;

    const SPEC: ColumnSpec;

    /// Whether tables of this kind are kept ascending by key.
    const ORDERED: bool;

    /// `cells` holds one value per `SPEC` column, in `SPEC` order.
    fn from_cells(cells: Vec<Cell>, row: usize) -> Result<Self>;

    fn key(&self) -> Self::Key;

    fn to_cells(&self) -> Vec<Cell>;
}

/// Rows of one kind under their fixed column schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<R> {
    rows: Vec<R>,
}

impl<R: Record> Table<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn columns(&self) -> Vec<&'static str> {
        R::SPEC.names()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&R) -> bool,
    {
        self.rows.retain(keep);
    }

    /// Keep only the last `count` rows.
    pub fn retain_last(&mut self, count: usize) {
        let excess = self.rows.len().saturating_sub(count);
        self.rows.drain(..excess);
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(self.columns())?;

        for row in &self.rows {
            writer.write_record(row.to_cells().iter().map(Cell::render))?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn save_to_csv<P: AsRef<Path>>(&self, file_path: P) -> Result<()> {
        let path = file_path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
        self.write_csv(file)
    }
}
