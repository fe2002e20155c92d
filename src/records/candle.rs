use chrono::NaiveDateTime;

use crate::error::{FetchError, Result};

use super::{Cell, ColumnDef, ColumnSpec, ColumnType, Record};

const CANDLE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::required("open", &["open"], ColumnType::Float),
    ColumnDef::required("high", &["high"], ColumnType::Float),
    ColumnDef::required("low", &["low"], ColumnType::Float),
    ColumnDef::required("close", &["close"], ColumnType::Float),
    ColumnDef::required("volume", &["volume"], ColumnType::Float),
    ColumnDef::required("begin", &["begin"], ColumnType::Timestamp),
    ColumnDef::required("end", &["end"], ColumnType::Timestamp),
];

/// One OHLCV bucket; `begin` identifies it.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRow {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Record for CandleRow {
    type Key = NaiveDateTime;

    const SPEC: ColumnSpec = ColumnSpec {
        columns: CANDLE_COLUMNS,
        key: "begin",
    };

    const ORDERED: bool = true;

    fn from_cells(cells: Vec<Cell>, row: usize) -> Result<Self> {
        let [open, high, low, close, volume, begin, end]: [Cell; 7] = cells
            .try_into()
            .map_err(|_| FetchError::format("candle row does not match its column layout"))?;

        let candle = CandleRow {
            open: open.into_float("open", row)?,
            high: high.into_float("high", row)?,
            low: low.into_float("low", row)?,
            close: close.into_float("close", row)?,
            volume: volume.into_float("volume", row)?,
            begin: begin.into_timestamp("begin", row)?,
            end: end.into_timestamp("end", row)?,
        };

        if candle.begin >= candle.end {
            return Err(FetchError::coercion(
                "end",
                row,
                format!(
                    "candle ends at {} but begins at {}",
                    candle.end, candle.begin
                ),
            ));
        }

        Ok(candle)
    }

    fn key(&self) -> NaiveDateTime {
        self.begin
    }

    fn to_cells(&self) -> Vec<Cell> {
        vec![
            Cell::Float(self.open),
            Cell::Float(self.high),
            Cell::Float(self.low),
            Cell::Float(self.close),
            Cell::Float(self.volume),
            Cell::Timestamp(self.begin),
            Cell::Timestamp(self.end),
        ]
    }
}
