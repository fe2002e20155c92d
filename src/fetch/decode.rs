use serde_json::Value;

use crate::config::ResponseFormat;
use crate::error::FetchError;

use super::{FetchResult, RawRow};

const CSV_DELIMITER: u8 = b';';

/// Decode one named ISS section from a response body into column-keyed rows.
pub fn decode_section(body: &str, section: &str, format: ResponseFormat) -> FetchResult<Vec<RawRow>> {
    match format {
        ResponseFormat::Json => decode_json_section(body, section),
        ResponseFormat::Csv => decode_csv_section(body, section),
    }
}

fn decode_json_section(body: &str, section: &str) -> FetchResult<Vec<RawRow>> {
    let root: Value = serde_json::from_str(body)
        .map_err(|err| FetchError::format(format!("response is not valid JSON: {err}")))?;

    let block = root
        .get(section)
        .ok_or_else(|| FetchError::format(format!("response has no `{section}` section")))?;

    let columns = block
        .get("columns")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::format(format!("`{section}.columns` missing or not an array")))?
        .iter()
        .map(|column| {
            column.as_str().map(str::to_string).ok_or_else(|| {
                FetchError::format(format!("`{section}.columns` holds a non-string name"))
            })
        })
        .collect::<FetchResult<Vec<_>>>()?;
    check_header(&columns, section)?;

    let data = block
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::format(format!("`{section}.data` missing or not an array")))?;

    let mut rows = Vec::with_capacity(data.len());
    for (index, entry) in data.iter().enumerate() {
        let values = entry.as_array().ok_or_else(|| FetchError::Format {
            page: None,
            column: None,
            row: Some(index),
            message: format!("`{section}.data` entry is not an array"),
        })?;

        if values.len() != columns.len() {
            return Err(FetchError::Format {
                page: None,
                column: None,
                row: Some(index),
                message: format!(
                    "expected {} values to match the column header, found {}",
                    columns.len(),
                    values.len()
                ),
            });
        }

        rows.push(
            columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect::<RawRow>(),
        );
    }

    Ok(rows)
}

/// ISS CSV lays out each section as its name, a header line and data lines up to a blank line.
fn decode_csv_section(body: &str, section: &str) -> FetchResult<Vec<RawRow>> {
    let mut lines = body.lines();
    lines
        .by_ref()
        .find(|line| line.trim().eq_ignore_ascii_case(section))
        .ok_or_else(|| FetchError::format(format!("response has no `{section}` section")))?;

    let block = lines
        .skip_while(|line| line.trim().is_empty())
        .take_while(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if block.is_empty() {
        return Err(FetchError::format(format!(
            "`{section}` section has no column header"
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(CSV_DELIMITER)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(block.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| FetchError::format(format!("unreadable `{section}` CSV header: {err}")))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    check_header(&headers, section)?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| FetchError::Format {
            page: None,
            column: None,
            row: Some(index),
            message: format!("unreadable CSV record: {err}"),
        })?;

        rows.push(
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(csv_field_value))
                .collect::<RawRow>(),
        );
    }

    Ok(rows)
}

/// Column names must be non-blank and distinct, otherwise rows would silently lose values.
fn check_header(columns: &[String], section: &str) -> FetchResult<()> {
    let mut seen = std::collections::HashSet::new();
    for column in columns {
        if column.trim().is_empty() {
            return Err(FetchError::format(format!(
                "`{section}` header holds a blank column name"
            )));
        }
        if !seen.insert(normalize_key(column)) {
            return Err(FetchError::Format {
                page: None,
                column: Some(column.clone()),
                row: None,
                message: format!("`{section}` header repeats a column"),
            });
        }
    }
    Ok(())
}

fn csv_field_value(field: &str) -> Value {
    let trimmed = field.trim_matches('"');
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::String(trimmed.to_string())
    }
}

/// Look a column up by any of its aliases, ignoring case and punctuation.
pub fn find_value<'a>(row: &'a RawRow, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        let alias_norm = normalize_key(alias);
        if let Some((_, value)) = row.iter().find(|(key, _)| normalize_key(key) == alias_norm) {
            return Some(value);
        }
    }

    None
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
