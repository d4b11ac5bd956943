//! Tabular dataset parsing into named numeric columns.
//!
//! Parsing is permissive: a cell that does not hold a finite number is
//! dropped from its column and counted, it never fails the file.

use std::{collections::HashSet, str::FromStr};

use serde_json::Value as JsonValue;
use tracing::debug;
use zkdm_common::DataShape;

use crate::error::{CommitmentError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetFormat {
    /// Comma separated values with a header row.
    Csv,
    /// A JSON object mapping column names to arrays.
    Json,
}

impl DatasetFormat {
    /// Picks a format from the file name when it has a known extension,
    /// otherwise from the first non-whitespace byte.
    pub fn detect(file_name: Option<&str>, bytes: &[u8]) -> Self {
        if let Some(name) = file_name {
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".json") {
                return DatasetFormat::Json;
            }
            if lower.ends_with(".csv") {
                return DatasetFormat::Csv;
            }
        }
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => DatasetFormat::Json,
            _ => DatasetFormat::Csv,
        }
    }
}

impl FromStr for DatasetFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(DatasetFormat::Csv),
            "json" => Ok(DatasetFormat::Json),
            other => Err(format!("unknown dataset format '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedColumn {
    pub name: String,
    pub values: Vec<f64>,
    /// Cells skipped because they were empty or not numeric.
    pub dropped: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedDataset {
    columns: Vec<ParsedColumn>,
}

impl ParsedDataset {
    pub fn from_columns(columns: Vec<ParsedColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ParsedColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.values.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    /// Columns by the longest series length.
    pub fn shape(&self) -> DataShape {
        let rows = self
            .columns
            .iter()
            .map(|column| column.values.len())
            .max()
            .unwrap_or(0);
        DataShape::new(rows, self.columns.len())
    }

    /// True when every column kept the same number of values.
    pub fn is_rectangular(&self) -> bool {
        let rows = self.shape().rows;
        self.columns.iter().all(|column| column.values.len() == rows)
    }
}

pub fn parse_dataset(bytes: &[u8], format: DatasetFormat) -> Result<ParsedDataset> {
    let dataset = match format {
        DatasetFormat::Csv => parse_csv(bytes)?,
        DatasetFormat::Json => parse_json(bytes)?,
    };
    if dataset.columns.is_empty() {
        return Err(CommitmentError::Parse("dataset has no columns".into()));
    }
    for column in dataset.columns.iter().filter(|column| column.dropped > 0) {
        debug!(
            column = %column.name,
            dropped = column.dropped,
            kept = column.values.len(),
            "dropped non-numeric cells"
        );
    }
    Ok(dataset)
}

fn parse_cell(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_csv(bytes: &[u8]) -> Result<ParsedDataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(headers.len());
    for name in headers.iter() {
        if name.is_empty() {
            return Err(CommitmentError::Parse("empty column name in header".into()));
        }
        if !seen.insert(name.to_string()) {
            return Err(CommitmentError::Parse(format!("duplicate column '{name}'")));
        }
        columns.push(ParsedColumn {
            name: name.to_string(),
            values: Vec::new(),
            dropped: 0,
        });
    }

    for record in reader.records() {
        let record = record?;
        for (column, cell) in columns.iter_mut().zip(record.iter()) {
            match parse_cell(cell) {
                Some(value) => column.values.push(value),
                None => column.dropped += 1,
            }
        }
    }

    Ok(ParsedDataset { columns })
}

fn parse_json(bytes: &[u8]) -> Result<ParsedDataset> {
    let value: JsonValue =
        serde_json::from_slice(bytes).map_err(|err| CommitmentError::Parse(err.to_string()))?;
    let JsonValue::Object(object) = value else {
        return Err(CommitmentError::Parse(
            "expected a JSON object of column arrays".into(),
        ));
    };

    let mut columns = Vec::with_capacity(object.len());
    for (name, cells) in object {
        let JsonValue::Array(cells) = cells else {
            return Err(CommitmentError::Parse(format!(
                "column '{name}' is not an array"
            )));
        };
        let mut column = ParsedColumn {
            name,
            values: Vec::with_capacity(cells.len()),
            dropped: 0,
        };
        for cell in cells {
            let parsed = match &cell {
                JsonValue::Number(number) => number.as_f64().filter(|v| v.is_finite()),
                JsonValue::String(text) => parse_cell(text),
                _ => None,
            };
            match parsed {
                Some(value) => column.values.push(value),
                None => column.dropped += 1,
            }
        }
        columns.push(column);
    }

    Ok(ParsedDataset { columns })
}
