//! Raw detection tables and their validated, typed form.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigurationError, Error, ValidationError};
use crate::time::parse_timestamp;
use crate::types::{SiteId, Species};

/// A single camera-trap detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// The site (camera station) that recorded the detection.
    pub site_id: SiteId,
    /// When the detection occurred.
    pub timestamp: DateTime<Utc>,
    /// The detected species label.
    pub species: Species,
    /// Position in the input table. Breaks ties between equal timestamps.
    #[serde(default)]
    pub row: usize,
}

/// Names of the required input columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub site: String,
    pub datetime: String,
    pub species: String,
}

impl ColumnNames {
    pub const DEFAULT_SITE: &'static str = "Site";
    pub const DEFAULT_DATETIME: &'static str = "DateTime";
    pub const DEFAULT_SPECIES: &'static str = "Species";

    /// (role, configured name, default name) for each required column.
    fn roles(&self) -> [(&'static str, &str, &'static str); 3] {
        [
            ("site", self.site.as_str(), Self::DEFAULT_SITE),
            ("datetime", self.datetime.as_str(), Self::DEFAULT_DATETIME),
            ("species", self.species.as_str(), Self::DEFAULT_SPECIES),
        ]
    }

    /// Checks the configured names against a table header.
    ///
    /// A default-named column missing from the header is a data problem;
    /// a caller-chosen name missing from it is a configuration problem.
    pub fn check_header(&self, header: &[String]) -> Result<(), Error> {
        for (role, name, default) in self.roles() {
            if name.trim().is_empty() {
                return Err(ConfigurationError::EmptyColumnName { role }.into());
            }
            if header.iter().any(|c| c == name) {
                continue;
            }
            if name == default {
                return Err(ValidationError::MissingColumn {
                    name: name.to_string(),
                }
                .into());
            }
            return Err(ConfigurationError::UnknownColumn {
                role,
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            site: Self::DEFAULT_SITE.to_string(),
            datetime: Self::DEFAULT_DATETIME.to_string(),
            species: Self::DEFAULT_SPECIES.to_string(),
        }
    }
}

/// A row-oriented input table.
///
/// `columns` is the table header; rows may carry extra keys, which are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionTable {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl DetectionTable {
    /// Creates an empty table with the given header.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builds a table whose header is the union of the rows' keys, in
    /// first-seen order.
    pub fn from_rows(rows: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Appends a row.
    pub fn push_row(&mut self, row: Map<String, Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Validates the table and converts every row into a [`Detection`].
    ///
    /// Fails on the first bad row; nothing is returned for a partially
    /// valid table.
    pub fn parse_detections(&self, columns: &ColumnNames) -> Result<Vec<Detection>, Error> {
        if self.rows.is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }
        columns.check_header(&self.columns)?;

        let detections = self
            .rows
            .iter()
            .enumerate()
            .map(|(row, values)| parse_row(row, values, columns))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(rows = detections.len(), "parsed detection table");
        Ok(detections)
    }
}

fn parse_row(
    row: usize,
    values: &Map<String, Value>,
    columns: &ColumnNames,
) -> Result<Detection, ValidationError> {
    let site_value = required(row, values, &columns.site)?;
    let site_id = site_from_value(site_value).ok_or_else(|| ValidationError::InvalidValue {
        row,
        column: columns.site.clone(),
        value: site_value.to_string(),
    })?;

    let time_value = required(row, values, &columns.datetime)?;
    let timestamp =
        parse_timestamp(time_value).ok_or_else(|| ValidationError::UnparseableTimestamp {
            row,
            value: time_value.to_string(),
        })?;

    let species_value = required(row, values, &columns.species)?;
    let species = species_value
        .as_str()
        .and_then(|s| Species::new(s.trim()).ok())
        .ok_or_else(|| ValidationError::InvalidValue {
            row,
            column: columns.species.clone(),
            value: species_value.to_string(),
        })?;

    Ok(Detection {
        site_id,
        timestamp,
        species,
        row,
    })
}

fn required<'a>(
    row: usize,
    values: &'a Map<String, Value>,
    column: &str,
) -> Result<&'a Value, ValidationError> {
    match values.get(column) {
        None | Some(Value::Null) => Err(ValidationError::MissingValue {
            row,
            column: column.to_string(),
        }),
        Some(value) => Ok(value),
    }
}

/// Reads a site identifier from a string or integer cell.
pub(crate) fn site_from_value(value: &Value) -> Option<SiteId> {
    match value {
        Value::String(s) => SiteId::new(s.trim()).ok(),
        Value::Number(n) if n.is_i64() || n.is_u64() => SiteId::new(n.to_string()).ok(),
        _ => None,
    }
}

/// Rejects detection sequences in which a site's rows are not contiguous.
pub fn check_grouped_sites(detections: &[Detection]) -> Result<(), ValidationError> {
    let mut finished: HashSet<&SiteId> = HashSet::new();
    let mut current: Option<&SiteId> = None;

    for detection in detections {
        if current == Some(&detection.site_id) {
            continue;
        }
        if finished.contains(&detection.site_id) {
            return Err(ValidationError::NonContiguousSite {
                site: detection.site_id.clone(),
                row: detection.row,
            });
        }
        if let Some(previous) = current {
            finished.insert(previous);
        }
        current = Some(&detection.site_id);
    }
    Ok(())
}
