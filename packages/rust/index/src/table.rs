//! Unified file table and declarative row queries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use bidsqc_shared::{BidsQcError, Result, strip_subject_prefix};

/// Column holding the dataset root.
pub const ROOT_COLUMN: &str = "root";
/// Column holding the dataset-relative file path.
pub const PATH_COLUMN: &str = "path";
/// Column holding the bare subject label.
pub const SUBJECT_COLUMN: &str = "sub";

// ---------------------------------------------------------------------------
// IndexRow
// ---------------------------------------------------------------------------

/// One indexed file with its classification attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    root: PathBuf,
    path: String,
    values: BTreeMap<String, Option<String>>,
}

impl IndexRow {
    /// Create a row with no attributes.
    pub fn new(root: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            path: path.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, Some(value.into()));
        self
    }

    pub(crate) fn set(&mut self, column: impl Into<String>, value: Option<String>) {
        self.values.insert(column.into(), value);
    }

    /// Dataset root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to [`IndexRow::root`].
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Value of a column for this row. Absent and null both read as `None`.
    pub fn get(&self, column: &str) -> Option<&str> {
        match column {
            ROOT_COLUMN => self.root.to_str(),
            PATH_COLUMN => Some(&self.path),
            _ => self.values.get(column).and_then(|v| v.as_deref()),
        }
    }

    /// Join `root` and `path` and canonicalize the result.
    pub fn absolute_path(&self) -> Result<PathBuf> {
        let joined = self.root.join(&self.path);
        std::fs::canonicalize(&joined).map_err(|e| BidsQcError::io(joined, e))
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A conjunction of exact-match predicates over row columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    predicates: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column` to equal `value`.
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates.push((column.into(), value.into()));
        self
    }

    /// True when every predicate holds for `row`. Null never matches.
    pub fn matches(&self, row: &IndexRow) -> bool {
        self.predicates
            .iter()
            .all(|(column, value)| row.get(column) == Some(value.as_str()))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (column, value)) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{column} = '{value}'")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UnifiedTable
// ---------------------------------------------------------------------------

/// Every indexed file of a dataset, with every observed attribute as a column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnifiedTable {
    columns: Vec<String>,
    rows: Vec<IndexRow>,
}

impl UnifiedTable {
    /// Build a table. Each row is padded with nulls for columns it lacks.
    pub fn new(columns: Vec<String>, rows: Vec<IndexRow>) -> Self {
        let rows = rows
            .into_iter()
            .map(|mut row| {
                for column in &columns {
                    if column != ROOT_COLUMN && column != PATH_COLUMN {
                        row.values.entry(column.clone()).or_insert(None);
                    }
                }
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Distinct bare subject labels in ascending order.
    pub fn subjects(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(SUBJECT_COLUMN))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows belonging to one subject. Accepts `01` or `sub-01`.
    pub fn for_subject(&self, subject: &str) -> Self {
        let label = strip_subject_prefix(subject);
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row.get(SUBJECT_COLUMN) == Some(label))
                .cloned()
                .collect(),
        }
    }

    /// All rows matching `query`, in table order.
    pub fn select(&self, query: &Query) -> Vec<&IndexRow> {
        self.rows.iter().filter(|row| query.matches(row)).collect()
    }

    /// First row matching `query`.
    pub fn first(&self, query: &Query) -> Option<&IndexRow> {
        self.rows.iter().find(|row| query.matches(row))
    }
}
