//! Dataset loading: index a BIDS dataset into a [`UnifiedTable`].
//!
//! An [`Indexer`] produces one [`RawIndexRow`] per file, with a fixed set of
//! standard entity columns plus a composite `extra_entities` list for keys
//! outside that set. [`load_dataset`] flattens the composite list so every
//! key seen anywhere in the dataset becomes a column of its own.

mod parser;
mod table;
mod walker;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use bidsqc_shared::{Result, normalize_subjects};

pub use parser::{DATATYPES, KNOWN_ENTITIES, ParsedName, is_datatype, parse_filename};
pub use table::{IndexRow, PATH_COLUMN, Query, ROOT_COLUMN, SUBJECT_COLUMN, UnifiedTable};
pub use walker::FsIndexer;

// ---------------------------------------------------------------------------
// Indexer contract
// ---------------------------------------------------------------------------

/// One file as reported by an [`Indexer`], before flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIndexRow {
    /// Dataset root.
    pub root: PathBuf,
    /// Path relative to `root`, `/`-separated.
    pub path: String,
    /// Values for base-schema columns (`sub`, `datatype`, `suffix`, ...).
    pub entities: BTreeMap<String, String>,
    /// Key/value pairs outside the base schema, in order of appearance.
    pub extra_entities: Option<Vec<(String, String)>>,
}

/// Produces the raw per-file index of a dataset.
pub trait Indexer {
    /// Index `root`, restricted to `include_subjects` (`sub-` prefixed) when given.
    fn index(&self, root: &Path, include_subjects: Option<&[String]>) -> Result<Vec<RawIndexRow>>;
}

/// Columns every table carries, in order.
pub fn base_columns() -> Vec<String> {
    [ROOT_COLUMN, PATH_COLUMN]
        .into_iter()
        .chain(KNOWN_ENTITIES.iter().copied())
        .chain(["datatype", "suffix", "ext"])
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Index a dataset and flatten its extra entities into columns.
///
/// Subjects are normalized to their `sub-` form before being handed to the
/// indexer. Indexer errors propagate unchanged.
#[instrument(skip_all, fields(dataset = %dataset.display()))]
pub fn load_dataset<S: AsRef<str>>(
    indexer: &dyn Indexer,
    dataset: &Path,
    subjects: Option<&[S]>,
) -> Result<UnifiedTable> {
    let subjects = subjects.map(|s| normalize_subjects(s.iter()));
    let raw = indexer.index(dataset, subjects.as_deref())?;
    let table = flatten(raw);

    info!(
        files = table.len(),
        columns = table.columns().len(),
        "dataset loaded"
    );
    Ok(table)
}

/// [`load_dataset`] with the built-in [`FsIndexer`].
pub fn load_local_dataset<S: AsRef<str>>(
    dataset: &Path,
    subjects: Option<&[S]>,
) -> Result<UnifiedTable> {
    load_dataset(&FsIndexer::new(), dataset, subjects)
}

/// Promote extra entities to top-level columns, joined back by file path.
fn flatten(raw: Vec<RawIndexRow>) -> UnifiedTable {
    let mut columns = base_columns();

    let extras_by_path: HashMap<String, BTreeMap<String, String>> = raw
        .iter()
        .map(|row| {
            let pairs = row.extra_entities.clone().unwrap_or_default();
            (row.path.clone(), pairs.into_iter().collect())
        })
        .collect();

    let all_keys: BTreeSet<&String> = extras_by_path.values().flat_map(|m| m.keys()).collect();

    let mut rows: Vec<IndexRow> = raw.iter().map(base_row).collect();

    if all_keys.is_empty() {
        debug!("no extra entities, skipping flatten");
        return UnifiedTable::new(columns, rows);
    }

    let new_keys: Vec<String> = all_keys
        .into_iter()
        .filter(|key| !columns.contains(key))
        .cloned()
        .collect();
    debug!(keys = ?new_keys, "flattening extra entities");

    for row in &mut rows {
        let extras = extras_by_path.get(row.path());
        for key in &new_keys {
            let value = extras.and_then(|m| m.get(key)).cloned();
            row.set(key.clone(), value);
        }
    }
    columns.extend(new_keys);

    UnifiedTable::new(columns, rows)
}

fn base_row(raw: &RawIndexRow) -> IndexRow {
    let mut row = IndexRow::new(raw.root.clone(), raw.path.clone());
    for (key, value) in &raw.entities {
        row.set(key.clone(), Some(value.clone()));
    }
    row
}
