//! Local filesystem indexer.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

use bidsqc_shared::{BidsQcError, Result, SUBJECT_PREFIX, normalize_subject};

use crate::parser::{KNOWN_ENTITIES, is_datatype, parse_filename};
use crate::{Indexer, RawIndexRow};

/// Top-level directories that never hold indexable subject data.
const SKIPPED_TOP_LEVEL: &[&str] = &["sourcedata"];

/// Indexes a BIDS dataset stored in a local directory.
#[derive(Debug, Clone, Default)]
pub struct FsIndexer;

impl FsIndexer {
    pub fn new() -> Self {
        Self
    }
}

impl Indexer for FsIndexer {
    fn index(&self, root: &Path, include_subjects: Option<&[String]>) -> Result<Vec<RawIndexRow>> {
        if !root.is_dir() {
            return Err(BidsQcError::Dataset(format!(
                "dataset root is not a directory: {}",
                root.display()
            )));
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| keep_entry(entry, include_subjects));

        let mut rows = Vec::new();
        for entry in walker {
            let entry = entry
                .map_err(|e| BidsQcError::Dataset(format!("{}: {e}", root.display())))?;
            if !is_indexable_file(&entry) {
                continue;
            }
            if let Some(row) = index_file(root, &entry, include_subjects) {
                rows.push(row);
            }
        }

        rows.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %root.display(), files = rows.len(), "indexed dataset");
        Ok(rows)
    }
}

/// Directory pruning: hidden entries, skipped top-level dirs, excluded subjects.
fn keep_entry(entry: &DirEntry, include_subjects: Option<&[String]>) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return false;
    }
    if entry.depth() == 1 && entry.file_type().is_dir() {
        if SKIPPED_TOP_LEVEL.iter().any(|skipped| *skipped == name) {
            return false;
        }
        if name.starts_with(SUBJECT_PREFIX) {
            return subject_included(&name, include_subjects);
        }
    }
    true
}

/// Regular files, or symlinks resolving to one (git-annex datasets link
/// every file into `.git/annex/objects`). Dangling links are skipped.
fn is_indexable_file(entry: &DirEntry) -> bool {
    if entry.file_type().is_file() {
        return true;
    }
    if !entry.path_is_symlink() {
        return false;
    }
    let resolved = entry.path().is_file();
    if !resolved {
        trace!(path = %entry.path().display(), "skipping dangling or non-file symlink");
    }
    resolved
}

fn subject_included(subject: &str, include_subjects: Option<&[String]>) -> bool {
    include_subjects.is_none_or(|subjects| subjects.iter().any(|s| s == subject))
}

fn index_file(
    root: &Path,
    entry: &DirEntry,
    include_subjects: Option<&[String]>,
) -> Option<RawIndexRow> {
    let name = entry.file_name().to_str()?;
    let parsed = parse_filename(name)?;

    let subject = normalize_subject(parsed.entity("sub")?);
    if !subject_included(&subject, include_subjects) {
        return None;
    }

    let rel = entry.path().strip_prefix(root).ok()?;
    let path = rel.to_string_lossy().replace('\\', "/");

    let mut entities = BTreeMap::new();
    let mut extras = Vec::new();
    for (key, value) in parsed.entities {
        if KNOWN_ENTITIES.contains(&key.as_str()) {
            entities.insert(key, value);
        } else {
            extras.push((key, value));
        }
    }

    let datatype = entry
        .path()
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .filter(|n| is_datatype(n));
    if let Some(datatype) = datatype {
        entities.insert("datatype".into(), datatype.to_string());
    }
    if let Some(suffix) = parsed.suffix {
        entities.insert("suffix".into(), suffix);
    }
    if let Some(ext) = parsed.ext {
        entities.insert("ext".into(), ext);
    }

    trace!(%path, "indexed file");

    Some(RawIndexRow {
        root: root.to_path_buf(),
        path,
        entities,
        extra_entities: (!extras.is_empty()).then_some(extras),
    })
}
