//! BIDS filename parser.
//!
//! Splits names like `sub-01_ses-1_task-rest_space-MNI_desc-preproc_bold.nii.gz`
//! into `key-value` entities, a trailing suffix, and a (possibly compound)
//! extension.

use regex::Regex;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Known vocabulary
// ---------------------------------------------------------------------------

/// Entity keys with a dedicated column, in BIDS specification order.
pub const KNOWN_ENTITIES: &[&str] = &[
    "sub", "ses", "sample", "task", "tracksys", "acq", "nuc", "voi", "ce", "trc", "stain", "rec",
    "dir", "run", "mod", "echo", "flip", "inv", "mt", "part", "proc", "hemi", "space", "split",
    "recording", "chunk", "seg", "res", "den", "label", "desc",
];

/// Directory names recognized as a BIDS datatype.
pub const DATATYPES: &[&str] = &[
    "anat", "func", "dwi", "fmap", "perf", "beh", "eeg", "meg", "ieeg", "pet", "micr", "nirs",
    "motion",
];

/// Matches one `key-value` entity token.
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]+)-([A-Za-z0-9+]+)$").expect("entity regex")
});

/// Matches a suffix token.
static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+$").expect("suffix regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A parsed BIDS filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Entities in order of appearance, including unknown keys.
    pub entities: Vec<(String, String)>,
    /// Trailing suffix (`T1w`, `bold`, `mask`, ...).
    pub suffix: Option<String>,
    /// Everything from the first `.` on (`.nii.gz`, `.json`, ...).
    pub ext: Option<String>,
}

impl ParsedName {
    /// Value of an entity, if present.
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a BIDS filename. Returns `None` for names that are not
/// entity-structured (no leading `sub-` entity, malformed tokens).
pub fn parse_filename(name: &str) -> Option<ParsedName> {
    let (stem, ext) = match name.find('.') {
        Some(idx) => (&name[..idx], Some(name[idx..].to_string())),
        None => (name, None),
    };

    let tokens: Vec<&str> = stem.split('_').collect();
    let (last, init) = tokens.split_last()?;

    let mut entities = Vec::with_capacity(tokens.len());
    for token in init {
        let caps = ENTITY_RE.captures(token)?;
        entities.push((caps[1].to_string(), caps[2].to_string()));
    }

    let suffix = if let Some(caps) = ENTITY_RE.captures(last) {
        entities.push((caps[1].to_string(), caps[2].to_string()));
        None
    } else if SUFFIX_RE.is_match(last) {
        Some((*last).to_string())
    } else {
        return None;
    };

    if entities.first().map(|(k, _)| k.as_str()) != Some("sub") {
        return None;
    }

    Some(ParsedName {
        entities,
        suffix,
        ext,
    })
}

/// Whether a directory name is a recognized datatype.
pub fn is_datatype(name: &str) -> bool {
    DATATYPES.contains(&name)
}
