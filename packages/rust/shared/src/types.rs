//! Core domain types for bidsqc.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BidsQcError, Result};

/// Prefix carried by every canonical BIDS subject identifier.
pub const SUBJECT_PREFIX: &str = "sub-";

// ---------------------------------------------------------------------------
// Subject labels
// ---------------------------------------------------------------------------

/// Add the `sub-` prefix unless the identifier already carries it.
pub fn normalize_subject(subject: &str) -> String {
    if subject.starts_with(SUBJECT_PREFIX) {
        subject.to_string()
    } else {
        format!("{SUBJECT_PREFIX}{subject}")
    }
}

/// Normalize a sequence of subject identifiers, preserving order.
pub fn normalize_subjects<I, S>(subjects: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    subjects
        .into_iter()
        .map(|s| normalize_subject(s.as_ref()))
        .collect()
}

/// Bare subject label as stored in the index's `sub` column (`sub-01` → `01`).
pub fn strip_subject_prefix(subject: &str) -> &str {
    subject.strip_prefix(SUBJECT_PREFIX).unwrap_or(subject)
}

// ---------------------------------------------------------------------------
// QcRecord
// ---------------------------------------------------------------------------

/// Unvalidated inputs for a [`QcRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcRecordFields {
    pub copy_anat: PathBuf,
    pub final_anat: PathBuf,
    pub template: PathBuf,
    pub ss_review_dset: PathBuf,
    pub subj: String,
    #[serde(default)]
    pub ses: Option<String>,
    #[serde(default)]
    pub mask_dset: Option<PathBuf>,
    #[serde(default)]
    pub vr_base_dset: Option<PathBuf>,
}

/// Per-subject uvar record handed to the QC report tool.
///
/// Every path field is checked to be an existing file when the record is
/// built, so a `QcRecord` value always describes files that were present
/// at construction time. Unset optional fields are omitted when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QcRecordFields")]
#[non_exhaustive]
pub struct QcRecord {
    pub copy_anat: PathBuf,
    pub final_anat: PathBuf,
    pub template: PathBuf,
    pub ss_review_dset: PathBuf,
    pub subj: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ses: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_dset: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vr_base_dset: Option<PathBuf>,
}

impl QcRecord {
    /// Validate the fields and build the record.
    pub fn new(fields: QcRecordFields) -> Result<Self> {
        require_file("copy_anat", &fields.copy_anat)?;
        require_file("final_anat", &fields.final_anat)?;
        require_file("template", &fields.template)?;
        require_file("ss_review_dset", &fields.ss_review_dset)?;
        if let Some(path) = &fields.mask_dset {
            require_file("mask_dset", path)?;
        }
        if let Some(path) = &fields.vr_base_dset {
            require_file("vr_base_dset", path)?;
        }

        Ok(Self {
            copy_anat: fields.copy_anat,
            final_anat: fields.final_anat,
            template: fields.template,
            ss_review_dset: fields.ss_review_dset,
            subj: fields.subj,
            ses: fields.ses,
            mask_dset: fields.mask_dset,
            vr_base_dset: fields.vr_base_dset,
        })
    }

    /// Relative directory receiving this record's figures: `subj[/ses]/figures`.
    pub fn figures_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(&self.subj);
        if let Some(ses) = &self.ses {
            dir.push(ses);
        }
        dir.join("figures")
    }
}

impl TryFrom<QcRecordFields> for QcRecord {
    type Error = BidsQcError;

    fn try_from(fields: QcRecordFields) -> Result<Self> {
        Self::new(fields)
    }
}

fn require_file(field: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BidsQcError::validation(format!(
            "{field}: file does not exist: {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    fn make_fields(dir: &Path) -> QcRecordFields {
        let anat = touch(dir, "anat.nii.gz");
        QcRecordFields {
            copy_anat: anat.clone(),
            final_anat: anat,
            template: touch(dir, "tpl.nii.gz"),
            ss_review_dset: touch(dir, "out.ss_review.FT.txt"),
            subj: "sub-01".into(),
            ses: None,
            mask_dset: None,
            vr_base_dset: None,
        }
    }

    #[test]
    fn normalize_adds_prefix_once() {
        assert_eq!(normalize_subject("01"), "sub-01");
        assert_eq!(normalize_subject("sub-01"), "sub-01");
        assert_eq!(normalize_subject(&normalize_subject("abc")), "sub-abc");
    }

    #[test]
    fn normalize_sequence_preserves_order() {
        let subjects = normalize_subjects(["02", "sub-01", "10"]);
        assert_eq!(subjects, vec!["sub-02", "sub-01", "sub-10"]);
        assert_eq!(normalize_subjects(subjects.clone()), subjects);
    }

    #[test]
    fn strip_prefix_returns_bare_label() {
        assert_eq!(strip_subject_prefix("sub-01"), "01");
        assert_eq!(strip_subject_prefix("01"), "01");
    }

    #[test]
    fn record_validates_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let record = QcRecord::new(make_fields(dir.path())).expect("valid record");
        assert_eq!(record.subj, "sub-01");
        assert!(record.mask_dset.is_none());
    }

    #[test]
    fn record_rejects_missing_optional_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut fields = make_fields(dir.path());
        fields.vr_base_dset = Some(dir.path().join("missing_boldref.nii.gz"));

        let err = QcRecord::new(fields).unwrap_err();
        assert!(err.to_string().contains("vr_base_dset"));
    }

    #[test]
    fn record_rejects_directory_as_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut fields = make_fields(dir.path());
        fields.template = dir.path().to_path_buf();

        assert!(QcRecord::new(fields).is_err());
    }

    #[test]
    fn figures_dir_with_and_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let record = QcRecord::new(make_fields(dir.path())).unwrap();
        assert_eq!(record.figures_dir(), PathBuf::from("sub-01/figures"));

        let mut fields = make_fields(dir.path());
        fields.ses = Some("ses-1".into());
        let record = QcRecord::new(fields).unwrap();
        assert_eq!(record.figures_dir(), PathBuf::from("sub-01/ses-1/figures"));
    }

    #[test]
    fn serialization_omits_unset_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut fields = make_fields(dir.path());
        fields.mask_dset = Some(touch(dir.path(), "mask.nii.gz"));
        let record = QcRecord::new(fields).unwrap();

        let value = serde_json::to_value(&record).expect("serialize");
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("mask_dset"));
        assert!(!obj.contains_key("vr_base_dset"));
        assert!(!obj.contains_key("ses"));
        assert_eq!(obj["subj"], "sub-01");
    }

    #[test]
    fn deserialization_runs_validation() {
        let json = r#"{
            "copy_anat": "/nonexistent/anat.nii.gz",
            "final_anat": "/nonexistent/anat.nii.gz",
            "template": "/nonexistent/tpl.nii.gz",
            "ss_review_dset": "/nonexistent/out.ss_review.FT.txt",
            "subj": "sub-01"
        }"#;
        let result: std::result::Result<QcRecord, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
