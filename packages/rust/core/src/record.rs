//! Per-subject uvar record construction.
//!
//! Looks up the derivative files a QC report needs for one subject, fetches
//! the reference template, writes the `out.ss_review.FT.txt` sidecar and
//! validates the resulting [`QcRecord`].

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use bidsqc_index::{IndexRow, Query, UnifiedTable};
use bidsqc_shared::{BidsQcError, QcRecord, QcRecordFields, Result, normalize_subject};
use bidsqc_templates::{TemplateClient, TemplateQuery};

/// Sidecar file name expected by the report tool.
pub const SS_REVIEW_FILE: &str = "out.ss_review.FT.txt";

/// Repetitions written to the sidecar.
// TODO: derive from the per-run volume count of the preprocessed BOLD series.
pub const PLACEHOLDER_TRS_PER_RUN: u32 = 1;

/// Template space the anatomical derivatives are normalized to.
const TEMPLATE_SPACE: &str = "MNI152NLin2009cAsym";

/// Functional task the mask and reference volumes come from.
const FUNC_TASK: &str = "balloonanalogrisktask";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Preprocessed T1w in template space.
pub fn anat_preproc_query() -> Query {
    Query::new()
        .where_eq("datatype", "anat")
        .where_eq("space", TEMPLATE_SPACE)
        .where_eq("desc", "preproc")
        .where_eq("suffix", "T1w")
        .where_eq("ext", ".nii.gz")
}

/// Functional brain mask.
pub fn brain_mask_query() -> Query {
    Query::new()
        .where_eq("datatype", "func")
        .where_eq("task", FUNC_TASK)
        .where_eq("desc", "brain")
        .where_eq("suffix", "mask")
        .where_eq("ext", ".nii.gz")
}

/// BOLD reference volume.
pub fn boldref_query() -> Query {
    Query::new()
        .where_eq("datatype", "func")
        .where_eq("task", FUNC_TASK)
        .where_eq("suffix", "boldref")
        .where_eq("ext", ".nii.gz")
}

/// Template the anatomical is compared against.
pub fn reference_template() -> TemplateQuery {
    TemplateQuery::new(TEMPLATE_SPACE, 2, "T1w", ".nii.gz")
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build and validate the record for one subject.
///
/// Writes `out.ss_review.FT.txt` into `out_dir`. Fails with
/// [`BidsQcError::MissingDerivative`] when `copy_anat` or `final_anat`
/// has no matching file; `mask_dset` and `vr_base_dset` are left unset
/// instead.
#[instrument(skip_all, fields(subject = %subject))]
pub async fn build_record(
    table: &UnifiedTable,
    subject: &str,
    out_dir: &Path,
    templates: &TemplateClient,
) -> Result<QcRecord> {
    let subj = normalize_subject(subject);
    let subject_table = table.for_subject(&subj);
    debug!(rows = subject_table.len(), "subject rows selected");

    let copy_anat = resolve_required(&subject_table, &anat_preproc_query(), &subj, "copy_anat")?;
    // Same lookup as copy_anat; both fields are handed to the report tool.
    let final_anat =
        resolve_required(&subject_table, &anat_preproc_query(), &subj, "final_anat")?;
    let mask_dset = resolve_optional(&subject_table, &brain_mask_query())?;
    let vr_base_dset = resolve_optional(&subject_table, &boldref_query())?;

    let template = templates.get(&reference_template()).await?;
    let ss_review_dset = write_ss_review(PLACEHOLDER_TRS_PER_RUN, out_dir)?;

    let record = QcRecord::new(QcRecordFields {
        copy_anat,
        final_anat,
        template,
        ss_review_dset,
        subj,
        ses: None,
        mask_dset,
        vr_base_dset,
    })?;

    info!(
        has_mask = record.mask_dset.is_some(),
        has_vr_base = record.vr_base_dset.is_some(),
        "record built"
    );
    Ok(record)
}

/// Write the sidecar reporting the number of TRs per run.
pub fn write_ss_review(repetitions: u32, out_dir: &Path) -> Result<PathBuf> {
    let path = out_dir.join(SS_REVIEW_FILE);
    std::fs::write(&path, format!("num_TRs_per_run: {repetitions}\n"))
        .map_err(|e| BidsQcError::io(&path, e))?;
    std::fs::canonicalize(&path).map_err(|e| BidsQcError::io(&path, e))
}

fn resolve_required(
    table: &UnifiedTable,
    query: &Query,
    subject: &str,
    field: &str,
) -> Result<PathBuf> {
    let row = table.first(query).ok_or_else(|| {
        debug!(%query, field, "no matching file");
        BidsQcError::missing_derivative(subject, field)
    })?;
    row.absolute_path()
}

fn resolve_optional(table: &UnifiedTable, query: &Query) -> Result<Option<PathBuf>> {
    table.first(query).map(IndexRow::absolute_path).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidsqc_index::load_local_dataset;
    use bidsqc_shared::TemplateConfig;

    const ANAT: &str = "sub-01/anat/sub-01_space-MNI152NLin2009cAsym_desc-preproc_T1w.nii.gz";
    const MASK: &str =
        "sub-01/func/sub-01_task-balloonanalogrisktask_space-MNI152NLin2009cAsym_desc-brain_mask.nii.gz";
    const BOLDREF: &str =
        "sub-01/func/sub-01_task-balloonanalogrisktask_space-MNI152NLin2009cAsym_boldref.nii.gz";

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    /// Template client whose cache already holds the reference template.
    fn seeded_templates(cache: &Path) -> TemplateClient {
        let client = TemplateClient::new(&TemplateConfig {
            base_url: "http://127.0.0.1:9".parse().unwrap(),
            cache_dir: cache.to_path_buf(),
            timeout_secs: 1,
        })
        .unwrap();
        let cached = client.cached_path(&reference_template());
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(cached, b"").unwrap();
        client
    }

    #[test]
    fn queries_render_expected_predicates() {
        assert_eq!(
            anat_preproc_query().to_string(),
            "datatype = 'anat' AND space = 'MNI152NLin2009cAsym' AND desc = 'preproc' \
             AND suffix = 'T1w' AND ext = '.nii.gz'"
        );
        assert_eq!(
            reference_template().file_name(),
            "tpl-MNI152NLin2009cAsym_res-02_T1w.nii.gz"
        );
    }

    #[test]
    fn ss_review_contains_trs_line() {
        let out = tempfile::tempdir().unwrap();
        let path = write_ss_review(1, out.path()).unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with(SS_REVIEW_FILE));
        assert_eq!(
            std::fs::read_to_string(path).unwrap().trim_end(),
            "num_TRs_per_run: 1"
        );
    }

    #[tokio::test]
    async fn builds_record_with_all_fields() {
        let ds = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        for rel in [ANAT, MASK, BOLDREF, "sub-01/func/sub-01_task-balloonanalogrisktask_bold.nii.gz"] {
            touch(ds.path(), rel);
        }
        let table = load_local_dataset::<&str>(ds.path(), None).unwrap();
        let templates = seeded_templates(cache.path());

        let record = build_record(&table, "01", out.path(), &templates).await.unwrap();

        let root = std::fs::canonicalize(ds.path()).unwrap();
        assert_eq!(record.subj, "sub-01");
        assert_eq!(record.copy_anat, root.join(ANAT));
        assert_eq!(record.final_anat, record.copy_anat);
        assert_eq!(record.mask_dset, Some(root.join(MASK)));
        assert_eq!(record.vr_base_dset, Some(root.join(BOLDREF)));
        assert!(record.ses.is_none());
        assert!(record.ss_review_dset.ends_with(SS_REVIEW_FILE));
        assert!(record.template.starts_with(std::fs::canonicalize(cache.path()).unwrap()));
    }

    #[tokio::test]
    async fn optional_fields_unset_when_unmatched() {
        let ds = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        touch(ds.path(), ANAT);
        let table = load_local_dataset::<&str>(ds.path(), None).unwrap();

        let record = build_record(&table, "sub-01", out.path(), &seeded_templates(cache.path()))
            .await
            .unwrap();

        assert!(record.mask_dset.is_none());
        assert!(record.vr_base_dset.is_none());
    }

    #[tokio::test]
    async fn missing_anat_is_an_error() {
        let ds = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        touch(ds.path(), BOLDREF);
        let table = load_local_dataset::<&str>(ds.path(), None).unwrap();

        let err = build_record(&table, "01", out.path(), &seeded_templates(cache.path()))
            .await
            .unwrap_err();

        match err {
            BidsQcError::MissingDerivative { subject, field } => {
                assert_eq!(subject, "sub-01");
                assert_eq!(field, "copy_anat");
            }
            other => panic!("expected MissingDerivative, got {other}"),
        }
        assert!(!out.path().join(SS_REVIEW_FILE).exists());
    }

    #[tokio::test]
    async fn other_subjects_rows_are_ignored() {
        let ds = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        touch(ds.path(), ANAT);
        let table = load_local_dataset::<&str>(ds.path(), None).unwrap();

        let err = build_record(&table, "02", out.path(), &seeded_templates(cache.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, BidsQcError::MissingDerivative { .. }));
    }
}
