//! End-to-end figure pipeline: table → records → report tool → figures.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::{NamedTempFile, TempDir};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use bidsqc_index::UnifiedTable;
use bidsqc_shared::{BidsQcError, QcRecord, Result, normalize_subject};
use bidsqc_templates::TemplateClient;

use crate::record::build_record;
use crate::report::ReportTool;

/// Extension of the images collected from the report tool's output.
const FIGURE_EXTENSION: &str = "jpg";

/// Figures produced for one subject.
#[derive(Debug, Clone)]
pub struct SubjectFigures {
    /// Canonical `sub-` identifier.
    pub subject: String,
    /// Absolute directory the images were moved into.
    pub figures_dir: PathBuf,
    /// Number of images moved.
    pub images: usize,
}

/// Result of a full pipeline run.
#[derive(Debug)]
pub struct FigureSummary {
    /// One entry per subject, in processing order.
    pub subjects: Vec<SubjectFigures>,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter {
    /// Called before a subject's record is built.
    fn subject_started(&self, subject: &str, current: usize, total: usize);
    /// Called once a subject's figures are in place.
    fn subject_done(&self, figures: &SubjectFigures);
    /// Called when every subject has been processed.
    fn done(&self, summary: &FigureSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn subject_started(&self, _subject: &str, _current: usize, _total: usize) {}
    fn subject_done(&self, _figures: &SubjectFigures) {}
    fn done(&self, _summary: &FigureSummary) {}
}

/// Generate QC figures for every subject in `table`.
///
/// Subjects are processed one at a time in ascending order:
/// 1. Build the subject's record (sidecar written into `destination`)
/// 2. Serialize it to a transient JSON file
/// 3. Run the report tool in a fresh scratch directory
/// 4. Move the produced `*.jpg` files into `destination/<subj>[/<ses>]/figures`
///
/// The first failing subject aborts the run; figures already moved for
/// earlier subjects stay on disk.
#[instrument(skip_all, fields(destination = %destination.display(), files = table.len()))]
pub async fn generate_figures(
    table: &UnifiedTable,
    destination: &Path,
    templates: &TemplateClient,
    tool: &dyn ReportTool,
    progress: &dyn ProgressReporter,
) -> Result<FigureSummary> {
    let start = Instant::now();

    std::fs::create_dir_all(destination).map_err(|e| BidsQcError::io(destination, e))?;

    let subjects = table.subjects();
    let total = subjects.len();
    info!(subjects = total, "generating figures");

    let uvar_file = tempfile::Builder::new()
        .prefix("bidsqc-uvars-")
        .suffix(".json")
        .tempfile()
        .map_err(|e| BidsQcError::io(std::env::temp_dir(), e))?;

    let mut done = Vec::with_capacity(total);
    for (i, label) in subjects.iter().enumerate() {
        let subject = normalize_subject(label);
        progress.subject_started(&subject, i + 1, total);

        let record = build_record(table, &subject, destination, templates).await?;
        write_uvars(&uvar_file, &record)?;

        let scratch = scratch_dir()?;
        render_blocking(tool, uvar_file.path(), scratch.path())?;

        let figures_dir = destination.join(record.figures_dir());
        std::fs::create_dir_all(&figures_dir).map_err(|e| BidsQcError::io(&figures_dir, e))?;
        let images = collect_images(scratch.path(), &figures_dir)?;

        let scratch_path = scratch.path().to_path_buf();
        scratch
            .close()
            .map_err(|e| BidsQcError::io(scratch_path, e))?;

        info!(subject = %record.subj, images, dir = %figures_dir.display(), "figures ready");
        let figures = SubjectFigures {
            subject: record.subj,
            figures_dir,
            images,
        };
        progress.subject_done(&figures);
        done.push(figures);
    }

    let summary = FigureSummary {
        subjects: done,
        elapsed: start.elapsed(),
    };
    progress.done(&summary);
    Ok(summary)
}

/// Run the report tool, marking the blocking call on multi-threaded runtimes.
fn render_blocking(tool: &dyn ReportTool, uvar_json: &Path, work_dir: &Path) -> Result<()> {
    let multi_thread = Handle::try_current()
        .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);
    if multi_thread {
        tokio::task::block_in_place(|| tool.render(uvar_json, work_dir))
    } else {
        tool.render(uvar_json, work_dir)
    }
}

/// Overwrite the transient uvar file with `record` as JSON.
fn write_uvars(file: &NamedTempFile, record: &QcRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| BidsQcError::Serialization(format!("uvar record: {e}")))?;
    std::fs::write(file.path(), json).map_err(|e| BidsQcError::io(file.path(), e))?;
    debug!(path = %file.path().display(), "wrote uvar json");
    Ok(())
}

fn scratch_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("bidsqc-apqc-")
        .tempdir()
        .map_err(|e| BidsQcError::io(std::env::temp_dir(), e))
}

/// Move every `*.jpg` under `source` (recursively) into `target`, keeping base names.
fn collect_images(source: &Path, target: &Path) -> Result<usize> {
    let mut moved = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| BidsQcError::io(source, e.into()))?;
        let is_figure = entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == FIGURE_EXTENSION);
        if !is_figure {
            continue;
        }

        let dest = target.join(entry.file_name());
        move_file(entry.path(), &dest)?;
        debug!(from = %entry.path().display(), to = %dest.display(), "moved figure");
        moved += 1;
    }
    Ok(moved)
}

/// Rename, falling back to copy + remove when crossing filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| BidsQcError::io(to, e))?;
    std::fs::remove_file(from).map_err(|e| BidsQcError::io(from, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_images_flattens_and_filters() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let media = source.path().join("QC_sub-01/media");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("anat.jpg"), b"a").unwrap();
        std::fs::write(media.join("notes.txt"), b"n").unwrap();
        std::fs::write(source.path().join("top.jpg"), b"t").unwrap();

        let moved = collect_images(source.path(), target.path()).unwrap();

        assert_eq!(moved, 2);
        assert!(target.path().join("anat.jpg").exists());
        assert!(target.path().join("top.jpg").exists());
        assert!(!target.path().join("notes.txt").exists());
        assert!(!media.join("anat.jpg").exists());
        assert!(media.join("notes.txt").exists());
    }

    #[test]
    fn move_file_overwrites_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.jpg");
        let to = dir.path().join("b.jpg");
        std::fs::write(&from, b"new").unwrap();
        std::fs::write(&to, b"old").unwrap();

        move_file(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"new");
    }
}
