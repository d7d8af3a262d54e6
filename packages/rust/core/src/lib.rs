//! Record building and figure generation for bidsqc.
//!
//! This crate ties together dataset tables, template fetching and the
//! external QC report tool into the end-to-end `generate_figures` workflow.

pub mod pipeline;
pub mod record;
pub mod report;

pub use pipeline::{FigureSummary, ProgressReporter, SilentProgress, SubjectFigures, generate_figures};
pub use record::{SS_REVIEW_FILE, build_record};
pub use report::{ApqcCommand, ReportTool};
