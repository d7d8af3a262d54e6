//! External QC report tool invocation.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use bidsqc_shared::{BidsQcError, ReportConfig, Result};

/// Renders QC images for one serialized uvar record.
///
/// Implementations must leave their `*.jpg` output somewhere under
/// `work_dir`; the caller collects them from there.
pub trait ReportTool {
    fn render(&self, uvar_json: &Path, work_dir: &Path) -> Result<()>;
}

/// Runs AFNI's `apqc_make_tcsh.py` (or a compatible program).
#[derive(Debug, Clone)]
pub struct ApqcCommand {
    program: String,
    review_style: String,
}

impl ApqcCommand {
    pub fn new(program: impl Into<String>, review_style: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            review_style: review_style.into(),
        }
    }
}

impl From<&ReportConfig> for ApqcCommand {
    fn from(config: &ReportConfig) -> Self {
        Self::new(&config.program, &config.review_style)
    }
}

impl ReportTool for ApqcCommand {
    fn render(&self, uvar_json: &Path, work_dir: &Path) -> Result<()> {
        info!(
            program = %self.program,
            uvar_json = %uvar_json.display(),
            review_style = %self.review_style,
            "running report tool"
        );

        let output = Command::new(&self.program)
            .arg("-uvar_json")
            .arg(uvar_json)
            .arg("-review_style")
            .arg(&self.review_style)
            .arg("-subj_dir")
            .arg(work_dir)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                BidsQcError::ReportTool(format!(
                    "failed to spawn `{}`: {e}. Is AFNI installed and on PATH?",
                    self.program
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(stdout = %stdout.trim(), "report tool output");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let start = stderr.char_indices().rev().nth(499).map_or(0, |(i, _)| i);
            let tail = &stderr[start..];
            return Err(BidsQcError::ReportTool(format!(
                "`{}` exited with {}: {tail}",
                self.program, output.status
            )));
        }

        Ok(())
    }
}
