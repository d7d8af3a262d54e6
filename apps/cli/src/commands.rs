//! CLI argument definitions, tracing setup, and the figure run.

use std::path::{Path, PathBuf};

use bidsqc_core::{
    ApqcCommand, FigureSummary, ProgressReporter, SubjectFigures, generate_figures,
};
use bidsqc_index::load_local_dataset;
use bidsqc_shared::{
    AppConfig, ReportConfig, TemplateConfig, load_config, load_config_from, normalize_subjects,
};
use bidsqc_templates::TemplateClient;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// bidsqc: AFNI QC figures for BIDS derivatives.
#[derive(Parser)]
#[command(
    name = "bidsqc",
    version,
    about = "Generate AFNI QC figures for every subject of a BIDS derivatives dataset.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Root of the BIDS (derivatives) dataset.
    pub bids_dir: PathBuf,

    /// Directory receiving `<subj>[/<ses>]/figures/*.jpg`.
    pub out_dir: PathBuf,

    /// Only process these subjects (with or without the `sub-` prefix).
    #[arg(long, num_args = 1.., value_name = "SUB")]
    pub include: Option<Vec<String>>,

    /// Config file (defaults to ~/.bidsqc/bidsqc.toml).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bidsqc=info",
        1 => "bidsqc=debug",
        _ => "bidsqc=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Load config and dataset, then generate figures for every subject.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref())?;

    let template_config = TemplateConfig::try_from(&config)?;
    let templates = TemplateClient::new(&template_config)?;
    let tool = ApqcCommand::from(&ReportConfig::from(&config));

    let include = cli.include.as_deref().map(normalize_subjects);
    info!(
        bids_dir = %cli.bids_dir.display(),
        out_dir = %cli.out_dir.display(),
        include = ?include,
        template_cache = %templates.cache_dir().display(),
        "starting QC run"
    );

    let table = load_local_dataset(&cli.bids_dir, include.as_deref())
        .wrap_err_with(|| format!("failed to index {}", cli.bids_dir.display()))?;
    if table.is_empty() {
        warn!(bids_dir = %cli.bids_dir.display(), "no BIDS files found");
    }

    let reporter = CliProgress::new();
    let summary = match generate_figures(&table, &cli.out_dir, &templates, &tool, &reporter).await
    {
        Ok(summary) => summary,
        Err(e) => {
            reporter.abandon();
            return Err(e.into());
        }
    };

    print_summary(&summary, &cli.out_dir);
    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn print_summary(summary: &FigureSummary, out_dir: &Path) {
    let images: usize = summary.subjects.iter().map(|s| s.images).sum();

    println!();
    println!("  QC figures generated!");
    println!("  Subjects: {}", summary.subjects.len());
    println!("  Images:   {images}");
    println!("  Output:   {}", out_dir.display());
    println!("  Time:     {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn abandon(&self) {
        self.spinner.abandon_with_message("QC run failed");
    }
}

impl ProgressReporter for CliProgress {
    fn subject_started(&self, subject: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Rendering [{current}/{total}] {subject}"));
    }

    fn subject_done(&self, figures: &SubjectFigures) {
        self.spinner.println(format!(
            "  ✓ {} ({} images) → {}",
            figures.subject,
            figures.images,
            figures.figures_dir.display()
        ));
    }

    fn done(&self, _summary: &FigureSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positionals_and_include_list() {
        let cli = Cli::try_parse_from([
            "bidsqc", "/data/ds", "/data/qc", "--include", "01", "sub-02", "-vv",
        ])
        .unwrap();

        assert_eq!(cli.bids_dir, PathBuf::from("/data/ds"));
        assert_eq!(cli.out_dir, PathBuf::from("/data/qc"));
        assert_eq!(
            cli.include,
            Some(vec!["01".to_string(), "sub-02".to_string()])
        );
        assert_eq!(cli.verbose, 2);
        assert!(cli.config.is_none());
    }

    #[test]
    fn out_dir_is_required() {
        assert!(Cli::try_parse_from(["bidsqc", "/data/ds"]).is_err());
    }

    #[test]
    fn explicit_config_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bidsqc.toml");
        std::fs::write(&path, "[report]\nreview_style = \"basic\"\n").unwrap();

        let config = resolve_config(Some(&path)).unwrap();
        assert_eq!(config.report.review_style, "basic");
        assert_eq!(config.report.program, "apqc_make_tcsh.py");
    }

    #[test]
    fn unreadable_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
