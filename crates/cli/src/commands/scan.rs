// `scriptum-verify scan`: verify annotation anchors in a document snapshot.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};

use scriptum_common::types::CompareMismatch;
use scriptum_integrity::config::IntegrityConfig;
use scriptum_integrity::hash::HashEngine;
use scriptum_integrity::index::DirtyRegion;
use scriptum_integrity::replica::SimDocument;
use scriptum_integrity::scanner::{IntegrityScanner, ScanKind, ScanReport};

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Document snapshot (blocks plus annotations) as JSON.
    path: PathBuf,

    /// Only scan annotations touching these blocks.
    #[arg(long, value_delimiter = ',')]
    dirty: Vec<String>,

    /// Run both scans and report what the dirty region missed.
    #[arg(long)]
    compare: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanOutput {
    pub path: String,
    pub kind: ScanKind,
    pub annotations_checked: usize,
    pub spans_checked: usize,
    pub chains_checked: usize,
    pub mismatches: Vec<CompareMismatch>,
    /// Present with `--compare`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed_by_dirty: Option<Vec<CompareMismatch>>,
}

impl ScanOutput {
    fn from_report(
        path: &Path,
        report: ScanReport,
        missed_by_dirty: Option<Vec<CompareMismatch>>,
    ) -> Self {
        Self {
            path: path.display().to_string(),
            kind: report.kind,
            annotations_checked: report.annotation_ids.len(),
            spans_checked: report.spans_checked,
            chains_checked: report.chains_checked,
            mismatches: report.mismatches,
            missed_by_dirty,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
            && self.missed_by_dirty.as_ref().map_or(true, |missed| missed.is_empty())
    }
}

pub fn run(
    args: ScanArgs,
    config: &IntegrityConfig,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let engine = super::engine_for(config)?;
    let report = scan_file(engine, &args.path, &args.dirty, args.compare)?;
    output::print_output(format, &report, format_human)?;
    Ok(ExitCode::from_clean(report.is_clean()))
}

pub fn load_snapshot(engine: HashEngine, path: &Path) -> anyhow::Result<SimDocument> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut doc = SimDocument::from_json(&data).with_context(|| format!("in {}", path.display()))?;
    doc.set_engine(engine);
    Ok(doc)
}

pub fn scan_file(
    engine: HashEngine,
    path: &Path,
    dirty: &[String],
    compare: bool,
) -> anyhow::Result<ScanOutput> {
    let doc = load_snapshot(engine, path)?;
    let mut scanner = IntegrityScanner::new(engine);
    let region = DirtyRegion::from_blocks(dirty.iter().cloned());

    if compare {
        let comparison = scanner.compare_scans(&doc, &region)?;
        return Ok(ScanOutput::from_report(path, comparison.full, Some(comparison.missed_by_dirty)));
    }
    let report = if dirty.is_empty() {
        scanner.full_scan(&doc)?
    } else {
        scanner.dirty_scan(&doc, &region)?
    };
    Ok(ScanOutput::from_report(path, report, None))
}

fn format_human(output: &ScanOutput) -> String {
    let mut lines = vec![format!(
        "{} scan of {}: {} annotation(s), {} span(s), {} chain(s)",
        output.kind,
        output.path,
        output.annotations_checked,
        output.spans_checked,
        output.chains_checked
    )];
    if output.mismatches.is_empty() {
        lines.push("no mismatches".to_string());
    } else {
        lines.push(format!("{} mismatch(es):", output.mismatches.len()));
        lines.push(output::render_mismatches(&output.mismatches));
    }
    if let Some(missed) = output.missed_by_dirty.as_ref().filter(|missed| !missed.is_empty()) {
        lines.push(format!("{} missed by the dirty region:", missed.len()));
        lines.push(output::render_mismatches(missed));
    }
    lines.join("\n")
}
