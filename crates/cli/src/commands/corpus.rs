// `scriptum-verify corpus`: generate and verify conformance corpora.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;

use scriptum_integrity::corpus::{
    deserialize_corpus, generate_seed_corpus, replay_corpus, serialize_corpus, CorpusConfig,
    CorpusEntry, CorpusError, DEFAULT_CORPUS_SEED, DEFAULT_PER_CATEGORY,
};

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct CorpusArgs {
    #[command(subcommand)]
    action: CorpusAction,
}

#[derive(Debug, Subcommand)]
enum CorpusAction {
    /// Generate a deterministic corpus
    Generate {
        #[arg(long, default_value_t = DEFAULT_CORPUS_SEED)]
        seed: u64,
        #[arg(long, default_value_t = DEFAULT_PER_CATEGORY)]
        per_category: usize,
        /// Write here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Round-trip a corpus file and replay its recorded checksums
    Verify { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateReport {
    pub path: String,
    pub seed: u64,
    pub per_category: usize,
    pub entries: usize,
    pub final_checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyReport {
    pub path: String,
    pub entries: usize,
    pub categories: BTreeMap<String, usize>,
    pub round_trip: bool,
    /// Set once every entry replayed onto its recorded checksums.
    pub final_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.round_trip && self.failure.is_none()
    }
}

pub fn run(args: CorpusArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    match args.action {
        CorpusAction::Generate { seed, per_category, out } => {
            let config = CorpusConfig { seed, per_category };
            match out {
                Some(path) => {
                    let report = generate_to_file(&config, &path)?;
                    output::print_output(format, &report, format_generate_human)?;
                }
                None => {
                    let entries = generate_seed_corpus(&config)?;
                    println!("{}", serialize_corpus(&entries)?);
                }
            }
            Ok(ExitCode::Success)
        }
        CorpusAction::Verify { path } => {
            let report = verify_file(&path)?;
            output::print_output(format, &report, format_verify_human)?;
            Ok(ExitCode::from_clean(report.is_clean()))
        }
    }
}

pub fn generate_to_file(config: &CorpusConfig, path: &Path) -> anyhow::Result<GenerateReport> {
    let entries = generate_seed_corpus(config)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, serialize_corpus(&entries)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), entries = entries.len(), seed = config.seed, "corpus written");

    Ok(GenerateReport {
        path: path.display().to_string(),
        seed: config.seed,
        per_category: config.per_category,
        entries: entries.len(),
        final_checksum: entries.last().map(|entry| entry.post_op_checksum.clone()),
    })
}

pub fn verify_file(path: &Path) -> anyhow::Result<VerifyReport> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let entries = deserialize_corpus(&data).with_context(|| format!("in {}", path.display()))?;
    let round_trip = deserialize_corpus(&serialize_corpus(&entries)?)? == entries;

    let mut report = VerifyReport {
        path: path.display().to_string(),
        entries: entries.len(),
        categories: count_categories(&entries),
        round_trip,
        final_checksum: None,
        failure: None,
    };
    match replay_corpus(&entries) {
        Ok(doc) => report.final_checksum = Some(doc.document_checksum().checksum),
        // Drift and unreplayable ops are findings, not tool failures.
        Err(error @ (CorpusError::ChecksumDrift { .. } | CorpusError::Apply { .. })) => {
            report.failure = Some(error.to_string());
        }
        Err(error) => return Err(error.into()),
    }
    Ok(report)
}

fn count_categories(entries: &[CorpusEntry]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.category.to_string()).or_insert(0) += 1;
    }
    counts
}

fn format_generate_human(report: &GenerateReport) -> String {
    format!(
        "wrote {} entries to {} (seed {}, {} per category)\nfinal checksum: {}",
        report.entries,
        report.path,
        report.seed,
        report.per_category,
        report.final_checksum.as_deref().unwrap_or("-")
    )
}

fn format_verify_human(report: &VerifyReport) -> String {
    let mut lines = vec![format!("{}: {} entries", report.path, report.entries)];
    lines.extend(
        report.categories.iter().map(|(category, count)| format!("  {category}: {count}")),
    );
    if !report.round_trip {
        lines.push("round-trip: FAILED".to_string());
    }
    match (&report.failure, &report.final_checksum) {
        (Some(failure), _) => lines.push(format!("replay: FAILED ({failure})")),
        (None, Some(checksum)) => lines.push(format!("replay: ok, final checksum {checksum}")),
        (None, None) => lines.push("replay: ok".to_string()),
    }
    lines.join("\n")
}
