// `scriptum-verify checksum`: canonicalize a document tree and print its
// Tier 2 checksum.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::warn;

use scriptum_common::canon::canonicalize_bytes;
use scriptum_common::types::BlockDigestEntry;
use scriptum_integrity::config::IntegrityConfig;
use scriptum_integrity::hash::HashEngine;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ChecksumArgs {
    /// JSON document tree. Non-JSON input is checksummed as one paragraph.
    path: PathBuf,

    /// Include every block digest in document order.
    #[arg(long)]
    digests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumReport {
    pub path: String,
    pub backend: String,
    pub checksum: String,
    pub block_count: usize,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digests: Option<Vec<BlockDigestEntry>>,
}

pub fn run(
    args: ChecksumArgs,
    config: &IntegrityConfig,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let engine = super::engine_for(config)?;
    let report = checksum_file(&engine, &args.path, args.digests)?;
    if report.truncated {
        output::print_warning(
            format,
            "TRUNCATED",
            "document exceeded the nesting limit; deeper subtrees were dropped",
        );
    }
    output::print_output(format, &report, format_human)?;
    Ok(ExitCode::Success)
}

pub fn checksum_file(
    engine: &HashEngine,
    path: &Path,
    with_digests: bool,
) -> anyhow::Result<ChecksumReport> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let outcome = canonicalize_bytes(&data);
    if outcome.truncated {
        warn!(
            path = %path.display(),
            blocks = outcome.block_count,
            "canonicalization hit the depth cap"
        );
    }
    let checksum = engine.compute_document_checksum_from_canon(&outcome.root);
    Ok(ChecksumReport {
        path: path.display().to_string(),
        backend: engine.backend().to_string(),
        checksum: checksum.checksum,
        block_count: outcome.block_count,
        truncated: outcome.truncated,
        digests: with_digests.then_some(checksum.digests),
    })
}

fn format_human(report: &ChecksumReport) -> String {
    let mut lines = vec![
        format!("{}  {}", report.checksum, report.path),
        format!("backend: {}, blocks: {}", report.backend, report.block_count),
    ];
    if let Some(digests) = &report.digests {
        lines.extend(digests.iter().map(|entry| format!("  {}  {}", entry.digest, entry.block_id)));
    }
    lines.join("\n")
}
