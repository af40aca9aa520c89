// CLI subcommand dispatch.

use std::path::Path;

use anyhow::Context;
use clap::Subcommand;

use scriptum_integrity::config::IntegrityConfig;
use scriptum_integrity::hash::HashEngine;

use crate::exit_code::ExitCode;
use crate::output::OutputFormat;

pub mod checksum;
pub mod corpus;
pub mod scan;

#[derive(Subcommand)]
pub enum Command {
    /// Canonicalize a JSON document tree and print its checksum
    Checksum(checksum::ChecksumArgs),
    /// Verify annotation anchors in a document snapshot
    Scan(scan::ScanArgs),
    /// Generate or verify a conformance corpus
    Corpus(corpus::CorpusArgs),
}

pub fn run(
    cmd: Command,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    match cmd {
        Command::Checksum(args) => checksum::run(args, &config, format),
        Command::Scan(args) => scan::run(args, &config, format),
        Command::Corpus(args) => corpus::run(args, format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<IntegrityConfig> {
    match path {
        Some(path) => IntegrityConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => IntegrityConfig::load().context("failed to load integrity config"),
    }
}

pub(crate) fn engine_for(config: &IntegrityConfig) -> anyhow::Result<HashEngine> {
    HashEngine::from_config(&config.hash).context("hash backend rejected by config")
}
