//! Ingestor (§4.5): orchestrates discover → extract → parse → insert →
//! record for each archive.
//!
//! The extract-retry loop and "leave the ledger untouched on a mid-archive
//! failure" behavior follow `examples/kov-interest/src/importers/b3_cotahist.rs`'s
//! own download/import flow, which never partially commits a ledger entry
//! for an archive it failed to fully process.

use crate::cache::Cache;
use crate::config::PipelineConfig;
use crate::db;
use crate::error::{PipelineError, Result};
use crate::hash::content_hash_of_file;
use crate::parser::{self, ArchiveInfo};
use crate::store::{ArchiveKindTag, FileLedger, ProcessedVerdict, QuoteStore};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Per-archive outcome, aggregated into a `RunSummary` by the directory-wide
/// entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    Processed { rows_inserted: i64 },
    SkippedUnchanged,
    Failed { reason: String },
}

/// Ambient addition (§3 SPEC_FULL): aggregates per-archive outcomes of one
/// ingest run so the exit-code rule in §7 ("non-zero only when nothing in
/// the batch succeeded and at least one was attempted") can be evaluated
/// without re-deriving it from logs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    pub unchanged: usize,
    pub rows_inserted: i64,
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.processed + self.unchanged + self.failed.len()
    }

    /// §7: non-zero exit only when nothing succeeded and something was attempted.
    pub fn is_total_failure(&self) -> bool {
        self.attempted() > 0 && self.processed == 0 && self.unchanged == 0
    }
}

/// Extract the sole member of a COTAHIST-style ZIP archive as raw bytes,
/// with `extract_retries` attempts and `extract_retry_delay` between them
/// (§4.5 step 3). Decoding stays ISO-8859-1 (Latin-1) per §6.1, but is
/// applied by the parser per fixed-width field rather than over the whole
/// buffer, so a byte ≥ 0x80 anywhere in the file can never shift a later
/// field's byte offset.
fn extract_archive_bytes(archive_path: &Path, retries: u32, retry_delay: Duration) -> Result<Vec<u8>> {
    let mut attempt = 0u32;
    loop {
        match try_extract(archive_path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if attempt >= retries {
                    return Err(e);
                }
                thread::sleep(retry_delay);
                attempt += 1;
            }
        }
    }
}

fn try_extract(archive_path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(archive_path)?;
    let mut zip = zip::ZipArchive::new(file)?;
    if zip.is_empty() {
        return Err(PipelineError::IntegrityViolation(format!(
            "{} has no members",
            archive_path.display()
        )));
    }
    let mut member = zip.by_index(0)?;
    let mut buf = Vec::new();
    std::io::Read::read_to_end(&mut member, &mut buf)?;
    Ok(buf)
}

pub struct Ingestor<'a> {
    conn: &'a rusqlite::Connection,
    config: &'a PipelineConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(conn: &'a rusqlite::Connection, config: &'a PipelineConfig) -> Self {
        Self { conn, config }
    }

    /// Process a single archive per the ten steps of §4.5.
    pub fn ingest_archive(
        &self,
        archive_path: &Path,
        archive_name: &str,
        cache: &mut Cache,
        workers_hint: usize,
    ) -> Result<ArchiveOutcome> {
        let ledger = FileLedger::new(self.conn);
        let quote_store = QuoteStore::new(self.conn);

        // 1. Hash the compressed bytes.
        let hash = content_hash_of_file(archive_path)?;

        // 2. Consult the ledger.
        let verdict = ledger.is_processed(archive_name, &hash)?;
        if verdict == ProcessedVerdict::Unchanged {
            let info = parser::classify_archive(archive_name);
            let kind_tag = info.map(|i| i.kind.into()).unwrap_or(ArchiveKindTag::Daily);
            ledger.record(archive_name, kind_tag, 0, &hash)?;
            return Ok(ArchiveOutcome::SkippedUnchanged);
        }

        // 3. Extract.
        let bytes = extract_archive_bytes(
            archive_path,
            self.config.extract_retries,
            Duration::from_millis(self.config.extract_retry_delay_ms),
        )?;

        // 4. Classify.
        let info: ArchiveInfo = parser::classify_archive(archive_name)
            .ok_or_else(|| PipelineError::ValidationError(format!("unrecognized archive name: {archive_name}")))?;

        // 5. Delete superseded rows if modified.
        if verdict == ProcessedVerdict::Modified {
            quote_store.delete_range(info.date_from, info.date_to, Some(cache))?;
        }

        // 6. Parse (single-threaded for daily, chunked-parallel otherwise).
        let outcome = parser::parse_archive_text(&bytes, info.kind, workers_hint);
        if outcome.stats.total_skipped() > 0 {
            tracing::warn!(
                channel = "ingest",
                archive_name,
                malformed = outcome.stats.malformed,
                not_fund_class = outcome.stats.not_fund_class,
                "skipped lines while parsing archive"
            );
        }

        // 7. Insert.
        let batch_size = crate::store::quotes::select_batch_size(
            outcome.records.len(),
            64,
            self.config.db_lote_size_small,
            self.config.db_lote_size_medium,
            self.config.db_lote_size_large,
            self.config.db_lote_max_bytes,
        );
        let rows_inserted = quote_store.bulk_insert(&outcome.records, batch_size, Some(cache))?;

        // 8. Record.
        ledger.record(archive_name, info.kind.into(), rows_inserted, &hash)?;

        // 9. The extracted bytes lived only in memory here; nothing on disk to delete.

        // 10. Already invalidated by step 5/7's cache-aware calls.

        Ok(ArchiveOutcome::Processed { rows_inserted })
    }

    /// Discover and process every archive in `dir`, in chronological order
    /// of the archive's date range (§5). Archives whose name doesn't
    /// classify are skipped with a failure entry rather than aborting the
    /// run.
    pub fn ingest_directory(&self, dir: &Path, cache: &mut Cache, workers_hint: usize) -> Result<RunSummary> {
        let mut entries: Vec<(String, std::path::PathBuf, ArchiveInfo)> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let info = parser::classify_archive(&name)?;
                Some((name, e.path(), info))
            })
            .collect();
        entries.sort_by_key(|(_, _, info)| info.date_from);

        let mut summary = RunSummary::default();
        for (name, path, _info) in entries {
            match self.ingest_archive(&path, &name, cache, workers_hint) {
                Ok(ArchiveOutcome::Processed { rows_inserted }) => {
                    summary.processed += 1;
                    summary.rows_inserted += rows_inserted;
                }
                Ok(ArchiveOutcome::SkippedUnchanged) => summary.unchanged += 1,
                Ok(ArchiveOutcome::Failed { reason }) => summary.failed.push((name, reason)),
                Err(e) => {
                    tracing::error!(channel = "ingest", archive_name = %name, error = %e, "archive failed");
                    summary.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(summary)
    }
}
