//! FileLedger (§4.3): idempotent record of which archives have been
//! processed, keyed by content hash of the compressed bytes.
//!
//! Grounded in `examples/kov-interest/src/importers/b3_cotahist.rs`'s
//! conditional-fetch bookkeeping idiom (it tracks a last-modified marker per
//! year to skip unchanged archives); here the marker is a content hash
//! rather than a timestamp, matching §3's `FileLedgerEntry`.

use crate::error::Result;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Archive kind, persisted as a short lowercase tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKindTag {
    Daily,
    Monthly,
    Yearly,
}

impl ArchiveKindTag {
    fn as_str(&self) -> &'static str {
        match self {
            ArchiveKindTag::Daily => "daily",
            ArchiveKindTag::Monthly => "monthly",
            ArchiveKindTag::Yearly => "yearly",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ArchiveKindTag::Daily),
            "monthly" => Some(ArchiveKindTag::Monthly),
            "yearly" => Some(ArchiveKindTag::Yearly),
            _ => None,
        }
    }
}

impl From<crate::parser::ArchiveKind> for ArchiveKindTag {
    fn from(kind: crate::parser::ArchiveKind) -> Self {
        match kind {
            crate::parser::ArchiveKind::Daily => ArchiveKindTag::Daily,
            crate::parser::ArchiveKind::Monthly => ArchiveKindTag::Monthly,
            crate::parser::ArchiveKind::Yearly => ArchiveKindTag::Yearly,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileLedgerEntry {
    pub archive_name: String,
    pub kind: ArchiveKindTag,
    pub processed_at: NaiveDateTime,
    pub rows_inserted: i64,
    pub content_hash: String,
}

/// Verdict from comparing a freshly computed hash against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedVerdict {
    Unseen,
    Unchanged,
    Modified,
}

pub struct FileLedger<'a> {
    conn: &'a Connection,
}

impl<'a> FileLedger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn is_processed(&self, archive_name: &str, current_hash: &str) -> Result<ProcessedVerdict> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT content_hash FROM files_processed WHERE archive_name = ?1",
                params![archive_name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match existing {
            None => ProcessedVerdict::Unseen,
            Some(hash) if hash == current_hash => ProcessedVerdict::Unchanged,
            Some(_) => ProcessedVerdict::Modified,
        })
    }

    /// Upsert a ledger entry, stamping `processed_at` with the current time.
    pub fn record(
        &self,
        archive_name: &str,
        kind: ArchiveKindTag,
        rows_inserted: i64,
        content_hash: &str,
    ) -> Result<()> {
        self.record_at(archive_name, kind, rows_inserted, content_hash, Utc::now().naive_utc())
    }

    pub fn record_at(
        &self,
        archive_name: &str,
        kind: ArchiveKindTag,
        rows_inserted: i64,
        content_hash: &str,
        processed_at: NaiveDateTime,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files_processed (archive_name, kind, processed_at, rows_added, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(archive_name) DO UPDATE SET
                kind = excluded.kind,
                processed_at = excluded.processed_at,
                rows_added = excluded.rows_added,
                content_hash = excluded.content_hash",
            params![
                archive_name,
                kind.as_str(),
                processed_at.to_string(),
                rows_inserted,
                content_hash,
            ],
        )?;
        Ok(())
    }

    pub fn list_processed(&self) -> Result<Vec<FileLedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT archive_name, kind, processed_at, rows_added, content_hash FROM files_processed ORDER BY archive_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let kind_str: String = row.get(1)?;
                let processed_at_str: String = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    kind_str,
                    processed_at_str,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(archive_name, kind_str, processed_at_str, rows_inserted, content_hash)| {
                Some(FileLedgerEntry {
                    archive_name,
                    kind: ArchiveKindTag::from_str(&kind_str)?,
                    processed_at: NaiveDateTime::parse_from_str(&processed_at_str, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()?,
                    rows_inserted,
                    content_hash,
                })
            })
            .collect())
    }

    /// Administrative: drop an entry so the archive is reprocessed as `unseen`.
    pub fn forget(&self, archive_name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM files_processed WHERE archive_name = ?1", params![archive_name])?;
        Ok(())
    }
}
