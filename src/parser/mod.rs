//! Fixed-width COTAHIST-style record parser and archive classification.
//!
//! Grounded in `importers/b3_cotahist.rs`'s `parse_cotahist_line` (identical
//! fixed-width layout), generalized to the fuller field set named in the
//! spec (trade count, traded quantity) and to chunked parallel parsing via
//! `rayon` for yearly/monthly archives.

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;

/// A decoded quote line. Identified by (date, ticker); immutable once
/// inserted into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: i64,
    pub quantity: i64,
}

/// Archive classification derived from the filename pattern (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Daily,
    Monthly,
    Yearly,
}

/// A classified archive: its kind and the date range it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveInfo {
    pub kind: ArchiveKind,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

/// Classify an archive filename, e.g. `COTAHIST_D18032025.ZIP`,
/// `COTAHIST_M032025.ZIP`, `COTAHIST_A2025.ZIP`.
///
/// Monthly/yearly ranges are expanded to calendar month/year bounds here;
/// callers that need business-day-trimmed bounds should intersect with a
/// `CalendarOracle` (see `crate::calendar::month_business_range` /
/// `year_business_range`).
pub fn classify_archive(filename: &str) -> Option<ArchiveInfo> {
    let stem = filename.strip_suffix(".ZIP").or_else(|| filename.strip_suffix(".zip"))?;
    let marker = stem.rfind("COTAHIST_")?;
    let rest = &stem[marker + "COTAHIST_".len()..];
    let (kind_char, digits) = rest.split_at(1);

    match kind_char {
        "D" => {
            if digits.len() != 8 {
                return None;
            }
            let date = NaiveDate::parse_from_str(digits, "%d%m%Y").ok()?;
            Some(ArchiveInfo {
                kind: ArchiveKind::Daily,
                date_from: date,
                date_to: date,
            })
        }
        "M" => {
            if digits.len() != 6 {
                return None;
            }
            let month: u32 = digits[0..2].parse().ok()?;
            let year: i32 = digits[2..6].parse().ok()?;
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            let next_month_first = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)
            }?;
            let last = next_month_first.pred_opt()?;
            Some(ArchiveInfo {
                kind: ArchiveKind::Monthly,
                date_from: first,
                date_to: last,
            })
        }
        "A" => {
            if digits.len() != 4 {
                return None;
            }
            let year: i32 = digits.parse().ok()?;
            Some(ArchiveInfo {
                kind: ArchiveKind::Yearly,
                date_from: NaiveDate::from_ymd_opt(year, 1, 1)?,
                date_to: NaiveDate::from_ymd_opt(year, 12, 31)?,
            })
        }
        _ => None,
    }
}

const MARKET_RECORD_TYPE: &str = "01";
const FUND_TICKER_CLASS: &str = "12";

/// Count of lines skipped during a parse, broken down by why.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub malformed: usize,
    pub not_fund_class: usize,
}

impl ParseStats {
    pub fn total_skipped(&self) -> usize {
        self.malformed + self.not_fund_class
    }
}

/// Result of parsing a chunk or whole file: the records emitted plus skip
/// counters. Never aborts on a bad line (§4.1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub records: Vec<QuoteRecord>,
    pub stats: ParseStats,
}

impl ParseOutcome {
    fn merge(mut self, other: ParseOutcome) -> ParseOutcome {
        self.records.extend(other.records);
        self.stats.malformed += other.stats.malformed;
        self.stats.not_fund_class += other.stats.not_fund_class;
        self
    }
}

/// Decode an ISO-8859-1 (Latin-1) byte slice into a `String`: every byte
/// maps directly to the Unicode code point of the same value (§6.1:
/// "single-byte Western (ISO-8859-1-compatible)"). Applied per extracted
/// field rather than over the whole line, so a byte ≥ 0x80 anywhere in the
/// file can never shift a later field's byte offset or split a multi-byte
/// UTF-8 sequence mid-character.
fn decode_latin1_field(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Parse a single fixed-width 1-indexed-offset line per §4.1. Returns
/// `Ok(None)` (counted) for any skip condition; never returns `Err` — a
/// malformed line is a skip, not a failure, and malformed-ness is reported
/// via the `bool` in the second element of the tuple. Operates on the raw
/// line bytes so offsets are always byte offsets, matching §4.1's
/// byte-range field layout exactly.
fn parse_line(line: &[u8]) -> (Option<QuoteRecord>, bool /* malformed */) {
    // Offsets below are 0-indexed equivalents of the 1-indexed byte ranges in §4.1.
    if line.len() < 188 {
        return (None, true);
    }

    if &line[0..2] != MARKET_RECORD_TYPE.as_bytes() {
        return (None, false);
    }
    if &line[10..12] != FUND_TICKER_CLASS.as_bytes() {
        return (None, false);
    }

    let date = match NaiveDate::parse_from_str(&decode_latin1_field(&line[2..10]), "%Y%m%d") {
        Ok(d) => d,
        Err(_) => return (None, true),
    };

    let ticker = decode_latin1_field(&line[12..24]).trim().to_string();
    if ticker.is_empty() {
        return (None, true);
    }

    let parse_scaled = |bytes: &[u8]| -> Option<Decimal> {
        let v: i64 = decode_latin1_field(bytes).trim().parse().ok()?;
        if v < 0 {
            return None;
        }
        Some(Decimal::new(v, 2))
    };

    let open = match parse_scaled(&line[56..69]) {
        Some(v) => v,
        None => return (None, true),
    };
    let high = match parse_scaled(&line[69..82]) {
        Some(v) => v,
        None => return (None, true),
    };
    let low = match parse_scaled(&line[82..95]) {
        Some(v) => v,
        None => return (None, true),
    };
    let close = match parse_scaled(&line[108..121]) {
        Some(v) => v,
        None => return (None, true),
    };

    let trade_count: i64 = match decode_latin1_field(&line[147..152]).trim().parse() {
        Ok(v) if v >= 0 => v,
        _ => return (None, true),
    };
    let quantity: i64 = match decode_latin1_field(&line[152..170]).trim().parse() {
        Ok(v) if v >= 0 => v,
        _ => return (None, true),
    };
    let volume = match parse_scaled(&line[170..188]) {
        Some(v) => v,
        None => return (None, true),
    };

    (
        Some(QuoteRecord {
            date,
            ticker,
            open,
            high,
            low,
            close,
            volume,
            trade_count,
            quantity,
        }),
        false,
    )
}

fn parse_lines<'a>(lines: impl Iterator<Item = &'a [u8]>) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for line in lines {
        match parse_line(line) {
            (Some(record), _) => outcome.records.push(record),
            (None, true) => outcome.stats.malformed += 1,
            (None, false) => outcome.stats.not_fund_class += 1,
        }
    }
    outcome
}

/// Split raw archive bytes into newline-terminated lines, stripping a
/// trailing `\r` from each and dropping the final empty segment produced by
/// a trailing newline — matching `str::lines()`'s semantics but over bytes,
/// so a line is never required to be valid UTF-8 before it can be sliced.
fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
    if matches!(lines.last(), Some(&last) if last.is_empty()) {
        lines.pop();
    }
    lines
        .into_iter()
        .map(|line| match line.last() {
            Some(b'\r') => &line[..line.len() - 1],
            _ => line,
        })
        .collect()
}

/// Approximate lines per chunk for parallel fan-out (§4.1).
pub const DEFAULT_CHUNK_LINES: usize = 100_000;

/// Parse `bytes` single-threaded. Used for daily (or otherwise small)
/// archives, where chunking overhead outweighs the benefit.
pub fn parse_single_threaded(bytes: &[u8]) -> ParseOutcome {
    parse_lines(split_lines(bytes).into_iter())
}

/// Parse `bytes` by splitting into line-aligned chunks of ~`chunk_lines` and
/// fanning them out to a rayon thread pool. Order of returned records is
/// irrelevant — the store deduplicates on (date, ticker) — so chunks are
/// merged in whatever order they complete.
pub fn parse_parallel(bytes: &[u8], chunk_lines: usize) -> ParseOutcome {
    let chunk_lines = chunk_lines.max(1);
    let all_lines: Vec<&[u8]> = split_lines(bytes);

    all_lines
        .par_chunks(chunk_lines)
        .map(parse_lines_from_slice)
        .reduce(ParseOutcome::default, ParseOutcome::merge)
}

fn parse_lines_from_slice(lines: &[&[u8]]) -> ParseOutcome {
    parse_lines(lines.iter().copied())
}

/// Parse `bytes`, choosing single-threaded vs. chunked-parallel based on
/// archive kind per §4.1 (daily archives are parsed single-threaded; larger
/// archives are chunked).
pub fn parse_archive_text(bytes: &[u8], kind: ArchiveKind, workers_hint: usize) -> ParseOutcome {
    match kind {
        ArchiveKind::Daily => parse_single_threaded(bytes),
        ArchiveKind::Monthly | ArchiveKind::Yearly => {
            if workers_hint <= 1 {
                parse_single_threaded(bytes)
            } else {
                parse_parallel(bytes, DEFAULT_CHUNK_LINES)
            }
        }
    }
}
