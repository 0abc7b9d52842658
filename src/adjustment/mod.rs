//! AdjustmentEngine (§4.7): ticker-rename merging and corporate-action
//! back-adjustment.
//!
//! Grounded in `examples/kov-interest/src/corporate_actions/mod.rs` for the
//! split/reverse-split ratio arithmetic in `Decimal`, generalized from its
//! transaction-cost-basis domain to whole-series back-adjustment, and in
//! `examples/kov-interest/src/tickers/mod.rs` for the rename-chain concept
//! behind `TickerSeriesSpec`.

use crate::error::{PipelineError, Result};
use crate::store::{ActionKind, CorporateAction};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;

/// An ordered chain of historical ticker symbols ending in the current
/// symbol, e.g. `["OLD11", "MID11", "NEW11"]` (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerSeriesSpec {
    pub tickers: Vec<String>,
}

impl TickerSeriesSpec {
    pub fn new(tickers: Vec<String>) -> Self {
        Self { tickers }
    }

    pub fn terminal_ticker(&self) -> Option<&str> {
        self.tickers.last().map(String::as_str)
    }
}

/// One entry of the `funds` array in the historical name-mapping file
/// (§6.3): a bare string is a single-ticker series; an array is a rename
/// chain, oldest first, terminal symbol last.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FundSeriesEntry {
    Single(String),
    Chain(Vec<String>),
}

/// Top-level shape of the name-mapping file: `{"funds": [...]}`. Unknown
/// fields are rejected, matching `EventImportRow`'s `deny_unknown_fields`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FundSeriesFile {
    funds: Vec<FundSeriesEntry>,
}

/// Parse the `{"funds": [ "AAA11", ["OLD11","NEW11"], ... ]}` name-mapping
/// file (§6.3) into one `TickerSeriesSpec` per entry.
pub fn parse_fund_series_file(json: &str) -> Result<Vec<TickerSeriesSpec>> {
    let file: FundSeriesFile = serde_json::from_str(json)
        .map_err(|e| PipelineError::ValidationError(format!("invalid fund series file: {e}")))?;

    file.funds
        .into_iter()
        .map(|entry| {
            let tickers = match entry {
                FundSeriesEntry::Single(t) => vec![t],
                FundSeriesEntry::Chain(chain) => chain,
            };
            if tickers.is_empty() {
                return Err(PipelineError::ValidationError(
                    "fund series entry has no tickers".to_string(),
                ));
            }
            Ok(TickerSeriesSpec::new(tickers))
        })
        .collect()
}

/// One row of an adjusted, merged series, labelled by the terminal ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedQuote {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: i64,
    pub quantity: i64,
    /// Cumulative forward factor applied to get from the raw stored value
    /// to this adjusted row; multiplying `close` by this recovers the raw
    /// close (invariant 4, §8).
    pub cumulative_factor: Decimal,
}

/// A quote row as fetched from the store, prior to merging/adjustment.
pub use crate::parser::QuoteRecord as RawQuote;

/// Merge per-ticker windows into one series labelled by the terminal
/// ticker. Windows are expected disjoint; on overlap (same date present
/// under more than one ticker), the later ticker in `spec` wins, since
/// later entries are inserted after and overwrite the map slot.
pub fn merge_series(spec: &TickerSeriesSpec, per_ticker_rows: &[Vec<RawQuote>]) -> Vec<RawQuote> {
    let mut by_date: BTreeMap<NaiveDate, RawQuote> = BTreeMap::new();
    for rows in per_ticker_rows {
        for row in rows {
            by_date.insert(row.date, row.clone());
        }
    }
    let terminal = spec.terminal_ticker().unwrap_or_default().to_string();
    by_date
        .into_values()
        .map(|mut row| {
            row.ticker = terminal.clone();
            row
        })
        .collect()
}

fn factor_decimal(factor: f64) -> Decimal {
    Decimal::try_from(factor).unwrap_or(Decimal::ONE)
}

/// Back-adjust a date-ascending merged series against `actions` (any action
/// whose ticker belongs to the series; translation into the merged
/// timeline is a no-op since dates are shared across the chain). Walks
/// backward from the most recent row maintaining a cumulative factor F;
/// crossing an action's `effective_date` going backward updates F, applied
/// to every strictly-earlier row (§4.7 step 3).
pub fn back_adjust(merged: &[RawQuote], actions: &[CorporateAction]) -> Vec<AdjustedQuote> {
    let mut sorted_actions: Vec<&CorporateAction> = actions.iter().collect();
    sorted_actions.sort_by(|a, b| b.effective_date.cmp(&a.effective_date));

    let mut rows_desc: Vec<&RawQuote> = merged.iter().collect();
    rows_desc.sort_by(|a, b| b.date.cmp(&a.date));

    let mut action_idx = 0usize;
    let mut f = Decimal::ONE;
    let mut out: Vec<AdjustedQuote> = Vec::with_capacity(rows_desc.len());

    for row in rows_desc {
        while action_idx < sorted_actions.len() && row.date < sorted_actions[action_idx].effective_date {
            let action = sorted_actions[action_idx];
            let k = factor_decimal(action.factor);
            f = match action.kind {
                ActionKind::Split => f * k,
                ActionKind::ReverseSplit => f / k,
            };
            action_idx += 1;
        }

        out.push(AdjustedQuote {
            date: row.date,
            ticker: row.ticker.clone(),
            open: row.open / f,
            high: row.high / f,
            low: row.low / f,
            close: row.close / f,
            volume: row.volume * f,
            trade_count: row.trade_count,
            quantity: (Decimal::from(row.quantity) * f)
                .round()
                .to_i64()
                .unwrap_or(row.quantity),
            cumulative_factor: f,
        });
    }

    out.reverse();
    out
}

/// Full pipeline: merge the series then back-adjust it against the actions
/// supplied (caller fetches rows/actions for every ticker in `spec` and
/// passes them in).
pub fn build_adjusted_series(
    spec: &TickerSeriesSpec,
    per_ticker_rows: &[Vec<RawQuote>],
    actions: &[CorporateAction],
) -> Vec<AdjustedQuote> {
    let merged = merge_series(spec, per_ticker_rows);
    back_adjust(&merged, actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(date: &str, ticker: &str, close: i64) -> RawQuote {
        RawQuote {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            ticker: ticker.to_string(),
            open: Decimal::new(close, 2),
            high: Decimal::new(close, 2),
            low: Decimal::new(close, 2),
            close: Decimal::new(close, 2),
            volume: Decimal::new(close * 100, 2),
            trade_count: 10,
            quantity: 1000,
        }
    }

    /// S3 — 1-for-10 split.
    #[test]
    fn back_adjustment_applies_split_to_earlier_rows_only() {
        let rows = vec![
            raw("2022-08-29", "XYZ11", 10000), // 100.00
            raw("2022-08-30", "XYZ11", 1000),  // 10.00
        ];
        let actions = vec![CorporateAction {
            ticker: "XYZ11".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2022, 8, 30).unwrap(),
            kind: ActionKind::Split,
            factor: 10.0,
        }];
        let adjusted = back_adjust(&rows, &actions);

        assert_eq!(adjusted.len(), 2);
        assert_eq!(adjusted[0].date, NaiveDate::from_ymd_opt(2022, 8, 29).unwrap());
        assert_eq!(adjusted[0].close, dec!(10.00));
        assert_eq!(adjusted[1].date, NaiveDate::from_ymd_opt(2022, 8, 30).unwrap());
        assert_eq!(adjusted[1].close, dec!(10.00)); // unchanged
    }

    #[test]
    fn reverse_split_scales_earlier_rows_up() {
        let rows = vec![
            raw("2022-08-29", "XYZ11", 100), // 1.00
            raw("2022-08-30", "XYZ11", 1000), // 10.00 post reverse-split
        ];
        let actions = vec![CorporateAction {
            ticker: "XYZ11".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2022, 8, 30).unwrap(),
            kind: ActionKind::ReverseSplit,
            factor: 10.0,
        }];
        let adjusted = back_adjust(&rows, &actions);
        assert_eq!(adjusted[0].close, dec!(10.00)); // 1.00 * 10
        assert_eq!(adjusted[1].close, dec!(10.00));
    }

    /// Invariant 4: adjusted close * cumulative forward factor recovers raw close.
    #[test]
    fn cumulative_factor_recovers_raw_close() {
        let rows = vec![
            raw("2022-08-29", "XYZ11", 10000),
            raw("2022-08-30", "XYZ11", 1000),
        ];
        let actions = vec![CorporateAction {
            ticker: "XYZ11".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2022, 8, 30).unwrap(),
            kind: ActionKind::Split,
            factor: 10.0,
        }];
        let adjusted = back_adjust(&rows, &actions);
        for (row, adj) in rows.iter().zip(adjusted.iter()) {
            assert_eq!(adj.close * adj.cumulative_factor, row.close);
        }
    }

    /// S4 — ticker rename merge.
    #[test]
    fn merge_series_concatenates_disjoint_windows_labelled_by_terminal_ticker() {
        let spec = TickerSeriesSpec::new(vec!["OLD11".to_string(), "NEW11".to_string()]);
        let old_rows: Vec<RawQuote> = vec![
            raw("2020-01-02", "OLD11", 1000),
            raw("2020-06-30", "OLD11", 1100),
        ];
        let new_rows: Vec<RawQuote> = vec![
            raw("2020-07-01", "NEW11", 1200),
            raw("2020-12-31", "NEW11", 1300),
        ];
        let merged = merge_series(&spec, &[old_rows, new_rows]);

        assert_eq!(merged.len(), 4);
        assert!(merged.iter().all(|r| r.ticker == "NEW11"));
        assert_eq!(merged[0].date, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(merged[3].date, NaiveDate::from_ymd_opt(2020, 12, 31).unwrap());
        for w in merged.windows(2) {
            assert!(w[0].date < w[1].date);
        }
    }

    #[test]
    fn overlap_is_won_by_later_ticker_in_spec_order() {
        let spec = TickerSeriesSpec::new(vec!["OLD11".to_string(), "NEW11".to_string()]);
        let old_rows = vec![raw("2020-07-01", "OLD11", 1000)];
        let new_rows = vec![raw("2020-07-01", "NEW11", 9999)];
        let merged = merge_series(&spec, &[old_rows, new_rows]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].close, dec!(9999.00));
    }

    #[test]
    fn no_actions_leaves_series_unadjusted() {
        let rows = vec![raw("2025-03-18", "ABCD11", 1050)];
        let adjusted = back_adjust(&rows, &[]);
        assert_eq!(adjusted[0].close, dec!(10.50));
        assert_eq!(adjusted[0].cumulative_factor, Decimal::ONE);
    }

    #[test]
    fn fund_series_file_parses_bare_strings_as_single_ticker_chains() {
        let json = r#"{"funds": ["AAA11"]}"#;
        let specs = parse_fund_series_file(json).unwrap();
        assert_eq!(specs, vec![TickerSeriesSpec::new(vec!["AAA11".to_string()])]);
    }

    #[test]
    fn fund_series_file_parses_arrays_as_rename_chains() {
        let json = r#"{"funds": [["OLD11", "MID11", "NEW11"]]}"#;
        let specs = parse_fund_series_file(json).unwrap();
        assert_eq!(
            specs,
            vec![TickerSeriesSpec::new(vec![
                "OLD11".to_string(),
                "MID11".to_string(),
                "NEW11".to_string()
            ])]
        );
        assert_eq!(specs[0].terminal_ticker(), Some("NEW11"));
    }

    #[test]
    fn fund_series_file_mixes_bare_strings_and_chains() {
        let json = r#"{"funds": ["AAA11", ["OLD11", "NEW11"]]}"#;
        let specs = parse_fund_series_file(json).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].terminal_ticker(), Some("AAA11"));
        assert_eq!(specs[1].terminal_ticker(), Some("NEW11"));
    }

    #[test]
    fn fund_series_file_rejects_unknown_top_level_fields() {
        let json = r#"{"funds": ["AAA11"], "extra": true}"#;
        assert!(parse_fund_series_file(json).is_err());
    }

    #[test]
    fn fund_series_file_rejects_malformed_json() {
        assert!(parse_fund_series_file("not json").is_err());
    }
}
