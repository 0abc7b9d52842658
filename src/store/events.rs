//! EventStore (§4.6): CRUD over `CorporateAction` plus bulk import from the
//! JSON event file (§6.3). Owned by an administrative flow, not the ingest
//! path (§3).
//!
//! Validation mirrors `examples/kov-interest/src/corporate_actions/mod.rs`'s
//! ratio/kind checks, generalized from its transaction-cost-basis domain to
//! series back-adjustment events.

use crate::error::{PipelineError, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Split,
    ReverseSplit,
}

impl ActionKind {
    fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Split => "split",
            ActionKind::ReverseSplit => "reverse_split",
        }
    }
}

impl FromStr for ActionKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "split" => Ok(ActionKind::Split),
            "reverse_split" => Ok(ActionKind::ReverseSplit),
            other => Err(PipelineError::ValidationError(format!("unknown corporate action kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorporateAction {
    pub ticker: String,
    pub effective_date: NaiveDate,
    pub kind: ActionKind,
    pub factor: f64,
}

impl CorporateAction {
    fn validate(&self) -> Result<()> {
        if self.factor <= 0.0 {
            return Err(PipelineError::ValidationError(format!(
                "factor must be > 0, got {} for {} {}",
                self.factor, self.ticker, self.effective_date
            )));
        }
        Ok(())
    }
}

/// One row of the JSON event-import file (§6.3): `{ticker, kind,
/// effective_date, factor}`. Unknown fields are rejected by `deny_unknown_fields`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventImportRow {
    pub ticker: String,
    pub kind: String,
    pub effective_date: String,
    pub factor: f64,
}

/// Outcome of a bulk import: how many rows were inserted, ignored as exact
/// duplicates, or skipped for conflicting with an existing factor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOutcome {
    pub inserted: usize,
    pub duplicate_ignored: usize,
    pub conflicts: Vec<String>,
}

pub struct EventStore<'a> {
    conn: &'a Connection,
}

impl<'a> EventStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn add(&self, action: &CorporateAction) -> Result<()> {
        action.validate()?;
        let ticker = action.ticker.to_uppercase();
        self.conn.execute(
            "INSERT INTO corporate_actions (ticker, effective_date, kind, factor, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ticker, effective_date, kind) DO UPDATE SET factor = excluded.factor",
            params![
                ticker,
                action.effective_date.to_string(),
                action.kind.as_str(),
                action.factor,
                Utc::now().naive_utc().to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn list(&self, ticker: Option<&str>, date_from: Option<NaiveDate>, date_to: Option<NaiveDate>) -> Result<Vec<CorporateAction>> {
        let mut sql = String::from(
            "SELECT ticker, effective_date, kind, factor FROM corporate_actions WHERE 1=1",
        );
        let mut clauses: Vec<String> = Vec::new();
        if ticker.is_some() {
            clauses.push("ticker = ?".to_string());
        }
        if date_from.is_some() {
            clauses.push("effective_date >= ?".to_string());
        }
        if date_to.is_some() {
            clauses.push("effective_date <= ?".to_string());
        }
        for clause in &clauses {
            sql.push_str(" AND ");
            sql.push_str(clause);
        }
        sql.push_str(" ORDER BY ticker, effective_date");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut bound: Vec<String> = Vec::new();
        if let Some(t) = ticker {
            bound.push(t.to_uppercase());
        }
        if let Some(d) = date_from {
            bound.push(d.to_string());
        }
        if let Some(d) = date_to {
            bound.push(d.to_string());
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let ticker: String = row.get(0)?;
                let date_str: String = row.get(1)?;
                let kind_str: String = row.get(2)?;
                let factor: f64 = row.get(3)?;
                Ok((ticker, date_str, kind_str, factor))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(ticker, date_str, kind_str, factor)| {
                Some(CorporateAction {
                    ticker,
                    effective_date: NaiveDate::from_str(&date_str).ok()?,
                    kind: ActionKind::from_str(&kind_str).ok()?,
                    factor,
                })
            })
            .collect())
    }

    fn existing_factor(&self, ticker: &str, effective_date: NaiveDate, kind: ActionKind) -> Result<Option<f64>> {
        let factor: Option<f64> = self
            .conn
            .query_row(
                "SELECT factor FROM corporate_actions WHERE ticker = ?1 AND effective_date = ?2 AND kind = ?3",
                params![ticker, effective_date.to_string(), kind.as_str()],
                |row| row.get(0),
            )
            .ok();
        Ok(factor)
    }

    /// Bulk import rows per §4.6/§6.3: unknown fields are rejected at parse
    /// time (serde `deny_unknown_fields`); duplicates with the same factor
    /// are ignored; duplicates with a conflicting factor are reported and
    /// skipped, never overwritten.
    pub fn import_rows(&self, rows: &[EventImportRow]) -> Result<ImportOutcome> {
        let mut outcome = ImportOutcome::default();

        for row in rows {
            let kind = match ActionKind::from_str(&row.kind) {
                Ok(k) => k,
                Err(e) => {
                    outcome.conflicts.push(format!("{}: {e}", row.ticker));
                    continue;
                }
            };
            let effective_date = match NaiveDate::parse_from_str(&row.effective_date, "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) => {
                    outcome
                        .conflicts
                        .push(format!("{}: unparseable date {}", row.ticker, row.effective_date));
                    continue;
                }
            };
            let ticker = row.ticker.to_uppercase();

            let action = CorporateAction {
                ticker: ticker.clone(),
                effective_date,
                kind,
                factor: row.factor,
            };
            if let Err(e) = action.validate() {
                outcome.conflicts.push(format!("{ticker}: {e}"));
                continue;
            }

            match self.existing_factor(&ticker, effective_date, kind)? {
                None => {
                    self.add(&action)?;
                    outcome.inserted += 1;
                }
                Some(existing) if (existing - row.factor).abs() < f64::EPSILON => {
                    outcome.duplicate_ignored += 1;
                }
                Some(existing) => {
                    outcome.conflicts.push(format!(
                        "{ticker} {effective_date} {}: existing factor {existing} conflicts with {}",
                        kind.as_str(),
                        row.factor
                    ));
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn add_rejects_nonpositive_factor() {
        let conn = db::open_in_memory(5).unwrap();
        let store = EventStore::new(&conn);
        let action = CorporateAction {
            ticker: "XYZ11".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2022, 8, 30).unwrap(),
            kind: ActionKind::Split,
            factor: 0.0,
        };
        assert!(store.add(&action).is_err());
    }

    #[test]
    fn ticker_is_uppercased_on_add() {
        let conn = db::open_in_memory(5).unwrap();
        let store = EventStore::new(&conn);
        let action = CorporateAction {
            ticker: "xyz11".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2022, 8, 30).unwrap(),
            kind: ActionKind::Split,
            factor: 10.0,
        };
        store.add(&action).unwrap();
        let listed = store.list(Some("XYZ11"), None, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].ticker, "XYZ11");
    }

    #[test]
    fn import_ignores_exact_duplicate_and_reports_conflict() {
        let conn = db::open_in_memory(5).unwrap();
        let store = EventStore::new(&conn);
        let rows = vec![
            EventImportRow {
                ticker: "XYZ11".to_string(),
                kind: "split".to_string(),
                effective_date: "2022-08-30".to_string(),
                factor: 10.0,
            },
            EventImportRow {
                ticker: "XYZ11".to_string(),
                kind: "split".to_string(),
                effective_date: "2022-08-30".to_string(),
                factor: 10.0,
            },
            EventImportRow {
                ticker: "XYZ11".to_string(),
                kind: "split".to_string(),
                effective_date: "2022-08-30".to_string(),
                factor: 5.0,
            },
        ];
        let outcome = store.import_rows(&rows).unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.duplicate_ignored, 1);
        assert_eq!(outcome.conflicts.len(), 1);
    }

    #[test]
    fn import_rejects_bad_kind_as_conflict_not_panic() {
        let conn = db::open_in_memory(5).unwrap();
        let store = EventStore::new(&conn);
        let rows = vec![EventImportRow {
            ticker: "XYZ11".to_string(),
            kind: "triple_split".to_string(),
            effective_date: "2022-08-30".to_string(),
            factor: 3.0,
        }];
        let outcome = store.import_rows(&rows).unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.conflicts.len(), 1);
    }

    #[test]
    fn list_filters_by_ticker_and_date_range() {
        let conn = db::open_in_memory(5).unwrap();
        let store = EventStore::new(&conn);
        store
            .add(&CorporateAction {
                ticker: "AAA11".to_string(),
                effective_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                kind: ActionKind::Split,
                factor: 2.0,
            })
            .unwrap();
        store
            .add(&CorporateAction {
                ticker: "BBB11".to_string(),
                effective_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                kind: ActionKind::ReverseSplit,
                factor: 4.0,
            })
            .unwrap();

        let only_aaa = store.list(Some("AAA11"), None, None).unwrap();
        assert_eq!(only_aaa.len(), 1);
        assert_eq!(only_aaa[0].ticker, "AAA11");

        let in_2021 = store
            .list(
                None,
                Some(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()),
                Some(NaiveDate::from_ymd_opt(2021, 12, 31).unwrap()),
            )
            .unwrap();
        assert_eq!(in_2021.len(), 1);
        assert_eq!(in_2021[0].ticker, "BBB11");
    }
}
