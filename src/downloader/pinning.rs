//! Certificate pin storage and rotation tolerance (§4.2 / §9 open question).
//!
//! Persists one fingerprint per host to a small JSON file alongside a
//! plain-text append-only history log of every mismatch or rotation, so an
//! operator can audit what changed. The open question of how strict a pin
//! mismatch should be is resolved as a config flag (`strict_cert_pinning`,
//! default `false`) rather than hard failure, matching `PipelineConfig`'s
//! documented default.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PinRecord {
    fingerprint: String,
    first_seen: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PinFile {
    hosts: HashMap<String, PinRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinCheckResult {
    FirstSeen,
    Match,
    /// Fingerprint changed, but within `cert_rotation_days` of the last
    /// recorded rotation — accepted silently (logged, not rejected).
    AcceptedRotation,
    Mismatch,
}

/// A single line of the append-only pin-history log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinHistoryEntry {
    pub host: String,
    pub fingerprint: String,
    pub date: NaiveDate,
}

pub struct PinStore {
    path: PathBuf,
    file: PinFile,
}

impl PinStore {
    pub fn load(path: PathBuf) -> Self {
        let file = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self { path, file }
    }

    fn persist(&self) {
        if let Ok(json) = serde_json::to_string_pretty(&self.file) {
            let _ = std::fs::write(&self.path, json);
        }
    }

    fn history_path(&self) -> PathBuf {
        self.path.with_extension("history.log")
    }

    fn append_history(&self, entry: &PinHistoryEntry) {
        let line = format!("{} {} {}", entry.date, entry.host, entry.fingerprint);
        let _ = super::append_pin_history_line(&self.history_path(), &line);
    }

    /// Check `fingerprint` against the stored pin for `host`, recording a
    /// new pin when none exists yet and updating it on an accepted
    /// rotation. `today` drives rotation-tolerance tests deterministically;
    /// production callers use `check_and_record`.
    pub fn check_and_record_at(
        &mut self,
        host: &str,
        fingerprint: &str,
        cert_rotation_days: i64,
        today: NaiveDate,
    ) -> PinCheckResult {
        match self.file.hosts.get(host).cloned() {
            None => {
                self.file.hosts.insert(
                    host.to_string(),
                    PinRecord {
                        fingerprint: fingerprint.to_string(),
                        first_seen: today,
                    },
                );
                self.persist();
                PinCheckResult::FirstSeen
            }
            Some(record) if record.fingerprint == fingerprint => PinCheckResult::Match,
            Some(record) => {
                let age_days = (today - record.first_seen).num_days();
                self.append_history(&PinHistoryEntry {
                    host: host.to_string(),
                    fingerprint: fingerprint.to_string(),
                    date: today,
                });
                if age_days >= cert_rotation_days {
                    self.file.hosts.insert(
                        host.to_string(),
                        PinRecord {
                            fingerprint: fingerprint.to_string(),
                            first_seen: today,
                        },
                    );
                    self.persist();
                    PinCheckResult::AcceptedRotation
                } else {
                    PinCheckResult::Mismatch
                }
            }
        }
    }

    pub fn check_and_record(
        &mut self,
        host: &str,
        fingerprint: &str,
        cert_rotation_days: i64,
    ) -> PinCheckResult {
        self.check_and_record_at(host, fingerprint, cert_rotation_days, Utc::now().date_naive())
    }
}
