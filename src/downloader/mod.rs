//! Archive downloader: retry with backoff, certificate pinning, integrity
//! verification, politeness delays (§4.2).
//!
//! HTTP access is abstracted behind `HttpFetcher` so the retry/backoff/
//! pinning/verification logic is unit-testable without a socket — grounded
//! in `examples/other_examples/a2e20660_theFdo-pmm__src-binance_klines.rs.rs`,
//! which isolates its archive fetch behind an `HttpFetcher` trait with a
//! `MockFetcher` test double for deterministic retry assertions. The
//! production fetcher wraps `reqwest::blocking::Client`, matching the HTTP
//! call style used elsewhere in this codebase for archive retrieval.

mod pinning;

pub use pinning::{PinHistoryEntry, PinStore};

use crate::calendar::CalendarOracle;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use rand::Rng;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Outcome of one HTTP fetch attempt, abstracted away from any particular
/// HTTP client crate.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// SHA-256 fingerprint (hex) of the server's leaf certificate for this
    /// connection, when the transport exposes it.
    pub cert_fingerprint: Option<String>,
}

/// The HTTP boundary the downloader depends on. Implementations may fail at
/// the transport level (`Err`) or succeed with any status code (`Ok`) —
/// mapping status codes to pipeline semantics is the downloader's job, not
/// the fetcher's.
pub trait HttpFetcher: Send + Sync {
    fn head(&self, url: &str) -> std::result::Result<FetchResponse, String>;
    fn get(&self, url: &str) -> std::result::Result<FetchResponse, String>;
}

/// Production `HttpFetcher` backed by `reqwest::blocking::Client`.
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .tls_info(true)
            .build()
            .map_err(|e| PipelineError::NetworkTransient(e.to_string()))?;
        Ok(Self { client })
    }

    fn extract_fingerprint(resp: &reqwest::blocking::Response) -> Option<String> {
        resp.extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .map(crate::hash::sha256_hex)
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn head(&self, url: &str) -> std::result::Result<FetchResponse, String> {
        let resp = self.client.head(url).send().map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let cert_fingerprint = Self::extract_fingerprint(&resp);
        Ok(FetchResponse {
            status,
            body: Vec::new(),
            cert_fingerprint,
        })
    }

    fn get(&self, url: &str) -> std::result::Result<FetchResponse, String> {
        let resp = self.client.get(url).send().map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let cert_fingerprint = Self::extract_fingerprint(&resp);
        let body = resp.bytes().map_err(|e| e.to_string())?.to_vec();
        Ok(FetchResponse {
            status,
            body,
            cert_fingerprint,
        })
    }
}

/// Public contract per §4.2: `fetch(archive_name, destination)`.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Ok { path: PathBuf },
    PermanentFail { tag: String, message: String },
    TransientFail { message: String },
}

const MIN_ARCHIVE_BYTES: usize = 128;

pub struct Downloader<F: HttpFetcher> {
    base_url: String,
    max_retries: u32,
    backoff_factor: f64,
    wait_min_ms: u64,
    wait_max_ms: u64,
    cert_rotation_days: i64,
    strict_cert_pinning: bool,
    fetcher: F,
    pin_store: PinStore,
}

impl<F: HttpFetcher> Downloader<F> {
    pub fn new(config: &PipelineConfig, fetcher: F, pin_history_path: PathBuf) -> Self {
        Self {
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
            wait_min_ms: config.wait_between_downloads_min_ms,
            wait_max_ms: config.wait_between_downloads_max_ms,
            cert_rotation_days: config.cert_rotation_days,
            strict_cert_pinning: config.strict_cert_pinning,
            fetcher,
            pin_store: PinStore::load(pin_history_path),
        }
    }

    fn url_for(&self, archive_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), archive_name)
    }

    fn host_of(url: &str) -> String {
        url.split("//")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or(url)
            .to_string()
    }

    /// Check the server certificate against the persisted pin for this host.
    /// Returns `Err` only when `strict_cert_pinning` is set and the mismatch
    /// is not an accepted rotation.
    fn check_pin(&mut self, host: &str, fingerprint: &str) -> Result<()> {
        match self.pin_store.check_and_record(host, fingerprint, self.cert_rotation_days) {
            pinning::PinCheckResult::FirstSeen | pinning::PinCheckResult::Match => Ok(()),
            pinning::PinCheckResult::AcceptedRotation => {
                tracing::info!(channel = "security", host, "certificate pin rotated (older than cert_rotation_days)");
                Ok(())
            }
            pinning::PinCheckResult::Mismatch => {
                tracing::warn!(channel = "security", host, fingerprint, "certificate fingerprint mismatch");
                if self.strict_cert_pinning {
                    Err(PipelineError::IntegrityViolation(format!(
                        "certificate pin mismatch for host {host}"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Acquire `archive_name` into `destination`. Performs the HEAD
    /// pre-check, retry loop, certificate pin check and post-download
    /// integrity verification described in §4.2.
    pub fn fetch(&mut self, archive_name: &str, destination: &Path) -> DownloadOutcome {
        let url = self.url_for(archive_name);
        let host = Self::host_of(&url);

        match self.fetcher.head(&url) {
            Ok(resp) if resp.status == 404 => {
                return DownloadOutcome::PermanentFail {
                    tag: "not_yet_published".to_string(),
                    message: format!("{archive_name} returned 404 on pre-check"),
                };
            }
            _ => {}
        }

        let mut attempt = 0u32;
        loop {
            match self.fetcher.get(&url) {
                Ok(resp) if resp.status == 404 => {
                    return DownloadOutcome::PermanentFail {
                        tag: "not_yet_published".to_string(),
                        message: format!("{archive_name} returned 404"),
                    };
                }
                Ok(resp) if (200..300).contains(&resp.status) => {
                    if let Some(fingerprint) = &resp.cert_fingerprint {
                        if let Err(e) = self.check_pin(&host, fingerprint) {
                            return DownloadOutcome::PermanentFail {
                                tag: "cert_pin_mismatch".to_string(),
                                message: e.to_string(),
                            };
                        }
                    }

                    if let Err(e) = std::fs::write(destination, &resp.body) {
                        return DownloadOutcome::TransientFail {
                            message: format!("failed to write archive to disk: {e}"),
                        };
                    }

                    return self.verify_and_finish(archive_name, destination, resp.body.len());
                }
                Ok(resp) => {
                    if attempt >= self.max_retries {
                        return DownloadOutcome::TransientFail {
                            message: format!(
                                "{archive_name}: exhausted retries at status {}",
                                resp.status
                            ),
                        };
                    }
                }
                Err(message) => {
                    if attempt >= self.max_retries {
                        return DownloadOutcome::TransientFail { message };
                    }
                }
            }

            let delay_secs = self.backoff_factor.powi(attempt as i32);
            thread::sleep(Duration::from_secs_f64(delay_secs.max(0.0)));
            attempt += 1;
        }
    }

    fn verify_and_finish(
        &self,
        archive_name: &str,
        destination: &Path,
        byte_len: usize,
    ) -> DownloadOutcome {
        if byte_len < MIN_ARCHIVE_BYTES {
            tracing::warn!(
                channel = "download",
                archive_name,
                byte_len,
                "downloaded archive is suspiciously small"
            );
        }

        match std::fs::File::open(destination).map(zip::ZipArchive::new) {
            Ok(Ok(mut archive)) if archive.len() >= 1 => DownloadOutcome::Ok {
                path: destination.to_path_buf(),
            },
            Ok(Ok(_)) => DownloadOutcome::PermanentFail {
                tag: "empty_zip".to_string(),
                message: format!("{archive_name} ZIP archive has no members"),
            },
            _ => DownloadOutcome::PermanentFail {
                tag: "invalid_zip".to_string(),
                message: format!("{archive_name} is not a valid ZIP archive"),
            },
        }
    }

    /// Sleep for a politeness delay uniformly drawn from
    /// `[wait_min, wait_max]` milliseconds. Callers invoke this between
    /// successive downloads, not before the first.
    pub fn politeness_delay(&self) {
        let ms = if self.wait_max_ms > self.wait_min_ms {
            rand::thread_rng().gen_range(self.wait_min_ms..=self.wait_max_ms)
        } else {
            self.wait_min_ms
        };
        thread::sleep(Duration::from_millis(ms));
    }

    /// Date scheduling (§4.2): a single requested day `D` is skipped when
    /// `D` is not a trading day per the `CalendarOracle`.
    pub fn should_download_day(&self, day: NaiveDate, calendar: &dyn CalendarOracle) -> bool {
        calendar.is_trading_day(day)
    }

    /// "Auto" mode (§4.2): the set of missing trading days strictly after
    /// the store's max processed date (exclusive) up to and including
    /// `today`. `last_processed` is the ledger's/store's max processed
    /// date (e.g. `QuoteStore::latest_date`); `None` means nothing has ever
    /// been ingested, in which case only `today` is considered missing.
    pub fn missing_trading_days(
        &self,
        calendar: &dyn CalendarOracle,
        last_processed: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Vec<NaiveDate> {
        let from = match last_processed {
            Some(date) => date + chrono::Duration::days(1),
            None => today,
        };
        if from > today {
            return Vec::new();
        }
        calendar.trading_days_between(from, today)
    }
}

/// Append a line to the pin-history file, used by `PinStore` on mismatch or
/// rotation. Kept as a free function so tests can inspect the on-disk
/// format without constructing a full `Downloader`.
pub(crate) fn append_pin_history_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}
