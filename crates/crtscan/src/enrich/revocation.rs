//! CRL-based revocation check.
//!
//! A certificate outside its validity window counts as revoked without any
//! lookup. Otherwise every HTTP(S) CRL distribution point is consulted in
//! order (LDAP points are skipped) and the first failure or hit decides. A
//! certificate that publishes no revocation information is not revoked.
//! OCSP responders are not queried.
//!
//! Downloaded CRLs are reduced to their set of revoked serials and cached per
//! URL until `nextUpdate`, or for [`DEFAULT_CRL_TTL`] when the CRL has none.

use super::{Enricher, Enrichment};
use crate::evaluate::certificate::Certificate;
use crate::types::RawRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const REVOCATION_COLUMNS: [&str; 3] = ["Rev. revoked", "Rev. ok", "Rev. error"];

/// Per-request HTTP timeout.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_CRL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum RevocationError {
    #[error("certificate decode failed: {0}")]
    Decode(String),

    #[error("only an OCSP responder is published ({url}); OCSP is not supported")]
    OcspOnly { url: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fetching {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("parsing CRL from {url}: {message}")]
    Crl { url: String, message: String },
}

/// A completed revocation lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    Good,
    Revoked,
    /// Expired or not yet valid; reported as revoked with the reason.
    OutsideValidity(String),
}

impl From<RevocationStatus> for Enrichment {
    fn from(status: RevocationStatus) -> Self {
        match status {
            RevocationStatus::Good => Enrichment::confirmed("false"),
            RevocationStatus::Revoked => Enrichment::confirmed("true"),
            RevocationStatus::OutsideValidity(reason) => Enrichment {
                error: Some(reason),
                ..Enrichment::confirmed("true")
            },
        }
    }
}

/// Revoked serials of one CRL, normalised without leading zero bytes.
#[derive(Debug)]
struct CachedCrl {
    revoked: HashSet<Vec<u8>>,
    expires_at: Instant,
}

impl CachedCrl {
    fn parse(bytes: &[u8], url: &str) -> Result<Self, RevocationError> {
        let crl_error = |message: String| RevocationError::Crl {
            url: url.to_string(),
            message,
        };

        let pem_contents;
        let der = if bytes.starts_with(b"-----BEGIN") {
            let (_, pem) = x509_parser::pem::parse_x509_pem(bytes)
                .map_err(|e| crl_error(format!("invalid PEM: {e}")))?;
            pem_contents = pem.contents;
            pem_contents.as_slice()
        } else {
            bytes
        };

        let (_, crl) = x509_parser::parse_x509_crl(der).map_err(|e| crl_error(e.to_string()))?;
        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| normalize_serial(entry.raw_serial()))
            .collect();

        let now_unix = chrono::Utc::now().timestamp();
        let ttl = crl
            .next_update()
            .map(|next| next.timestamp() - now_unix)
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(DEFAULT_CRL_TTL);

        Ok(Self {
            revoked,
            expires_at: Instant::now() + ttl,
        })
    }

    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }

    fn contains(&self, serial: &[u8]) -> bool {
        self.revoked.contains(&normalize_serial(serial))
    }
}

fn validity_status(cert: &Certificate<'_>, now: DateTime<Utc>) -> Option<RevocationStatus> {
    if let Some(not_after) = cert.not_after() {
        if now >= not_after {
            return Some(RevocationStatus::OutsideValidity(format!(
                "certificate expired {not_after}"
            )));
        }
    }
    if let Some(not_before) = cert.not_before() {
        if now <= not_before {
            return Some(RevocationStatus::OutsideValidity(format!(
                "certificate isn't valid until {not_before}"
            )));
        }
    }
    None
}

fn normalize_serial(serial: &[u8]) -> Vec<u8> {
    let start = serial.iter().position(|b| *b != 0).unwrap_or(serial.len());
    serial[start..].to_vec()
}

/// Checks certificates against their issuer's CRL.
pub struct RevocationChecker {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, Arc<CachedCrl>>>,
}

impl RevocationChecker {
    pub fn new() -> Result<Self, RevocationError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("crtscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RevocationError::Client)?;
        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Revocation status of the certificate at `now`.
    pub async fn check(
        &self,
        der: &[u8],
        now: DateTime<Utc>,
    ) -> Result<RevocationStatus, RevocationError> {
        let (urls, serial, ocsp) = {
            let cert =
                Certificate::parse(der).map_err(|e| RevocationError::Decode(e.to_string()))?;
            if let Some(status) = validity_status(&cert, now) {
                return Ok(status);
            }
            (
                cert.crl_urls(),
                cert.raw_serial().to_vec(),
                cert.ocsp_urls().into_iter().next(),
            )
        };

        for url in &urls {
            if self.crl(url).await?.contains(&serial) {
                return Ok(RevocationStatus::Revoked);
            }
        }
        match ocsp {
            Some(url) if urls.is_empty() => Err(RevocationError::OcspOnly { url }),
            _ => Ok(RevocationStatus::Good),
        }
    }

    async fn crl(&self, url: &str) -> Result<Arc<CachedCrl>, RevocationError> {
        if let Some(cached) = self.cache.lock().await.get(url) {
            if cached.is_fresh() {
                return Ok(Arc::clone(cached));
            }
        }

        // Lock is released during the download; a concurrent miss for the
        // same URL downloads twice and the later insert wins.
        let crl = Arc::new(self.download(url).await?);
        self.cache
            .lock()
            .await
            .insert(url.to_string(), Arc::clone(&crl));
        Ok(crl)
    }

    async fn download(&self, url: &str) -> Result<CachedCrl, RevocationError> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| RevocationError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RevocationError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| RevocationError::Http {
                url: url.to_string(),
                source,
            })?;
        let crl = CachedCrl::parse(&body, url)?;
        info!(
            url,
            revoked = crl.revoked.len(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched CRL"
        );
        Ok(crl)
    }

    #[cfg(test)]
    async fn prime(&self, url: &str, bytes: &[u8]) {
        let crl = CachedCrl::parse(bytes, url).unwrap();
        self.cache.lock().await.insert(url.to_string(), Arc::new(crl));
    }
}

#[async_trait]
impl Enricher for RevocationChecker {
    fn columns(&self) -> Vec<String> {
        REVOCATION_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    async fn enrich(&self, record: &RawRecord) -> Enrichment {
        match self.check(&record.payload, Utc::now()).await {
            Ok(status) => status.into(),
            Err(err) => {
                debug!(id = record.id, error = %err, "Revocation check failed");
                Enrichment::failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cursor;

    const WITH_CRL: &[u8] = include_bytes!("../../tests/fixtures/with_crl.der");
    const MULTI_CRL: &[u8] = include_bytes!("../../tests/fixtures/multi_crl.der");
    const OCSP_ONLY: &[u8] = include_bytes!("../../tests/fixtures/ocsp_only.der");
    const EXPIRED: &[u8] = include_bytes!("../../tests/fixtures/expired.der");
    const NO_CRL: &[u8] = include_bytes!("../../tests/fixtures/state_known.der");
    const TEST_CRL: &[u8] = include_bytes!("../../tests/fixtures/test.crl");
    const EMPTY_CRL: &[u8] = include_bytes!("../../tests/fixtures/empty.crl");
    const CRL_URL: &str = "http://127.0.0.1:9/crtscan-test.crl";
    const EMPTY_CRL_URL: &str = "http://127.0.0.1:9/crtscan-empty.crl";

    /// Inside every non-expired fixture's validity window.
    fn inside_validity() -> DateTime<Utc> {
        DateTime::from_timestamp(1_792_800_000, 0).unwrap() // 2026-10-24
    }

    fn record(payload: &[u8]) -> RawRecord {
        RawRecord {
            id: 42,
            cursor: Cursor(42),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_crl_parse_and_lookup() {
        let crl = CachedCrl::parse(TEST_CRL, CRL_URL).unwrap();
        assert!(crl.contains(&[0x10, 0x09]));
        assert!(crl.contains(&[0x00, 0x10, 0x09]));
        assert!(!crl.contains(&[0x10, 0x02]));
        assert!(crl.is_fresh());
    }

    #[test]
    fn test_crl_parse_rejects_garbage() {
        let err = CachedCrl::parse(b"<html>not found</html>", CRL_URL).unwrap_err();
        assert!(matches!(err, RevocationError::Crl { .. }));
    }

    #[test]
    fn test_normalize_serial() {
        assert_eq!(normalize_serial(&[0, 0, 1, 0]), vec![1, 0]);
        assert_eq!(normalize_serial(&[0]), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_revoked_from_cached_crl() {
        let checker = RevocationChecker::new().unwrap();
        checker.prime(CRL_URL, TEST_CRL).await;

        let status = checker.check(WITH_CRL, inside_validity()).await.unwrap();
        assert_eq!(status, RevocationStatus::Revoked);
    }

    #[tokio::test]
    async fn test_every_distribution_point_is_consulted() {
        let checker = RevocationChecker::new().unwrap();
        checker.prime(EMPTY_CRL_URL, EMPTY_CRL).await;
        checker.prime(CRL_URL, TEST_CRL).await;

        let status = checker.check(MULTI_CRL, inside_validity()).await.unwrap();
        assert_eq!(status, RevocationStatus::Revoked);
    }

    #[tokio::test]
    async fn test_not_on_any_crl_is_good() {
        let checker = RevocationChecker::new().unwrap();
        checker.prime(EMPTY_CRL_URL, EMPTY_CRL).await;
        checker.prime(CRL_URL, EMPTY_CRL).await;

        let status = checker.check(MULTI_CRL, inside_validity()).await.unwrap();
        assert_eq!(status, RevocationStatus::Good);
    }

    #[tokio::test]
    async fn test_no_revocation_info_is_not_revoked() {
        let checker = RevocationChecker::new().unwrap();
        let status = checker.check(NO_CRL, inside_validity()).await.unwrap();
        assert_eq!(status, RevocationStatus::Good);
        assert_eq!(Enrichment::from(status), Enrichment::confirmed("false"));
    }

    #[tokio::test]
    async fn test_ocsp_only_is_unconfirmed() {
        let checker = RevocationChecker::new().unwrap();
        let err = checker.check(OCSP_ONLY, inside_validity()).await.unwrap_err();
        assert!(matches!(
            err,
            RevocationError::OcspOnly { ref url } if url == "http://127.0.0.1:9/ocsp"
        ));
    }

    #[tokio::test]
    async fn test_expired_counts_as_revoked_without_lookup() {
        // The CRL URL is unreachable; an expired certificate never gets that far.
        let checker = RevocationChecker::new().unwrap();
        let enrichment = checker.enrich(&record(EXPIRED)).await;
        assert_eq!(enrichment.result, "true");
        assert!(enrichment.confirmed);
        assert!(enrichment
            .error
            .unwrap_or_default()
            .starts_with("certificate expired 2020-06-01"));
    }

    #[tokio::test]
    async fn test_not_yet_valid_counts_as_revoked() {
        let checker = RevocationChecker::new().unwrap();
        let before = DateTime::from_timestamp(1_577_836_800, 0).unwrap(); // 2020-01-01
        let status = checker.check(WITH_CRL, before).await.unwrap();
        let RevocationStatus::OutsideValidity(reason) = status else {
            panic!("expected OutsideValidity, got {status:?}");
        };
        assert!(reason.starts_with("certificate isn't valid until"));
    }

    #[tokio::test]
    async fn test_unreachable_crl_is_data() {
        let checker = RevocationChecker::new().unwrap();
        let err = checker.check(WITH_CRL, inside_validity()).await.unwrap_err();
        assert!(matches!(err, RevocationError::Http { .. }));
        assert!(err.to_string().contains(CRL_URL));
    }
}
