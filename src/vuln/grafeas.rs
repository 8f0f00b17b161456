//! The remote occurrence store oracle (§4.6 "remote occurrence store"):
//! finds vulnerabilities by polling a Grafeas-style note store's
//! `DISCOVERY` and `VULNERABILITY` occurrences for a digest.

use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::Result;
use tracing::instrument;

use crate::error::VulnError;
use crate::grafeas::{AnalysisStatus, OccurrenceStore};

use super::{Cve, RawFindings, VulnGetter};

/// Scans by querying a remote [`OccurrenceStore`] for discovery and
/// vulnerability occurrences under a fixed `parent` resource.
pub struct GrafeasOracle {
    store: Arc<dyn OccurrenceStore>,
    parent: String,
    retry_max: u32,
}

impl GrafeasOracle {
    /// Build an oracle querying `store` under `parent`, retrying an
    /// in-progress discovery up to `retry_max` times (§4.6, §6
    /// `-vulncheck-max-retries`).
    pub fn new(store: Arc<dyn OccurrenceStore>, parent: String, retry_max: u32) -> Self {
        Self {
            store,
            parent,
            retry_max,
        }
    }
}

#[async_trait]
impl VulnGetter for GrafeasOracle {
    #[instrument(skip(self), fields(image = %image_digest_ref))]
    async fn get(&self, image_digest_ref: &str) -> Result<RawFindings> {
        let resource_uri = format!("https://{image_digest_ref}");

        let mut attempt = 0u32;
        loop {
            let status = self
                .store
                .discovery_status(&self.parent, &resource_uri)
                .await?;
            match status {
                Some(AnalysisStatus::FinishedSuccess) => break,
                Some(AnalysisStatus::FinishedUnsupported) => {
                    return Ok(RawFindings::default());
                }
                Some(AnalysisStatus::FinishedFailed) | None => {
                    return Err(VulnError::DiscoveryNotFound(resource_uri).into());
                }
                Some(status) if status.is_in_progress() => {
                    attempt += 1;
                    if attempt > self.retry_max {
                        return Err(VulnError::DiscoverNotFinished(resource_uri).into());
                    }
                    crate::backoff::sleep_for_attempt(attempt).await;
                }
                Some(_) => unreachable!("every AnalysisStatus variant is handled above"),
            }
        }

        let vulns = self
            .store
            .list_vulnerabilities(&self.parent, &resource_uri)
            .await?;
        let cves = vulns
            .into_iter()
            .map(|v| Cve {
                id: v.short_description,
                score: v.cvss_score,
            })
            .collect();
        Ok(RawFindings { cves })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grafeas::{AttestationOccurrence, VulnerabilityOccurrence};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeStore {
        statuses: Mutex<Vec<AnalysisStatus>>,
        polls: AtomicUsize,
        vulns: Vec<VulnerabilityOccurrence>,
    }

    #[async_trait]
    impl OccurrenceStore for FakeStore {
        async fn discovery_status(
            &self,
            _parent: &str,
            _resource_uri: &str,
        ) -> Result<Option<AnalysisStatus>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().expect("lock");
            Ok(Some(if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            }))
        }

        async fn list_vulnerabilities(
            &self,
            _parent: &str,
            _resource_uri: &str,
        ) -> Result<Vec<VulnerabilityOccurrence>> {
            Ok(self.vulns.clone())
        }

        async fn list_attestations(
            &self,
            _parent: &str,
            _note_ref: &str,
            _resource_uri: &str,
        ) -> Result<Vec<AttestationOccurrence>> {
            Ok(vec![])
        }

        async fn create_attestation(
            &self,
            _parent: &str,
            _note_ref: &str,
            _resource_uri: &str,
            _payload: &[u8],
            _signature: &[u8],
            _key_id: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn waits_through_pending_then_returns_findings() {
        let store = Arc::new(FakeStore {
            statuses: Mutex::new(vec![AnalysisStatus::Pending, AnalysisStatus::FinishedSuccess]),
            polls: AtomicUsize::new(0),
            vulns: vec![VulnerabilityOccurrence {
                short_description: "CVE-2024-1".to_string(),
                cvss_score: 9.1,
            }],
        });
        let oracle = GrafeasOracle::new(store.clone(), "projects/demo".to_string(), 5);
        let findings = oracle.get("registry.example.com/app@sha256:abc").await.unwrap();
        assert_eq!(findings.cves.len(), 1);
        assert_eq!(findings.cves[0].score, 9.1);
        assert!(store.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn unsupported_returns_empty_findings() {
        let store = Arc::new(FakeStore {
            statuses: Mutex::new(vec![AnalysisStatus::FinishedUnsupported]),
            polls: AtomicUsize::new(0),
            vulns: vec![],
        });
        let oracle = GrafeasOracle::new(store, "projects/demo".to_string(), 5);
        let findings = oracle.get("registry.example.com/app@sha256:abc").await.unwrap();
        assert!(findings.cves.is_empty());
    }

    #[tokio::test]
    async fn exhausting_retries_errors() {
        let store = Arc::new(FakeStore {
            statuses: Mutex::new(vec![AnalysisStatus::Scanning]),
            polls: AtomicUsize::new(0),
            vulns: vec![],
        });
        let oracle = GrafeasOracle::new(store, "projects/demo".to_string(), 1);
        let err = oracle
            .get("registry.example.com/app@sha256:abc")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }
}
