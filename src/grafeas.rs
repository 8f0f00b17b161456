//! A narrow abstraction over the external note/occurrence store (§1, §6:
//! "cloud signing/KMS and Grafeas transport ... treated as abstract
//! `Signer` and `OccurrenceStore`"). Both the remote vulnerability oracle
//! ([`crate::vuln::grafeas`]) and the attester ([`crate::attest`]) talk to
//! the same kind of system through this one trait, since both are reading
//! and writing occurrences under a parent resource.

use async_trait::async_trait;
use color_eyre::eyre::Result;

/// The analysis status of a `DISCOVERY` occurrence (§4.6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum AnalysisStatus {
    /// Scanning has not started yet.
    Pending,
    /// Scanning is in progress.
    Scanning,
    /// Scanning finished and produced results.
    FinishedSuccess,
    /// Scanning finished but the image type is unsupported.
    FinishedUnsupported,
    /// Scanning finished with an internal failure.
    FinishedFailed,
}

impl AnalysisStatus {
    /// Whether this status means scanning is still underway and the caller
    /// should retry (§4.6: "while discovery reports PENDING/SCANNING").
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Scanning)
    }
}

/// One `VULNERABILITY` occurrence as reported by the remote store (§4.6).
#[derive(Clone, Debug)]
pub struct VulnerabilityOccurrence {
    /// A human-readable description; carries the CVE id in practice.
    pub short_description: String,
    /// The CVSS v3 score attached to the occurrence.
    pub cvss_score: f64,
}

/// One `ATTESTATION` occurrence: a signature over a payload plus the id of
/// the key that produced it (§4.7 step 1).
#[derive(Clone, Debug)]
pub struct AttestationOccurrence {
    /// The signature bytes.
    pub signature: Vec<u8>,
    /// The id of the key used to produce the signature.
    pub key_id: String,
    /// The payload the signature was made over.
    pub payload: Vec<u8>,
}

/// `OccurrenceStore` of §1/§6: list and create occurrences in the remote
/// note store. Implementations paginate internally; callers never see a
/// page token.
#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    /// The most advanced `DISCOVERY` occurrence's status for `resource_uri`
    /// under `parent`, or `None` if no discovery occurrence exists yet.
    async fn discovery_status(
        &self,
        parent: &str,
        resource_uri: &str,
    ) -> Result<Option<AnalysisStatus>>;

    /// Every `VULNERABILITY` occurrence for `resource_uri` under `parent`.
    async fn list_vulnerabilities(
        &self,
        parent: &str,
        resource_uri: &str,
    ) -> Result<Vec<VulnerabilityOccurrence>>;

    /// Every `ATTESTATION` occurrence for `resource_uri`, filtered by
    /// `note_ref` (§4.7 step 1).
    async fn list_attestations(
        &self,
        parent: &str,
        note_ref: &str,
        resource_uri: &str,
    ) -> Result<Vec<AttestationOccurrence>>;

    /// Create a new attestation occurrence (§4.7 step 4).
    async fn create_attestation(
        &self,
        parent: &str,
        note_ref: &str,
        resource_uri: &str,
        payload: &[u8],
        signature: &[u8],
        key_id: &str,
    ) -> Result<()>;
}
