//! The vulnerability checker (C6, §4.6): obtain vulnerabilities per digest
//! from one of two oracles, then apply the CVSS + ignore-list policy.

pub mod grafeas;
pub mod policy;
pub mod trivy;

use async_trait::async_trait;
use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};

pub use policy::Policy;

/// One vulnerability finding, normalized from whichever oracle reported it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cve {
    /// The vulnerability identifier, e.g. `CVE-2023-12345`.
    pub id: String,
    /// The highest available CVSS v3 score for this finding.
    pub score: f64,
}

/// The raw result of scanning one digest, before policy filtering.
#[derive(Clone, Debug, Default)]
pub struct RawFindings {
    /// Every vulnerability the oracle reported for this digest.
    pub cves: Vec<Cve>,
}

/// The result of scanning one digest, after policy filtering — the shape
/// merged into a [`crate::mapping::QualifiedImage`] (§3 invariant 3).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolicyResult {
    /// CVEs at or above `MaxCVSS` that are not in the ignore list.
    pub found: Vec<Cve>,
    /// CVEs that were present but suppressed by the ignore list.
    pub ignored: Vec<Cve>,
}

/// `VulnGetter.Get(ctx, digest)` of §4.6: obtain vulnerabilities for one
/// image from an oracle (local scanner subprocess or remote occurrence
/// store). `image_digest_ref` is the full digest-pinned reference string
/// (`repo@sha256:...`), since scanning a bare digest hash requires knowing
/// which repository to pull it from.
#[async_trait]
pub trait VulnGetter: Send + Sync {
    /// Fetch every vulnerability finding for `image_digest_ref`, with
    /// whatever retry/timeout behavior is appropriate for this oracle.
    async fn get(&self, image_digest_ref: &str) -> Result<RawFindings>;
}
