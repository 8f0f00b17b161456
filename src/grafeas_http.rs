//! A real [`OccurrenceStore`] backed by the Grafeas REST API (§1/§6:
//! "Grafeas transport ... treated as abstract `OccurrenceStore`" — this is
//! the concrete adapter wired up when `-vulncheck-method grafeas` or
//! `-binauthz-attestor` is configured). Authentication is a bearer token
//! supplied by the caller, the same as [`crate::kms::KmsSigner`].

use async_trait::async_trait;
use base64::Engine;
use color_eyre::eyre::{Context, Result};
use serde::Deserialize;
use tracing::instrument;

use crate::grafeas::{AnalysisStatus, AttestationOccurrence, OccurrenceStore, VulnerabilityOccurrence};

/// A Grafeas-compatible note/occurrence store reached over HTTPS.
pub struct GrafeasHttpStore {
    http: reqwest::Client,
    api_root: String,
    access_token: String,
}

impl GrafeasHttpStore {
    /// Build a client against `api_root` (e.g.
    /// `https://containeranalysis.googleapis.com/v1`), authenticating every
    /// request with `access_token`.
    pub fn new(api_root: String, access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_root,
            access_token,
        }
    }

    async fn list_occurrences(&self, parent: &str, filter: &str) -> Result<Vec<RawOccurrence>> {
        let url = format!("{}/{parent}/occurrences", self.api_root);
        let response: OccurrenceList = self
            .http
            .get(&url)
            .query(&[("filter", filter)])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("list occurrences")?
            .error_for_status()
            .context("list occurrences request failed")?
            .json()
            .await
            .context("decode occurrence list")?;
        Ok(response.occurrences)
    }
}

#[derive(Deserialize, Default)]
struct OccurrenceList {
    #[serde(default)]
    occurrences: Vec<RawOccurrence>,
}

#[derive(Deserialize, Clone)]
struct RawOccurrence {
    #[serde(default)]
    discovery: Option<RawDiscovery>,
    #[serde(default)]
    vulnerability: Option<RawVulnerability>,
    #[serde(default)]
    attestation: Option<RawAttestation>,
    #[serde(rename = "noteName", default)]
    note_name: Option<String>,
}

#[derive(Deserialize, Clone)]
struct RawDiscovery {
    #[serde(rename = "analysisStatus")]
    analysis_status: String,
}

#[derive(Deserialize, Clone)]
struct RawVulnerability {
    #[serde(rename = "shortDescription", default)]
    short_description: String,
    #[serde(rename = "cvssScore", default)]
    cvss_score: f64,
}

#[derive(Deserialize, Clone)]
struct RawAttestation {
    #[serde(rename = "serializedPayload")]
    serialized_payload: String,
    signatures: Vec<RawSignature>,
}

#[derive(Deserialize, Clone)]
struct RawSignature {
    signature: String,
    #[serde(rename = "publicKeyId")]
    public_key_id: String,
}

fn parse_status(s: &str) -> AnalysisStatus {
    match s {
        "PENDING" => AnalysisStatus::Pending,
        "SCANNING" => AnalysisStatus::Scanning,
        "FINISHED_SUCCESS" => AnalysisStatus::FinishedSuccess,
        "FINISHED_UNSUPPORTED" => AnalysisStatus::FinishedUnsupported,
        _ => AnalysisStatus::FinishedFailed,
    }
}

#[async_trait]
impl OccurrenceStore for GrafeasHttpStore {
    #[instrument(skip(self))]
    async fn discovery_status(&self, parent: &str, resource_uri: &str) -> Result<Option<AnalysisStatus>> {
        let filter = format!("kind=\"DISCOVERY\" AND resourceUrl=\"{resource_uri}\"");
        let occurrences = self.list_occurrences(parent, &filter).await?;
        Ok(occurrences
            .into_iter()
            .find_map(|o| o.discovery.map(|d| parse_status(&d.analysis_status))))
    }

    #[instrument(skip(self))]
    async fn list_vulnerabilities(&self, parent: &str, resource_uri: &str) -> Result<Vec<VulnerabilityOccurrence>> {
        let filter = format!("kind=\"VULNERABILITY\" AND resourceUrl=\"{resource_uri}\"");
        let occurrences = self.list_occurrences(parent, &filter).await?;
        Ok(occurrences
            .into_iter()
            .filter_map(|o| o.vulnerability)
            .map(|v| VulnerabilityOccurrence {
                short_description: v.short_description,
                cvss_score: v.cvss_score,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_attestations(
        &self,
        parent: &str,
        note_ref: &str,
        resource_uri: &str,
    ) -> Result<Vec<AttestationOccurrence>> {
        let filter = format!("kind=\"ATTESTATION\" AND resourceUrl=\"{resource_uri}\"");
        let occurrences = self.list_occurrences(parent, &filter).await?;
        let mut out = Vec::new();
        for occurrence in occurrences {
            if occurrence.note_name.as_deref() != Some(note_ref) {
                continue;
            }
            let Some(attestation) = occurrence.attestation else {
                continue;
            };
            let payload = base64::engine::general_purpose::STANDARD
                .decode(&attestation.serialized_payload)
                .context("decode attestation payload as base64")?;
            for sig in attestation.signatures {
                let signature = base64::engine::general_purpose::STANDARD
                    .decode(&sig.signature)
                    .context("decode attestation signature as base64")?;
                out.push(AttestationOccurrence {
                    signature,
                    key_id: sig.public_key_id,
                    payload: payload.clone(),
                });
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, payload, signature))]
    async fn create_attestation(
        &self,
        parent: &str,
        note_ref: &str,
        resource_uri: &str,
        payload: &[u8],
        signature: &[u8],
        key_id: &str,
    ) -> Result<()> {
        let url = format!("{}/{parent}/occurrences", self.api_root);
        let body = serde_json::json!({
            "noteName": note_ref,
            "resourceUri": resource_uri,
            "kind": "ATTESTATION",
            "attestation": {
                "serializedPayload": base64::engine::general_purpose::STANDARD.encode(payload),
                "signatures": [{
                    "signature": base64::engine::general_purpose::STANDARD.encode(signature),
                    "publicKeyId": key_id,
                }],
            },
        });
        self.http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("create attestation occurrence")?
            .error_for_status()
            .context("create attestation occurrence request failed")?;
        Ok(())
    }
}

