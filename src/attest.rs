//! The Attester (C7, §4.7): sign a canonical payload and publish it as an
//! occurrence, idempotent per `(digest, note-ref)`.

use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::Result;
use serde_json::json;
use tracing::instrument;

use crate::error::AttestError;
use crate::grafeas::OccurrenceStore;

/// `Keyer.Sign` of §4.7: signs a payload and returns the signature and the
/// id of the key that produced it. Key material is never held by the
/// rest of the pipeline — only this trait's implementation touches it.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `payload`, returning `(signature, key_id)`.
    async fn sign(&self, payload: &[u8]) -> Result<(Vec<u8>, String)>;

    /// Verify that `signature` over `payload` was produced by `key_id`.
    /// Used by the idempotence check (§4.7 step 1); a verification error
    /// is treated the same as "does not verify", never propagated.
    async fn verify(&self, payload: &[u8], signature: &[u8], key_id: &str) -> Result<bool>;
}

/// Produces and publishes binary-authorization-style attestations.
pub struct Attester {
    signer: Arc<dyn Signer>,
    store: Arc<dyn OccurrenceStore>,
    parent: String,
    note_ref: String,
}

impl Attester {
    /// Build an attester publishing to `note_ref` under Grafeas `parent`.
    pub fn new(
        signer: Arc<dyn Signer>,
        store: Arc<dyn OccurrenceStore>,
        parent: String,
        note_ref: String,
    ) -> Self {
        Self {
            signer,
            store,
            parent,
            note_ref,
        }
    }

    /// Attest `(full_reference, digest)` if it is not already attested
    /// under the configured note reference (§4.7 step 1, §8 "Attester
    /// idempotence": "the second call makes no Create request").
    #[instrument(skip(self), fields(image = %full_reference, digest = %digest))]
    pub async fn attest(&self, full_reference: &str, digest: &str) -> Result<(), AttestError> {
        let resource_uri = format!("https://{digest}");

        let existing = self
            .store
            .list_attestations(&self.parent, &self.note_ref, &resource_uri)
            .await
            .map_err(|e| AttestError::Attest(full_reference.to_string(), e))?;

        let payload = canonical_payload(full_reference, digest);

        for occurrence in &existing {
            let verified = self
                .signer
                .verify(&occurrence.payload, &occurrence.signature, &occurrence.key_id)
                .await
                .unwrap_or(false);
            if verified {
                tracing::debug!(image = %full_reference, "already attested, skipping");
                return Ok(());
            }
        }

        let (signature, key_id) = self
            .signer
            .sign(&payload)
            .await
            .map_err(|e| AttestError::Sign(full_reference.to_string(), e))?;

        self.store
            .create_attestation(
                &self.parent,
                &self.note_ref,
                &resource_uri,
                &payload,
                &signature,
                &key_id,
            )
            .await
            .map_err(|e| AttestError::Attest(full_reference.to_string(), e))?;

        Ok(())
    }
}

/// The canonical attestation payload (§4.7 step 2). The misspelled
/// `identitiy` key is intentional wire format; preserved for compatibility
/// with existing verifiers, not a typo to fix.
fn canonical_payload(full_reference: &str, digest: &str) -> Vec<u8> {
    let payload = json!({
        "critical": {
            "identitiy": { "docker-reference": full_reference },
            "image": { "docker-manifest-digest": digest },
            "type": "Google cloud binauthz container signature",
        }
    });
    serde_json::to_vec(&payload).expect("payload is always valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grafeas::AttestationOccurrence;
    use crate::grafeas::{AnalysisStatus, VulnerabilityOccurrence};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn payload_preserves_misspelled_key() {
        let payload = canonical_payload("registry.example.com/app:v1", "sha256:abc");
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains("\"identitiy\""));
        assert!(!text.contains("\"identity\""));
    }

    struct FakeSigner {
        key_id: String,
        verifies: bool,
    }

    #[async_trait]
    impl Signer for FakeSigner {
        async fn sign(&self, _payload: &[u8]) -> Result<(Vec<u8>, String)> {
            Ok((b"sig".to_vec(), self.key_id.clone()))
        }

        async fn verify(&self, _payload: &[u8], _signature: &[u8], _key_id: &str) -> Result<bool> {
            Ok(self.verifies)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        attestations: Mutex<Vec<AttestationOccurrence>>,
        creates: AtomicUsize,
    }

    #[async_trait]
    impl OccurrenceStore for FakeStore {
        async fn discovery_status(
            &self,
            _parent: &str,
            _resource_uri: &str,
        ) -> Result<Option<AnalysisStatus>> {
            unimplemented!()
        }

        async fn list_vulnerabilities(
            &self,
            _parent: &str,
            _resource_uri: &str,
        ) -> Result<Vec<VulnerabilityOccurrence>> {
            unimplemented!()
        }

        async fn list_attestations(
            &self,
            _parent: &str,
            _note_ref: &str,
            _resource_uri: &str,
        ) -> Result<Vec<AttestationOccurrence>> {
            Ok(self.attestations.lock().expect("lock").clone())
        }

        async fn create_attestation(
            &self,
            _parent: &str,
            _note_ref: &str,
            _resource_uri: &str,
            payload: &[u8],
            signature: &[u8],
            key_id: &str,
        ) -> Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.attestations.lock().expect("lock").push(AttestationOccurrence {
                signature: signature.to_vec(),
                key_id: key_id.to_string(),
                payload: payload.to_vec(),
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn attests_once_then_is_idempotent() {
        let signer = Arc::new(FakeSigner {
            key_id: "key-1".to_string(),
            verifies: true,
        });
        let store = Arc::new(FakeStore::default());
        let attester = Attester::new(
            signer,
            store.clone(),
            "projects/demo".to_string(),
            "projects/demo/notes/prod".to_string(),
        );

        attester
            .attest("registry.example.com/app:v1", "sha256:abc")
            .await
            .unwrap();
        attester
            .attest("registry.example.com/app:v1", "sha256:abc")
            .await
            .unwrap();

        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reattests_when_existing_signature_does_not_verify() {
        let signer = Arc::new(FakeSigner {
            key_id: "key-1".to_string(),
            verifies: false,
        });
        let store = Arc::new(FakeStore::default());
        let attester = Attester::new(
            signer,
            store.clone(),
            "projects/demo".to_string(),
            "projects/demo/notes/prod".to_string(),
        );

        attester
            .attest("registry.example.com/app:v1", "sha256:abc")
            .await
            .unwrap();
        attester
            .attest("registry.example.com/app:v1", "sha256:abc")
            .await
            .unwrap();

        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    }
}
