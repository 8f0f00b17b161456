//! A real [`crate::attest::Signer`] backed by GCP Cloud KMS's REST API
//! (§1/§6: "cloud signing/KMS ... treated as abstract `Signer`" — this is
//! the concrete adapter the CLI wires up behind that trait when
//! `-gcp-kms-key` is set).
//!
//! Only asymmetric-sign EC keys are supported: Cloud KMS has no verify
//! RPC, so idempotence-check verification is done locally against the
//! key's public half, fetched once and cached.

use async_trait::async_trait;
use base64::Engine;
use color_eyre::eyre::{Context, Result};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::attest::Signer;

const KMS_API_ROOT: &str = "https://cloudkms.googleapis.com/v1";

/// Signs via a Cloud KMS asymmetric key version, authenticating with a
/// bearer token obtained the way `gcloud auth print-access-token` does
/// (out of scope here; the token is supplied by the caller, refreshed
/// externally — see [`KmsSigner::new`]).
pub struct KmsSigner {
    http: reqwest::Client,
    key_version: String,
    access_token: String,
    public_key: OnceCell<VerifyingKey>,
}

impl KmsSigner {
    /// Build a signer for `key_version`, e.g.
    /// `projects/p/locations/l/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1`.
    pub fn new(key_version: String, access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            key_version,
            access_token,
            public_key: OnceCell::new(),
        }
    }

    async fn fetch_public_key(&self) -> Result<VerifyingKey> {
        let url = format!("{KMS_API_ROOT}/{}/publicKey", self.key_version);
        #[derive(serde::Deserialize)]
        struct PublicKeyResponse {
            pem: String,
        }
        let response: PublicKeyResponse = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("request KMS public key")?
            .error_for_status()
            .context("KMS public key request failed")?
            .json()
            .await
            .context("decode KMS public key response")?;
        VerifyingKey::from_public_key_pem(&response.pem).context("parse KMS public key PEM")
    }

    async fn public_key(&self) -> Result<&VerifyingKey> {
        self.public_key
            .get_or_try_init(|| self.fetch_public_key())
            .await
    }
}

#[async_trait]
impl Signer for KmsSigner {
    #[instrument(skip(self, payload))]
    async fn sign(&self, payload: &[u8]) -> Result<(Vec<u8>, String)> {
        let digest = Sha256::digest(payload);
        let url = format!("{KMS_API_ROOT}/{}:asymmetricSign", self.key_version);

        #[derive(serde::Serialize)]
        struct Request {
            digest: DigestField,
        }
        #[derive(serde::Serialize)]
        struct DigestField {
            sha256: String,
        }
        #[derive(serde::Deserialize)]
        struct Response {
            signature: String,
        }

        let body = Request {
            digest: DigestField {
                sha256: base64::engine::general_purpose::STANDARD.encode(digest),
            },
        };
        let response: Response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("request KMS asymmetricSign")?
            .error_for_status()
            .context("KMS asymmetricSign request failed")?
            .json()
            .await
            .context("decode KMS asymmetricSign response")?;

        let signature = base64::engine::general_purpose::STANDARD
            .decode(response.signature)
            .context("decode KMS signature as base64")?;
        Ok((signature, self.key_version.clone()))
    }

    async fn verify(&self, payload: &[u8], signature: &[u8], key_id: &str) -> Result<bool> {
        if key_id != self.key_version {
            return Ok(false);
        }
        let key = self.public_key().await?;
        let signature = match Signature::from_der(signature) {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
        Ok(key.verify(payload, &signature).is_ok())
    }
}
