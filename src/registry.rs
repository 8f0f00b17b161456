//! The registry client external collaborator (§1, §6): `pull`/`push`/`copy`/
//! `digest-of`, consumed through a narrow trait so the pipeline is testable
//! against fakes. The real adapter wraps [`oci_client`] to pull and push
//! manifests and blobs.

use async_trait::async_trait;
use color_eyre::eyre::{Context, Result};
use oci_client::{
    client::{ClientConfig, Config, ImageData, ImageLayer},
    manifest::OciImageManifest,
    secrets::RegistryAuth,
    Client,
};

use crate::reference::{Digest, Reference};

/// The media type used for the static mapping store's single layer (§4.5):
/// an uncompressed tar, since the layer holds one small JSON file.
const MAPPING_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";

/// Narrow interface onto an OCI registry: resolve a tag's current digest,
/// check whether a target digest already exists, copy an image
/// manifest+layers between references, and pull/push the single-layer
/// image used by the static mapping store (§4.5).
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve the digest currently published for `reference`'s tag.
    /// This is the "HEAD-equivalent manifest fetch" of §4.3 item 4.
    async fn resolve_digest(&self, reference: &Reference) -> Result<Digest>;

    /// The digest currently published at `reference`, if it exists at all.
    async fn current_digest(&self, reference: &Reference) -> Result<Option<Digest>>;

    /// Copy the manifest and all layers from `source` to `target`.
    async fn copy(&self, source: &Reference, target: &Reference) -> Result<()>;

    /// Pull the raw bytes of a single-layer image's one layer (§4.5).
    async fn pull_single_layer(&self, reference: &str) -> Result<Vec<u8>>;

    /// Push `layer` as a fresh single-layer image to `reference` (§4.5).
    async fn push_single_layer(&self, reference: &str, layer: Vec<u8>) -> Result<()>;
}

/// The real [`RegistryClient`], backed by [`oci_client::Client`].
pub struct OciRegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl OciRegistryClient {
    /// Build a client with the given auth, applied uniformly to every call.
    /// Per spec §1, registry auth management is delegated to this
    /// collaborator and out of scope for the rest of the pipeline.
    pub fn new(auth: RegistryAuth) -> Self {
        Self {
            client: Client::new(ClientConfig::default()),
            auth,
        }
    }

    async fn pull_manifest(&self, reference: &Reference) -> Result<(OciImageManifest, String)> {
        let oci_ref = to_oci_reference(reference);
        self.client
            .pull_image_manifest(&oci_ref, &self.auth)
            .await
            .with_context(|| format!("pull manifest for {reference}"))
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn resolve_digest(&self, reference: &Reference) -> Result<Digest> {
        let (_manifest, digest) = self.pull_manifest(reference).await?;
        Digest::parse(digest).context("registry returned a malformed digest")
    }

    async fn current_digest(&self, reference: &Reference) -> Result<Option<Digest>> {
        match self.pull_manifest(reference).await {
            Ok((_manifest, digest)) => Ok(Some(
                Digest::parse(digest).context("registry returned a malformed digest")?,
            )),
            Err(_) => Ok(None),
        }
    }

    async fn copy(&self, source: &Reference, target: &Reference) -> Result<()> {
        let source_ref = to_oci_reference(source);
        let target_ref = to_oci_reference(target);

        // Pull the full image (manifest, config and every layer) into
        // memory and re-push it whole; simpler and more portable across
        // registries than streaming layer-by-layer, at the cost of holding
        // one image's blobs in memory per concurrent copy task.
        let image = self
            .client
            .pull(
                &source_ref,
                &self.auth,
                vec!["application/vnd.oci.image.manifest.v1+json", "application/vnd.docker.distribution.manifest.v2+json"],
            )
            .await
            .map_err(|e| color_eyre::eyre::eyre!("{e}"))
            .with_context(|| format!("pull image for {source}"))?;

        self.client
            .push(&target_ref, &image, &self.auth)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("{e}"))
            .with_context(|| format!("push image to {target}"))?;

        Ok(())
    }

    async fn pull_single_layer(&self, reference: &str) -> Result<Vec<u8>> {
        let oci_ref: oci_client::Reference = reference
            .parse()
            .with_context(|| format!("parse mapping image reference {reference}"))?;
        let image = self
            .client
            .pull(&oci_ref, &self.auth, vec![MAPPING_LAYER_MEDIA_TYPE])
            .await
            .map_err(|e| color_eyre::eyre::eyre!("{e}"))
            .with_context(|| format!("pull mapping image {reference}"))?;
        let layer = image
            .layers
            .into_iter()
            .next()
            .ok_or_else(|| color_eyre::eyre::eyre!("mapping image {reference} has no layers"))?;
        Ok(layer.data)
    }

    async fn push_single_layer(&self, reference: &str, layer: Vec<u8>) -> Result<()> {
        let oci_ref: oci_client::Reference = reference
            .parse()
            .with_context(|| format!("parse mapping image reference {reference}"))?;
        let layer = ImageLayer::new(layer, MAPPING_LAYER_MEDIA_TYPE.to_string(), None);
        let config = Config::oci_v1_json(serde_json::to_vec(&serde_json::json!({})).expect("empty config is valid JSON"), None);
        let image = ImageData {
            layers: vec![layer],
            config,
            manifest: None,
            digest: None,
        };
        self.client
            .push(&oci_ref, &image, &self.auth)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("{e}"))
            .with_context(|| format!("push mapping image {reference}"))?;
        Ok(())
    }
}

fn to_oci_reference(reference: &Reference) -> oci_client::Reference {
    use crate::reference::Version;
    match reference.version() {
        Version::Digest(d) => oci_client::Reference::with_digest(
            reference.registry().to_string(),
            reference.repository().to_string(),
            d.to_string(),
        ),
        Version::Tag(t) | Version::TagAndDigest(t, _) => oci_client::Reference::with_tag(
            reference.registry().to_string(),
            reference.repository().to_string(),
            t.clone(),
        ),
    }
}
