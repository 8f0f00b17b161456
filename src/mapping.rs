//! The mapping (§3 "Mapping") and the static mapping store (C5, §4.5):
//! source-reference -> [`QualifiedImage`], loadable from and writable to
//! either a plain JSON file or a single-layer OCI image.

use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::{MappingError, RemapError};
use crate::registry::RegistryClient;
use crate::vuln::Cve;

/// The name of the single file inside a static-mapping OCI image's one
/// layer (§4.5).
pub const MAPPING_FILE_NAME: &str = "reimage-mapping.json";

/// The record produced for a source reference (§3 "QualifiedImage").
/// Field names and casing match the on-disk JSON shape exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualifiedImage {
    /// The canonical post-rename target reference, including tag.
    #[serde(rename = "Tag")]
    pub tag: String,
    /// The resolved content digest, `sha256:...`. Always set once
    /// processing completes (§3 invariant 2).
    #[serde(rename = "Digest")]
    pub digest: String,
    /// CVEs at or above the policy threshold. Empty until C6 runs; never
    /// `null` afterward (§3 invariant 3). Omitted from the serialized form
    /// when empty, so a static mapping file that never mentions CVEs
    /// round-trips byte-for-byte (§8 scenario 3).
    #[serde(rename = "FoundCVEs", default, skip_serializing_if = "Vec::is_empty")]
    pub found_cves: Vec<Cve>,
    /// CVEs suppressed by the ignore list. Same round-trip treatment as
    /// `found_cves`.
    #[serde(rename = "IgnoredCVEs", default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_cves: Vec<Cve>,
}

/// A total function from source reference string to [`QualifiedImage`],
/// accumulated in execution order (§3 "Mapping"). Iteration order matches
/// insertion order, so a reloaded mapping round-trips byte-for-byte.
#[derive(Clone, Default, Debug)]
pub struct Mapping {
    entries: Vec<(String, QualifiedImage)>,
}

impl Mapping {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry recorded for `source`, if any.
    pub fn get(&self, source: &str) -> Option<&QualifiedImage> {
        self.entries.iter().find(|(k, _)| k == source).map(|(_, v)| v)
    }

    /// A mutable handle onto the entry recorded for `source`, if any.
    pub fn get_mut(&mut self, source: &str) -> Option<&mut QualifiedImage> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == source)
            .map(|(_, v)| v)
    }

    /// Record `source -> image`, enforcing the Recorder invariant (§3,
    /// §4.3 item 5): a repeat observation of `source` must produce an
    /// identical result, or this is [`RemapError::MappingConflict`].
    pub fn record(&mut self, source: String, image: QualifiedImage) -> Result<(), RemapError> {
        if let Some(existing) = self.get(&source) {
            if existing.tag == image.tag && existing.digest == image.digest {
                return Ok(());
            }
            return Err(RemapError::MappingConflict(source));
        }
        self.entries.push((source, image));
        Ok(())
    }

    /// Every source key, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Every `(source, image)` pair, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &QualifiedImage)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every `(source, image)` pair, mutably, in insertion order — used by
    /// C6 to merge vulnerability results back in (§5 "merge into the
    /// mapping under a single mutex").
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut QualifiedImage)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Every unique digest recorded, first-seen order (§4.8, §8 scenario 6:
    /// "copy executed once (de-dupe by target within one run)").
    pub fn unique_digests(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for (_, qi) in &self.entries {
            if seen.insert(qi.digest.clone()) {
                out.push(qi.digest.clone());
            }
        }
        out
    }

    /// The number of recorded sources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no sources have been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Mapping {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Mapping {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // `serde_json::Map` preserves insertion order when the `preserve_order`
        // feature is enabled (it is, in this crate's `Cargo.toml`), so a
        // reloaded mapping's key order matches the file on disk exactly.
        let map: Map<String, serde_json::Value> = Map::deserialize(deserializer)?;
        let mut entries = Vec::with_capacity(map.len());
        for (k, v) in map {
            let qi: QualifiedImage = serde_json::from_value(v).map_err(serde::de::Error::custom)?;
            entries.push((k, qi));
        }
        Ok(Self { entries })
    }
}

/// Load a mapping from a local JSON file (§4.5).
pub async fn load_file(path: &Path) -> Result<Mapping> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read mapping file {}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(MappingError::Decode)
        .with_context(|| format!("decode mapping file {}", path.display()))
}

/// Write a mapping to a local JSON file, UTF-8, no BOM, insertion order
/// preserved (§4.5 "on-disk layout is stable"). Written via a sibling
/// temporary file and renamed into place so a reader never observes a
/// partially written mapping.
pub async fn save_file(path: &Path, mapping: &Mapping) -> Result<()> {
    let data = serde_json::to_string_pretty(mapping).context("encode mapping as JSON")?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temporary file alongside {}", path.display()))?;
        std::io::Write::write_all(&mut temp, data.as_bytes()).context("write mapping contents")?;
        temp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("persist mapping file {}", path.display()))?;
        Ok(())
    })
    .await
    .context("join mapping-file write task")?
}

/// Load a mapping from a single-layer OCI image whose only layer is a tar
/// containing one file named [`MAPPING_FILE_NAME`] (§4.5).
pub async fn load_image(
    registry: &dyn RegistryClient,
    reference: &str,
) -> Result<Mapping> {
    let bytes = registry
        .pull_single_layer(reference)
        .await
        .with_context(|| format!("pull mapping image {reference}"))?;
    let data = tar_extract_one(&bytes, MAPPING_FILE_NAME)
        .with_context(|| format!("extract {MAPPING_FILE_NAME} from mapping image {reference}"))?;
    serde_json::from_slice(&data)
        .map_err(MappingError::Decode)
        .with_context(|| format!("decode mapping image {reference}"))
}

/// Push a mapping as a fresh single-layer image to `reference` (§4.5).
pub async fn save_image(
    registry: &dyn RegistryClient,
    reference: &str,
    mapping: &Mapping,
) -> Result<()> {
    let data = serde_json::to_vec_pretty(mapping).context("encode mapping as JSON")?;
    let tar = tar_build_one(MAPPING_FILE_NAME, &data).context("build mapping tar layer")?;
    registry
        .push_single_layer(reference, tar)
        .await
        .with_context(|| format!("push mapping image {reference}"))
}

/// If `VerifyStaticMappings` is on, re-resolve every target's digest
/// against the registry and abort with [`MappingError::Stale`] on any
/// mismatch (§4.5, §3 "Lifecycle").
pub async fn verify(registry: &dyn RegistryClient, mapping: &Mapping) -> Result<()> {
    for (source, qi) in mapping.iter() {
        let target: crate::reference::Reference = qi
            .tag
            .parse()
            .with_context(|| format!("static mapping target for {source} is not a valid reference"))?;
        let live = registry
            .current_digest(&target)
            .await
            .with_context(|| format!("re-resolve digest for {}", qi.tag))?;
        let Some(live) = live else {
            return Err(MappingError::Stale {
                reference: source.to_string(),
                recorded: qi.digest.clone(),
                live: "<missing>".to_string(),
            }
            .into());
        };
        if live.as_ref() != qi.digest {
            return Err(MappingError::Stale {
                reference: source.to_string(),
                recorded: qi.digest.clone(),
                live: live.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Build a single-entry (uncompressed) tar archive containing `name -> data`.
fn tar_build_one(name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, name, data)
        .context("append tar entry")?;
    builder.into_inner().context("finish tar archive")
}

/// Extract the single file named `name` from an (optionally gzip
/// compressed) tar archive.
fn tar_extract_one(bytes: &[u8], name: &str) -> Result<Vec<u8>> {
    use std::io::Read;

    let reader: Box<dyn Read> = if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        Box::new(flate2::read::GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().context("read tar entries")? {
        let mut entry = entry.context("read tar entry")?;
        if entry.path().context("read tar entry path")?.to_string_lossy() == name {
            let mut out = Vec::new();
            entry.read_to_end(&mut out).context("read tar entry contents")?;
            return Ok(out);
        }
    }
    color_eyre::eyre::bail!("tar archive did not contain {name}")
}

/// A shared, lock-guarded mapping accumulator, built by the recorder as
/// images flow through the chain.
pub type SharedMapping = Arc<tokio::sync::Mutex<Mapping>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn qi(tag: &str, digest: &str) -> QualifiedImage {
        QualifiedImage {
            tag: tag.to_string(),
            digest: digest.to_string(),
            found_cves: Vec::new(),
            ignored_cves: Vec::new(),
        }
    }

    #[test]
    fn record_is_idempotent_for_identical_results() {
        let mut mapping = Mapping::new();
        mapping
            .record("nginx:1.25".to_string(), qi("mirror/nginx:1.25", "sha256:aaaa"))
            .unwrap();
        mapping
            .record("nginx:1.25".to_string(), qi("mirror/nginx:1.25", "sha256:aaaa"))
            .unwrap();
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn record_conflict_on_differing_result() {
        let mut mapping = Mapping::new();
        mapping
            .record("nginx:1.25".to_string(), qi("mirror/nginx:1.25", "sha256:aaaa"))
            .unwrap();
        let err = mapping
            .record("nginx:1.25".to_string(), qi("mirror/nginx:1.25", "sha256:bbbb"))
            .unwrap_err();
        assert!(matches!(err, RemapError::MappingConflict(_)));
    }

    #[test]
    fn unique_digests_deduplicates_preserving_order() {
        let mut mapping = Mapping::new();
        mapping
            .record("a:1".to_string(), qi("mirror/a:1", "sha256:aaaa"))
            .unwrap();
        mapping
            .record("b:1".to_string(), qi("mirror/b:1", "sha256:aaaa"))
            .unwrap();
        mapping
            .record("c:1".to_string(), qi("mirror/c:1", "sha256:cccc"))
            .unwrap();
        assert_eq!(mapping.unique_digests(), vec!["sha256:aaaa", "sha256:cccc"]);
    }

    #[test]
    fn serializes_preserving_insertion_order() {
        let mut mapping = Mapping::new();
        mapping
            .record("b:1".to_string(), qi("mirror/b:1", "sha256:bbbb"))
            .unwrap();
        mapping
            .record("a:1".to_string(), qi("mirror/a:1", "sha256:aaaa"))
            .unwrap();
        let json = serde_json::to_string(&mapping).unwrap();
        assert!(json.find("\"b:1\"").unwrap() < json.find("\"a:1\"").unwrap());
    }

    #[test]
    fn tar_round_trips_one_file() {
        let tar = tar_build_one(MAPPING_FILE_NAME, b"{\"a\":1}").unwrap();
        let out = tar_extract_one(&tar, MAPPING_FILE_NAME).unwrap();
        assert_eq!(out, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn save_file_then_load_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reimage-mapping.json");

        let mut mapping = Mapping::new();
        mapping
            .record("nginx:1.25".to_string(), qi("mirror/nginx:1.25", "sha256:aaaa"))
            .unwrap();

        save_file(&path, &mapping).await.unwrap();
        let loaded = load_file(&path).await.unwrap();

        assert_eq!(loaded.get("nginx:1.25"), mapping.get("nginx:1.25"));
        assert!(path.exists());
    }

    /// §8 scenario 3: a static mapping file with no `FoundCVEs`/`IgnoredCVEs`
    /// keys, loaded then written back unchanged, round-trips byte-for-byte.
    #[tokio::test]
    async fn static_mapping_file_round_trips_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.json");
        let output_path = dir.path().join("output.json");

        let input = "{\n  \"nginx:1.25\": {\n    \"Tag\": \"mirror/nginx:1.25\",\n    \"Digest\": \"sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\"\n  }\n}";
        tokio::fs::write(&input_path, input).await.unwrap();

        let mapping = load_file(&input_path).await.unwrap();
        save_file(&output_path, &mapping).await.unwrap();
        let output = tokio::fs::read_to_string(&output_path).await.unwrap();

        assert_eq!(output, input);
    }
}
