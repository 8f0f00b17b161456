//! The Updater (C4, §4.4): drives the finder over each document in a
//! manifest stream, applies the remapper chain to every hit, and writes
//! the transformed documents back in input order.

use std::collections::HashMap;
use std::io::Write;

use color_eyre::eyre::{Context, Result};
use serde::Deserialize;
use serde_yaml::Value;

use crate::finder::{HitKind, ImageFinder, RuleSet};
use crate::remap::Chain;

/// Read every YAML document from `input`, rewrite each located image
/// reference through `chain`, and write the transformed documents to
/// `output`. Output document order matches input order; `---` separators
/// are regenerated deterministically rather than byte-preserved (§4.4).
pub async fn run(
    input: &str,
    output: &mut impl Write,
    rules: &RuleSet,
    chain: &Chain,
    force_digest: bool,
) -> Result<()> {
    let finder = ImageFinder::new(rules);

    for document in serde_yaml::Deserializer::from_str(input) {
        let mut doc = Value::deserialize(document).context("decode manifest document")?;
        if doc.is_null() {
            continue;
        }

        apply_chain_to_document(&finder, &mut doc, chain, force_digest).await?;

        writeln!(output, "---").context("write document separator")?;
        let rendered = serde_yaml::to_string(&doc).context("serialize manifest document")?;
        write!(output, "{rendered}").context("write manifest document")?;
    }

    Ok(())
}

/// Find and rewrite every image reference in one decoded document.
/// Direct image scalars are overwritten wholesale; template scalars have
/// only the matched reference substring replaced, so the surrounding
/// template text survives (§4.2 "template-paths").
async fn apply_chain_to_document(
    finder: &ImageFinder<'_>,
    doc: &mut Value,
    chain: &Chain,
    force_digest: bool,
) -> Result<()> {
    let found = finder.find(doc);

    let mut image_edits = Vec::new();
    let mut template_edits: HashMap<String, (crate::finder::Hit, String)> = HashMap::new();

    for hit in found {
        let original: crate::reference::Reference = match hit.reference.parse() {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(path = %hit.hit, reference = %hit.reference, error = %err, "skipping unparsable image reference");
                continue;
            }
        };

        let history = chain
            .run(original)
            .await
            .with_context(|| format!("remap image at {}", hit.hit))?;
        if history.is_ignored() {
            continue;
        }
        let written = history.terminal().written_form(force_digest);

        match hit.hit.kind {
            HitKind::Image => image_edits.push((hit.hit, written)),
            HitKind::Template => {
                let key = hit.hit.to_string();
                let entry = template_edits.entry(key).or_insert_with(|| {
                    let current = hit.hit.get(doc).unwrap_or_default().to_string();
                    (hit.hit.clone(), current)
                });
                entry.1 = entry.1.replace(&hit.reference, &written);
            }
        }
    }

    for (hit, written) in image_edits {
        hit.set(doc, written);
    }
    for (_, (hit, text)) in template_edits {
        hit.set(doc, text);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mapping;
    use crate::registry::RegistryClient;
    use crate::remap::{Chain, CopyMode, EnsureRemapper, IgnoreRemapper, RecorderRemapper, RenameRemapper, StaticRemapper};
    use async_trait::async_trait;
    use regex::Regex;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct FakeRegistry;

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn resolve_digest(
            &self,
            _reference: &crate::reference::Reference,
        ) -> Result<crate::reference::Digest> {
            crate::reference::Digest::parse("sha256:".to_string() + &"a".repeat(64))
                .map_err(Into::into)
        }

        async fn current_digest(
            &self,
            _reference: &crate::reference::Reference,
        ) -> Result<Option<crate::reference::Digest>> {
            Ok(None)
        }

        async fn copy(
            &self,
            _source: &crate::reference::Reference,
            _target: &crate::reference::Reference,
        ) -> Result<()> {
            Ok(())
        }

        async fn pull_single_layer(&self, _reference: &str) -> Result<Vec<u8>> {
            unimplemented!()
        }

        async fn push_single_layer(&self, _reference: &str, _layer: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    fn test_chain() -> Chain {
        let registry: Arc<dyn RegistryClient> = Arc::new(FakeRegistry);
        let mapping = Arc::new(Mutex::new(Mapping::new()));
        Chain::new(
            IgnoreRemapper::new(None),
            StaticRemapper::new(None, false),
            RenameRemapper::new(
                Regex::new("^$").unwrap(),
                Some("registry.example.com/mirror".to_string()),
                "{{.Repository}}".to_string(),
            ),
            registry.clone(),
            RecorderRemapper::new(mapping),
            EnsureRemapper::new(registry, CopyMode::NoClobber, false, false),
        )
    }

    #[tokio::test]
    async fn rewrites_pod_image_in_place() {
        let input = "kind: Pod\napiVersion: v1\nspec:\n  containers:\n    - image: nginx:1.25\n";
        let rules = RuleSet::compile(&[]).unwrap();
        let chain = test_chain();
        let mut out = Vec::new();
        run(input, &mut out, &rules, &chain, false).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("registry.example.com/mirror/library/nginx:1.25@sha256:"));
    }

    #[tokio::test]
    async fn force_digest_drops_the_tag() {
        let input = "kind: Pod\napiVersion: v1\nspec:\n  containers:\n    - image: nginx:1.25\n";
        let rules = RuleSet::compile(&[]).unwrap();
        let chain = test_chain();
        let mut out = Vec::new();
        run(input, &mut out, &rules, &chain, true).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains(":1.25@"));
        assert!(text.contains("nginx@sha256:"));
    }

    #[tokio::test]
    async fn preserves_document_order_and_count() {
        let input = "kind: Pod\napiVersion: v1\nspec:\n  containers:\n    - image: a:1\n---\nkind: Pod\napiVersion: v1\nspec:\n  containers:\n    - image: b:1\n";
        let rules = RuleSet::compile(&[]).unwrap();
        let chain = test_chain();
        let mut out = Vec::new();
        run(input, &mut out, &rules, &chain, false).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        let a_pos = text.find("library/a").unwrap();
        let b_pos = text.find("library/b").unwrap();
        assert!(a_pos < b_pos);
        assert_eq!(text.matches("---").count(), 2);
    }
}
