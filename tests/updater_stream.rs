//! Fixture-backed round-trip test for the updater's stream transform
//! (§4.4, §8 "stream round-trip property"): document order, document
//! count and documents with no image reference all survive a full pass
//! through the finder + remapper chain.

use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::Result;
use regex::Regex;
use reimage::finder::RuleSet;
use reimage::mapping::Mapping;
use reimage::reference::{Digest, Reference};
use reimage::registry::RegistryClient;
use reimage::remap::{Chain, CopyMode, EnsureRemapper, IgnoreRemapper, RecorderRemapper, RenameRemapper, StaticRemapper};
use tokio::sync::Mutex;

struct FakeRegistry;

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn resolve_digest(&self, _reference: &Reference) -> Result<Digest> {
        Digest::parse("sha256:".to_string() + &"f".repeat(64)).map_err(Into::into)
    }

    async fn current_digest(&self, _reference: &Reference) -> Result<Option<Digest>> {
        Ok(None)
    }

    async fn copy(&self, _source: &Reference, _target: &Reference) -> Result<()> {
        Ok(())
    }

    async fn pull_single_layer(&self, _reference: &str) -> Result<Vec<u8>> {
        unimplemented!()
    }

    async fn push_single_layer(&self, _reference: &str, _layer: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

fn build_chain() -> Chain {
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
        EnsureRemapper::new(registry, CopyMode::NoClobber, false, true),
    )
}

#[tokio::test]
async fn multi_document_stream_round_trips_order_and_count() {
    let input = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/multi_doc.yaml"))
        .expect("read fixture");

    let rules = RuleSet::compile(&[]).expect("compile rules");
    let chain = build_chain();
    let mut out = Vec::new();

    reimage::updater::run(&input, &mut out, &rules, &chain, false)
        .await
        .expect("run updater");

    let text = String::from_utf8(out).expect("utf8 output");

    assert_eq!(text.matches("---").count(), 3, "one separator per input document");

    let web_pos = text.find("name: web").expect("web document present");
    let sidecar_pos = text.find("sidecar-check").expect("sidecar document present");
    let configmap_pos = text.find("not-a-workload").expect("configmap document present");
    assert!(web_pos < sidecar_pos);
    assert!(sidecar_pos < configmap_pos);

    assert!(text.contains("registry.example.com/mirror/library/nginx:1.25@sha256:"));
    assert!(text.contains("registry.example.com/mirror/library/redis:7@sha256:"));

    assert!(text.contains("this document has no image field at all"));
}
