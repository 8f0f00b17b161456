//! Process-local digest cache (§4.3 item 4, design note "Digest cache").
//!
//! Keyed by `(registry, repository, tag)`; safe for concurrent reads, with
//! writes serialized through a `RwLock`. This is the only shared mutable
//! structure in the remapper chain's hot path.

use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::eyre::Result;
use tokio::sync::RwLock;

use crate::error::RemapError;
use crate::reference::{Digest, Reference};
use crate::registry::RegistryClient;

type Key = (String, String, String);

/// Shared, cloneable handle onto the process digest cache.
#[derive(Clone, Default)]
pub struct DigestCache {
    inner: Arc<RwLock<HashMap<Key, Digest>>>,
}

impl DigestCache {
    /// Build an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `reference`'s current digest, consulting the cache first and
    /// populating it on a miss. `reference` must carry a tag (only tags are
    /// cached; a reference that's already digest-pinned should not call
    /// this).
    pub async fn resolve(
        &self,
        registry: &dyn RegistryClient,
        reference: &Reference,
    ) -> Result<Digest, RemapError> {
        let tag = reference
            .version()
            .tag()
            .expect("resolve is only called for tag-bearing references")
            .to_string();
        let key = (
            reference.registry().to_string(),
            reference.repository().to_string(),
            tag,
        );

        if let Some(digest) = self.inner.read().await.get(&key) {
            return Ok(digest.clone());
        }

        let digest = registry
            .resolve_digest(reference)
            .await
            .map_err(|source| RemapError::DigestResolve {
                reference: reference.original().to_string(),
                source,
            })?;

        self.inner.write().await.insert(key, digest.clone());
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: AtomicUsize,
        digest: Digest,
    }

    #[async_trait]
    impl RegistryClient for CountingClient {
        async fn resolve_digest(&self, _reference: &Reference) -> Result<Digest> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.digest.clone())
        }

        async fn current_digest(&self, _reference: &Reference) -> Result<Option<Digest>> {
            Ok(Some(self.digest.clone()))
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

    #[tokio::test]
    async fn caches_repeated_resolutions() {
        let digest = Digest::parse("sha256:".to_string() + &"a".repeat(64)).unwrap();
        let client = CountingClient {
            calls: AtomicUsize::new(0),
            digest: digest.clone(),
        };
        let cache = DigestCache::new();
        let reference: Reference = "nginx:1.25".parse().unwrap();

        let first = cache.resolve(&client, &reference).await.unwrap();
        let second = cache.resolve(&client, &reference).await.unwrap();

        assert_eq!(first, digest);
        assert_eq!(second, digest);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
