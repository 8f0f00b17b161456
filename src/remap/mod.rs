//! The remapper chain (C3, §4.3): an ordered pipeline of single-image
//! transformations applied to every found reference — ignore, static
//! lookup, rename, (implicit) digest resolution, record, ensure-copy.

pub mod digest_cache;
pub mod history;

use std::sync::Arc;

use regex::Regex;
use tracing::instrument;

pub use digest_cache::DigestCache;
pub use history::History;

use crate::error::RemapError;
use crate::mapping::{Mapping, QualifiedImage, SharedMapping};
use crate::reference::{Reference, DEFAULT_REGISTRY};
use crate::registry::RegistryClient;

/// §4.3 item 1: drop images matching a configured regex; the chain
/// continues without appending anything, so the terminal reference stays
/// the original one.
pub struct IgnoreRemapper {
    ignore: Option<Regex>,
}

impl IgnoreRemapper {
    /// Build the ignore step. `ignore` is the `-ignore` flag's regex.
    pub fn new(ignore: Option<Regex>) -> Self {
        Self { ignore }
    }

    /// Whether `reference`'s original string matches the configured regex.
    pub fn matches(&self, reference: &Reference) -> bool {
        self.ignore
            .as_ref()
            .is_some_and(|re| re.is_match(reference.original()))
    }
}

/// §4.3 item 2: look up the original source in a preloaded static mapping.
pub struct StaticRemapper {
    mapping: Option<Arc<Mapping>>,
    mappings_only: bool,
}

impl StaticRemapper {
    /// Build the static lookup step. With no `mapping` loaded this step is
    /// always a pass-through (§4.3 item 3 "active only when no static
    /// mapping exists" still holds trivially).
    pub fn new(mapping: Option<Arc<Mapping>>, mappings_only: bool) -> Self {
        Self {
            mapping,
            mappings_only,
        }
    }

    /// Attempt the lookup. Returns `Ok(true)` if a mapping entry was found
    /// and appended, `Ok(false)` on a pass-through miss, or
    /// [`RemapError::NoMapping`] on a miss while `mappings-only` is active.
    pub fn remap(&self, history: &mut History) -> Result<bool, RemapError> {
        let Some(mapping) = &self.mapping else {
            return Ok(false);
        };
        let source = history.original().original();
        match mapping.get(source) {
            Some(qi) => {
                let target: Reference = qi
                    .tag
                    .parse()
                    .map_err(|e| RemapError::InvalidMappingTarget(source.to_string(), e))?;
                history.push("static", target);
                Ok(true)
            }
            None if self.mappings_only => Err(RemapError::NoMapping(source.to_string())),
            None => Ok(false),
        }
    }
}

/// §4.3 item 3+4: compute a new repository path by template, then resolve
/// and attach the source's current digest. Active only when the static
/// step above was a miss.
pub struct RenameRemapper {
    rename_ignore: Regex,
    /// `(registry, path prefix)` parsed from `-rename-remote-path`, if set.
    target_prefix: Option<(String, String)>,
    template: String,
}

impl RenameRemapper {
    /// Build the rename step. `remote_path` and `template` come from
    /// `-rename-remote-path`/`-rename-template`; per §4.3 item 3, if
    /// `remote_path` is absent renaming is disabled (the reference's
    /// location is kept, only its digest gets pinned).
    pub fn new(rename_ignore: Regex, remote_path: Option<String>, template: String) -> Self {
        let target_prefix = remote_path.map(|rp| split_remote_path(&rp));
        Self {
            rename_ignore,
            target_prefix,
            template,
        }
    }

    /// Apply the rename step, then resolve and attach a digest, appending
    /// one "rename" entry to `history`. No-op if a static mapping already
    /// provided a terminal reference.
    pub async fn remap(
        &self,
        history: &mut History,
        registry: &dyn RegistryClient,
        cache: &DigestCache,
    ) -> Result<(), RemapError> {
        if history.has_entry_from("static") {
            return Ok(());
        }

        let current = history.terminal().clone();

        let renamed = if self.rename_ignore.is_match(current.original()) {
            current.clone()
        } else if let Some((target_registry, prefix)) = &self.target_prefix {
            let rendered = render_template(&self.template, &current);
            let new_repo = if prefix.is_empty() {
                rendered
            } else {
                format!("{prefix}/{rendered}")
            };
            current
                .with_registry(target_registry.clone())
                .with_repository(new_repo)
        } else {
            tracing::info!(image = %current, "rename disabled: no remote path configured, copy disabled");
            current.clone()
        };

        let digest = match current.version().digest() {
            Some(digest) => digest.clone(),
            None => cache.resolve(registry, &current).await?,
        };

        let output = renamed.with_digest(digest);
        history.push("rename", output);
        Ok(())
    }
}

/// Split a `-rename-remote-path` value into `(registry, path prefix)`
/// using the same registry-host heuristic as [`Reference::from_str`]:
/// a leading segment containing `.`/`:` or equal to `localhost` is a host.
fn split_remote_path(remote_path: &str) -> (String, String) {
    match remote_path.split_once('/') {
        Some((head, tail)) if head.contains('.') || head.contains(':') || head == "localhost" => {
            (head.to_string(), tail.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), remote_path.to_string()),
    }
}

/// Expand `{{.Registry}}`, `{{.Repository}}`, `{{.Tag}}` and `{{.Digest}}`
/// tokens in `template` against `reference` (§4.3 item 3: "a string
/// template over `{registry, repository, tag, digest}`"). This is a plain
/// substitution, not a full template engine, in keeping with the finder's
/// pluggable pure-function extractor (§4.2).
fn render_template(template: &str, reference: &Reference) -> String {
    let tag = reference.version().tag().unwrap_or_default();
    let digest = reference
        .version()
        .digest()
        .map(ToString::to_string)
        .unwrap_or_default();
    template
        .replace("{{.Registry}}", reference.registry())
        .replace("{{.Repository}}", reference.repository())
        .replace("{{.Tag}}", tag)
        .replace("{{.Digest}}", &digest)
}

/// §4.3 item 5: commit `original -> QualifiedImage` into the shared
/// mapping once the chain's digest is known. `FoundCVEs`/`IgnoredCVEs`
/// start empty; C6 fills them in later (§3 invariant 3).
pub struct RecorderRemapper {
    mapping: SharedMapping,
}

impl RecorderRemapper {
    /// Build the recorder step over a shared, lock-guarded mapping.
    pub fn new(mapping: SharedMapping) -> Self {
        Self { mapping }
    }

    /// The shared mapping this recorder commits into.
    pub fn mapping(&self) -> SharedMapping {
        self.mapping.clone()
    }

    /// Commit `history`'s terminal reference, unless `history` was
    /// ignored. Enforces the Recorder invariant via [`Mapping::record`].
    pub async fn commit(&self, history: &History) -> Result<(), RemapError> {
        if history.is_ignored() {
            return Ok(());
        }
        let terminal = history.terminal();
        let digest = terminal
            .version()
            .digest()
            .expect("a non-ignored image is always digest-pinned after the chain (§3 invariant 2)");
        let qi = QualifiedImage {
            tag: terminal.canonical(),
            digest: digest.to_string(),
            found_cves: Vec::new(),
            ignored_cves: Vec::new(),
        };
        let mut mapping = self.mapping.lock().await;
        mapping.record(history.original().original().to_string(), qi)
    }
}

/// No-clobber or clobber semantics for [`EnsureRemapper`] (§4.3 item 6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum CopyMode {
    /// Skip when the target exists with the expected digest; fail if it
    /// exists with a different one.
    NoClobber,
    /// Always overwrite the target.
    Clobber,
}

/// §4.3 item 6: copy the source manifest+layers to the target reference,
/// unless copying is disabled (`-no-copy`) or this is a dry run.
pub struct EnsureRemapper {
    registry: Arc<dyn RegistryClient>,
    mode: CopyMode,
    dry_run: bool,
    enabled: bool,
    max_attempts: u32,
}

impl EnsureRemapper {
    /// Build the copy step. `enabled` is `!no_copy`.
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        mode: CopyMode,
        dry_run: bool,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            mode,
            dry_run,
            enabled,
            max_attempts: 5,
        }
    }

    /// Copy `history`'s source to its terminal reference if needed.
    #[instrument(skip(self, history), fields(image = %history.original()))]
    pub async fn ensure(&self, history: &History) -> Result<(), RemapError> {
        if !self.enabled || history.is_ignored() {
            return Ok(());
        }

        let source = history.original();
        let target = history.terminal();
        if source.registry() == target.registry() && source.repository() == target.repository() {
            // No rename happened: the target *is* the source location, so
            // there is nothing to copy, only a digest to have resolved.
            return Ok(());
        }

        let expected_digest = target
            .version()
            .digest()
            .expect("target is always digest-pinned after the chain");

        let existing = self
            .registry
            .current_digest(target)
            .await
            .map_err(|cause| RemapError::Copy {
                source_ref: source.canonical(),
                target_ref: target.canonical(),
                cause,
            })?;

        match (existing, self.mode) {
            (Some(d), _) if &d == expected_digest => return Ok(()),
            (Some(_), CopyMode::NoClobber) => {
                return Err(RemapError::TargetExists(target.canonical()));
            }
            _ => {}
        }

        if self.dry_run {
            tracing::info!(from = %source, to = %target, "dry-run: would copy image");
            return Ok(());
        }

        let source_ref = source.clone();
        let target_ref = target.clone();
        crate::backoff::retry(self.max_attempts, || {
            let registry = self.registry.clone();
            let source_ref = source_ref.clone();
            let target_ref = target_ref.clone();
            async move { registry.copy(&source_ref, &target_ref).await }
        })
        .await
        .map_err(|cause| RemapError::Copy {
            source_ref: source.canonical(),
            target_ref: target.canonical(),
            cause,
        })
    }
}

/// The full ordered pipeline applied to each found image (§4.3): ignore,
/// static, rename (with implicit digest resolution), record, ensure-copy.
pub struct Chain {
    ignore: IgnoreRemapper,
    static_remapper: StaticRemapper,
    rename: RenameRemapper,
    registry: Arc<dyn RegistryClient>,
    digest_cache: DigestCache,
    recorder: RecorderRemapper,
    ensure: EnsureRemapper,
}

impl Chain {
    /// Assemble the chain from its steps.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ignore: IgnoreRemapper,
        static_remapper: StaticRemapper,
        rename: RenameRemapper,
        registry: Arc<dyn RegistryClient>,
        recorder: RecorderRemapper,
        ensure: EnsureRemapper,
    ) -> Self {
        Self {
            ignore,
            static_remapper,
            rename,
            registry,
            digest_cache: DigestCache::new(),
            recorder,
            ensure,
        }
    }

    /// The shared mapping this chain's recorder commits into.
    pub fn mapping(&self) -> SharedMapping {
        self.recorder.mapping()
    }

    /// Run `original` through the full chain (§4.3), returning its
    /// [`History`]. `ErrSkip` short-circuits to an ignored history rather
    /// than propagating, per the error table in §7.
    pub async fn run(&self, original: Reference) -> Result<History, RemapError> {
        let mut history = History::new(original.clone());

        if self.ignore.matches(&original) {
            history.mark_ignored();
            return Ok(history);
        }

        let applied = self.static_remapper.remap(&mut history)?;
        if !applied {
            self.rename
                .remap(&mut history, self.registry.as_ref(), &self.digest_cache)
                .await?;
        }

        self.recorder.commit(&history).await?;
        self.ensure.ensure(&history).await?;

        Ok(history)
    }
}
