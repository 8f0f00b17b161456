//! Container image reference parsing, formatting and digest handling (C1).
//!
//! A [`Reference`] preserves the exact string it was parsed from for use as
//! a mapping key, while also exposing the canonical, default-applied form
//! used when writing a reference back into a manifest.

use std::fmt;
use std::str::FromStr;

use derive_more::derive::Display;
use nutype::nutype;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::ReferenceError;

/// The registry host substituted when a reference omits one.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";
/// The repository prefix substituted for single-segment Docker Hub names.
pub const DEFAULT_NAMESPACE: &str = "library";
/// The tag substituted when a reference has neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

static DIGEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("static digest regex"));

/// A validated `sha256:<64 hex chars>` content digest.
#[nutype(
    validate(regex = DIGEST_RE),
    derive(Clone, Eq, PartialEq, Hash, Debug, Display, Serialize, Deserialize, AsRef)
)]
pub struct Digest(String);

impl Digest {
    /// Parse a digest string, returning [`ReferenceError::InvalidDigest`] on mismatch.
    pub fn parse(s: impl Into<String>) -> Result<Self, ReferenceError> {
        let s = s.into();
        Self::try_new(s.clone()).map_err(|_| ReferenceError::InvalidDigest(s))
    }
}

/// The tag/digest half of a [`Reference`].
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Version {
    /// A mutable named tag, e.g. `latest` or `v1.2.3`.
    Tag(String),
    /// An immutable content digest.
    Digest(Digest),
    /// Both a tag and a digest, e.g. `v1.2.3@sha256:...`.
    TagAndDigest(String, Digest),
}

impl Version {
    /// The tag component, if any.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Version::Tag(t) | Version::TagAndDigest(t, _) => Some(t),
            Version::Digest(_) => None,
        }
    }

    /// The digest component, if any.
    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Version::Digest(d) | Version::TagAndDigest(_, d) => Some(d),
            Version::Tag(_) => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Tag(tag) => write!(f, ":{tag}"),
            Version::Digest(digest) => write!(f, "@{digest}"),
            Version::TagAndDigest(tag, digest) => write!(f, ":{tag}@{digest}"),
        }
    }
}

/// A parsed container image reference.
///
/// `original` is the exact string this value was parsed from (used as a
/// mapping key); `registry`/`repository`/`version` are the decomposed,
/// default-applied fields used to produce a canonical form.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Reference {
    original: String,
    registry: String,
    repository: String,
    version: Version,
}

impl Reference {
    /// The exact string this reference was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The registry host, with defaults applied.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The repository path, with defaults applied.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag/digest portion.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether this reference carries a digest (tag-only references do not).
    pub fn is_digest_pinned(&self) -> bool {
        self.version.digest().is_some()
    }

    /// Whether this reference carries only a tag, no digest.
    pub fn is_tag_pinned(&self) -> bool {
        matches!(self.version, Version::Tag(_))
    }

    /// Returns a copy of this reference with `digest` attached, preserving
    /// any existing tag. Per §4.1, `withDigest`.
    pub fn with_digest(&self, digest: Digest) -> Self {
        let version = match &self.version {
            Version::Tag(tag) | Version::TagAndDigest(tag, _) => {
                Version::TagAndDigest(tag.clone(), digest)
            }
            Version::Digest(_) => Version::Digest(digest),
        };
        Self {
            original: self.original.clone(),
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            version,
        }
    }

    /// Returns a copy with the repository replaced, keeping registry/version.
    /// Per §4.1, `repo`.
    pub fn with_repository(&self, repository: impl Into<String>) -> Self {
        Self {
            original: self.original.clone(),
            registry: self.registry.clone(),
            repository: repository.into(),
            version: self.version.clone(),
        }
    }

    /// Returns a copy with the registry replaced.
    pub fn with_registry(&self, registry: impl Into<String>) -> Self {
        Self {
            original: self.original.clone(),
            registry: registry.into(),
            repository: self.repository.clone(),
            version: self.version.clone(),
        }
    }

    /// The canonical `repo@digest` form regardless of any tag present.
    /// Per §4.1, `digestRef`.
    pub fn digest_ref(&self, digest: &Digest) -> String {
        format!("{}/{}@{}", self.registry, self.repository, digest)
    }

    /// The canonical string form: `registry/repository[:tag][@digest]`,
    /// with defaults applied. Unlike [`Reference::original`], this always
    /// includes the registry host.
    pub fn canonical(&self) -> String {
        format!("{}/{}{}", self.registry, self.repository, self.version)
    }

    /// The form written back into a manifest (§4.4): `repo@sha256:...`
    /// when `force_digest` is set, otherwise the full canonical form
    /// (`repo:tag@sha256:...` when both are present).
    ///
    /// # Panics
    /// Panics if this reference is not digest-pinned; the chain guarantees
    /// every non-ignored output is (§3 invariant 2).
    pub fn written_form(&self, force_digest: bool) -> String {
        let digest = self
            .version
            .digest()
            .expect("written_form is only called on digest-pinned references");
        if force_digest {
            self.digest_ref(digest)
        } else {
            self.canonical()
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ReferenceError::InvalidReference(s.to_string()));
        }
        let original = s.to_string();

        // Split off a leading `registry[:port]/` component. A segment before
        // the first `/` is a registry host iff it contains a `.`, a `:`, or
        // is literally `localhost`; otherwise the whole string is a
        // single-segment Docker Hub repository name.
        let (registry, rest) = match s.split_once('/') {
            Some((head, tail)) if head.contains('.') || head.contains(':') || head == "localhost" => {
                (head.to_string(), tail)
            }
            _ => (DEFAULT_REGISTRY.to_string(), s),
        };

        if rest.is_empty() {
            return Err(ReferenceError::InvalidReference(original));
        }

        // Pull off `@sha256:...` first since digests themselves contain `:`.
        let (name_and_tag, digest) = match rest.split_once('@') {
            Some((head, digest)) => {
                let digest = Digest::parse(digest)
                    .map_err(|_| ReferenceError::InvalidReference(original.clone()))?;
                (head, Some(digest))
            }
            None => (rest, None),
        };

        let (repository, tag) = match name_and_tag.rsplit_once(':') {
            // A `:` that is actually part of a port in the repository path
            // (e.g. `localhost:5000/app`) was already consumed by the
            // registry split above, so any remaining `:` here separates a tag.
            Some((repo, tag)) if !repo.is_empty() && !tag.is_empty() => {
                (repo.to_string(), Some(tag.to_string()))
            }
            _ => (name_and_tag.to_string(), None),
        };

        if repository.is_empty() {
            return Err(ReferenceError::InvalidReference(original));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{DEFAULT_NAMESPACE}/{repository}")
        } else {
            repository
        };

        let version = match (tag, digest) {
            (Some(tag), Some(digest)) => Version::TagAndDigest(tag, digest),
            (Some(tag), None) => Version::Tag(tag),
            (None, Some(digest)) => Version::Digest(digest),
            (None, None) => Version::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            original,
            registry,
            repository,
            version,
        })
    }
}
