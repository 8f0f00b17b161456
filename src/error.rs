//! Error kinds shared across the pipeline.
//!
//! Each component surfaces one of these through [`color_eyre::eyre::Report`] with a
//! `.context(...)` chain describing the offending reference; nothing here is
//! swallowed, per the policy in the design notes.

use thiserror::Error;

/// Errors produced while parsing or formatting a container image reference.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The input string did not match `[host[:port]/]name[:tag][@digest]`.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// A digest string did not match `sha256:[0-9a-f]{64}`.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

/// Errors produced while compiling or walking finder rules.
#[derive(Debug, Error)]
pub enum FinderError {
    /// A rule's regex or path syntax failed to compile.
    #[error("bad rule: {0}")]
    BadRule(String),
}

/// Errors produced by the remapper chain (C3).
///
/// `Skip` is the sentinel described in §4.3: it is caught by the chain
/// runner and never surfaced to the caller as a failure.
#[derive(Debug, Error)]
pub enum RemapError {
    /// The chain should stop and treat the image as intentionally ignored.
    #[error("skip")]
    Skip,

    /// `mappings-only` mode is active and the source had no static mapping.
    #[error("no static mapping for {0} (mappings-only mode)")]
    NoMapping(String),

    /// The registry failed to resolve a digest for a tag.
    #[error("resolve digest for {reference}: {source}")]
    DigestResolve {
        /// The reference whose digest could not be resolved.
        reference: String,
        /// The underlying transport error.
        #[source]
        source: color_eyre::eyre::Report,
    },

    /// The same source reference was recorded twice with different results.
    #[error("mapping conflict for {0}: recorded result differs from a prior run")]
    MappingConflict(String),

    /// Copying the image to its target location failed after retries.
    #[error("copy {source_ref} to {target_ref}: {cause}")]
    Copy {
        /// The reference copied from.
        source_ref: String,
        /// The reference copied to.
        target_ref: String,
        /// The underlying transport error.
        cause: color_eyre::eyre::Report,
    },

    /// The target already exists with a different digest and clobber is off.
    #[error("target {0} already exists with a different digest")]
    TargetExists(String),

    /// A static mapping's recorded target did not parse as a reference.
    #[error("static mapping target for {0} is not a valid reference: {1}")]
    InvalidMappingTarget(String, #[source] crate::reference::ReferenceError),
}

/// Errors produced by the vulnerability checker (C6).
#[derive(Debug, Error)]
pub enum VulnError {
    /// The scanner subprocess or remote oracle failed outright.
    #[error("scan {digest}: {source}")]
    Scan {
        /// The digest being scanned.
        digest: String,
        /// The underlying error.
        #[source]
        source: color_eyre::eyre::Report,
    },

    /// A discovery occurrence never reached a terminal state within budget.
    #[error("discovery for {0} did not finish within the retry budget")]
    DiscoverNotFinished(String),

    /// No discovery occurrence exists for the given digest.
    #[error("no discovery occurrence found for {0}")]
    DiscoveryNotFound(String),

    /// At least one image violated the CVSS policy.
    #[error("{0} image(s) violate the vulnerability policy")]
    PolicyViolation(usize),
}

/// Errors produced by the attester (C7).
#[derive(Debug, Error)]
pub enum AttestError {
    /// Signing the payload failed.
    #[error("sign attestation for {0}: {1}")]
    Sign(String, #[source] color_eyre::eyre::Report),

    /// Publishing the occurrence failed.
    #[error("publish attestation for {0}: {1}")]
    Attest(String, #[source] color_eyre::eyre::Report),
}

/// Errors produced while loading or saving the static mapping store (C5).
#[derive(Debug, Error)]
pub enum MappingError {
    /// The mapping file or image did not contain well-formed JSON.
    #[error("decode mapping: {0}")]
    Decode(#[source] serde_json::Error),

    /// A reloaded mapping's target digest no longer matches the registry.
    #[error("stale mapping: {reference} recorded {recorded} but registry reports {live}")]
    Stale {
        /// The source key whose target drifted.
        reference: String,
        /// The digest recorded in the mapping file.
        recorded: String,
        /// The digest currently reported by the registry.
        live: String,
    },
}
