//! `reimage` pins, relocates, scans and attests container image references
//! embedded in deployment manifests: it walks a YAML/JSON manifest stream,
//! locates image references via declarative rules, rewrites each one
//! through a configurable remapping chain (ignore / static lookup /
//! rename+pin / record / ensure-copy), then runs a vulnerability policy
//! and binary-authorization-style attestation over the result.

#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod attest;
pub mod backoff;
pub mod cli;
pub mod error;
pub mod finder;
pub mod grafeas;
pub mod grafeas_http;
pub mod kms;
pub mod mapping;
pub mod orchestrator;
pub mod reference;
pub mod registry;
pub mod remap;
pub mod updater;
pub mod vuln;

/// Import this with a glob to use the major types and traits in the library.
pub mod prelude {
    pub use crate::attest::{Attester, Signer};
    pub use crate::cli::Application;
    pub use crate::grafeas::OccurrenceStore;
    pub use crate::mapping::{Mapping, QualifiedImage};
    pub use crate::reference::{Digest, Reference};
    pub use crate::registry::RegistryClient;
    pub use crate::vuln::VulnGetter;
}
