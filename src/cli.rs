//! The command-line interface (§6): one binary, a flat flag list, parsed
//! once at startup.

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Pin, relocate, scan and attest container image references embedded in
/// deployment manifests.
#[derive(Debug, Parser)]
#[command(name = "reimage", version, about)]
pub struct Application {
    /// The shape of the input stream; `k8s` appends the built-in
    /// Kubernetes workload rules, `yaml` relies only on user rules (plus
    /// the generic `image:` template fallback).
    #[arg(long = "input", default_value = "k8s")]
    pub input: InputFormat,

    /// Path to a YAML file of additional image-finder rules (§6 "Rules
    /// file"), merged ahead of the built-in defaults.
    #[arg(long = "rules-config")]
    pub rules_config: Option<std::path::PathBuf>,

    /// Images whose original reference matches this regex pass through
    /// unmodified.
    #[arg(long = "ignore")]
    pub ignore: Option<String>,

    /// Images matching this regex are digest-pinned but not relocated.
    #[arg(long = "rename-ignore", default_value = "^$")]
    pub rename_ignore: String,

    /// The registry and path prefix images are relocated under, e.g.
    /// `registry.example.com/mirror`.
    #[arg(long = "rename-remote-path")]
    pub rename_remote_path: Option<String>,

    /// Template expanding `{{.Registry}}`/`{{.Repository}}`/`{{.Tag}}`/
    /// `{{.Digest}}` into the path appended after `-rename-remote-path`.
    #[arg(long = "rename-template", default_value = "{{.Repository}}")]
    pub rename_template: String,

    /// Always write digest-only references (`repo@sha256:...`) instead of
    /// `repo:tag@sha256:...`.
    #[arg(long = "rename-force-digest")]
    pub rename_force_digest: bool,

    /// Path to a local JSON static mapping file to preload.
    #[arg(long = "static-json-mappings-file")]
    pub static_json_mappings_file: Option<std::path::PathBuf>,

    /// Reference to a single-layer registry image carrying the static
    /// mapping (§4.5).
    #[arg(long = "static-json-mappings-img")]
    pub static_json_mappings_img: Option<String>,

    /// Re-resolve every static mapping target's digest against the
    /// registry at load time, aborting on drift (§3 "Lifecycle").
    #[arg(long = "verify-static-json-mappings", default_value_t = true)]
    pub verify_static_json_mappings: bool,

    /// Drive the chain directly over the preloaded mapping's keys instead
    /// of transforming a manifest stream (§4.8).
    #[arg(long = "mappings-only")]
    pub mappings_only: bool,

    /// Disable the ensure-copy step entirely.
    #[arg(long = "no-copy")]
    pub no_copy: bool,

    /// Overwrite an existing target instead of failing when its digest
    /// differs (no-clobber is the default, §4.3 item 6).
    #[arg(long = "clobber")]
    pub clobber: bool,

    /// Path to write the resulting mapping as JSON.
    #[arg(long = "write-json-mappings-file")]
    pub write_json_mappings_file: Option<std::path::PathBuf>,

    /// Registry reference to push the resulting mapping image to.
    #[arg(long = "write-json-mappings-img")]
    pub write_json_mappings_img: Option<String>,

    /// Log intended copies/pushes instead of performing I/O.
    #[arg(long = "dryrun")]
    pub dryrun: bool,

    /// Raise the default tracing directive to `debug`.
    #[arg(long = "debug")]
    pub debug: bool,

    /// Which oracle to use for vulnerability checking.
    #[arg(long = "vulncheck-method", default_value = "trivy")]
    pub vulncheck_method: VulnCheckMethod,

    /// The CVSS v3 floor at or above which a CVE is a policy violation.
    /// Zero disables vulnerability checking entirely (§4.6, §9 open
    /// question: surprising default, preserved for compatibility).
    #[arg(long = "vulncheck-max-cvss", default_value_t = 0.0)]
    pub vulncheck_max_cvss: f64,

    /// CVE ids to always classify as ignored rather than a violation.
    #[arg(long = "vulncheck-ignore-cve-list", value_delimiter = ',')]
    pub vulncheck_ignore_cve_list: Vec<String>,

    /// Images matching this regex skip vulnerability checking entirely.
    #[arg(long = "vulncheck-ignore-images")]
    pub vulncheck_ignore_images: Option<String>,

    /// Total time budget for one image's vulnerability check.
    #[arg(long = "vulncheck-timeout", default_value = "10m", value_parser = parse_duration)]
    pub vulncheck_timeout: Duration,

    /// Maximum retry attempts while waiting on a remote discovery
    /// occurrence to finish.
    #[arg(long = "vulncheck-max-retries", default_value_t = 20)]
    pub vulncheck_max_retries: u32,

    /// The scanner command line; the digest reference is appended as the
    /// final argument.
    #[arg(long = "trivy-command", default_value = "trivy image -f json")]
    pub trivy_command: String,

    /// The Grafeas project/parent resource name, e.g. `projects/my-proj`.
    #[arg(long = "grafeas-parent")]
    pub grafeas_parent: Option<String>,

    /// The binary authorization attestor note reference.
    #[arg(long = "binauthz-attestor")]
    pub binauthz_attestor: Option<String>,

    /// The GCP KMS key version resource name used to sign attestations.
    #[arg(long = "gcp-kms-key")]
    pub gcp_kms_key: Option<String>,

    /// The username to use when authenticating with the OCI registry.
    #[arg(long, env = "OCI_USERNAME")]
    pub username: Option<String>,

    /// The password to use when authenticating with the OCI registry.
    #[arg(long, env = "OCI_PASSWORD", requires = "username")]
    pub password: Option<String>,
}

/// `-input` values (§6).
#[derive(Clone, Copy, Eq, PartialEq, Debug, ValueEnum)]
pub enum InputFormat {
    /// Kubernetes manifests: built-in rules for common workload kinds apply.
    K8s,
    /// Plain YAML: only user-supplied rules (plus the generic `image:`
    /// template fallback) apply.
    Yaml,
}

/// `-vulncheck-method` values (§6).
#[derive(Clone, Copy, Eq, PartialEq, Debug, ValueEnum)]
pub enum VulnCheckMethod {
    /// Local scanner subprocess, e.g. trivy.
    Trivy,
    /// Remote Grafeas-style occurrence store.
    Grafeas,
}

/// A minimal duration parser supporting a trailing `s`/`m`/`h` suffix
/// (seconds if omitted), avoiding a dependency on an additional parsing
/// crate for three suffix characters.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split_at = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split_at);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    let seconds = match suffix {
        "s" | "" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit {other:?} in {s:?}")),
    };
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parses_minutes_and_hours() {
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration("10x").is_err());
    }
}
