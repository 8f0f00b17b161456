//! The Orchestrator (C8, §4.8): wires the other components into one run,
//! drives the phases in order, and turns every component's errors into a
//! single process exit code.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::attest::Attester;
use crate::cli::{Application, VulnCheckMethod};
use crate::error::VulnError;
use crate::finder::RuleSet;
use crate::grafeas::OccurrenceStore;
use crate::mapping::{self, Mapping};
use crate::reference::Reference;
use crate::registry::RegistryClient;
use crate::remap::{Chain, CopyMode, EnsureRemapper, IgnoreRemapper, RecorderRemapper, RenameRemapper, StaticRemapper};
use crate::vuln::{Policy, VulnGetter};

static MAGNIFIER: Emoji<'_, '_> = Emoji("🔍 ", "");
static SHIELD: Emoji<'_, '_> = Emoji("🛡️ ", "");
static SEAL: Emoji<'_, '_> = Emoji("🖋️ ", "");

/// A single progress line for one fan-out phase (§6 "Progress/UX": one
/// line per phase, not per image, so CI logs stay quiet under load).
fn phase_progress(emoji: Emoji<'_, '_>, label: &str, total: usize) -> ProgressBar {
    static STYLE: std::sync::LazyLock<ProgressStyle> = std::sync::LazyLock::new(|| {
        ProgressStyle::with_template("{prefix:.dim} {bar:40.mint/green} {pos}/{len}")
            .expect("parse progress bar template")
    });
    let bar = ProgressBar::new(total as u64).with_style(STYLE.clone());
    bar.set_prefix(format!("{emoji}{}", style(label).bold().dim()));
    bar
}

/// One image's worth of failure from a concurrent fan-out phase (§5: "a
/// fixed-size vector of per-image errors", "first-cancellation-wins" never
/// applies to vuln-check/attest — every task runs to completion and errors
/// accumulate rather than aborting the rest).
#[derive(Debug)]
pub struct ImageError {
    /// The source reference the failing task was processing.
    pub image: String,
    /// The underlying error.
    pub error: color_eyre::eyre::Report,
}

/// The aggregate result of one run: every per-image error across every
/// phase, surfaced together rather than stopping at the first (§4.8, §5).
#[derive(Debug, Default)]
pub struct RunErrors {
    /// Errors raised while remapping individual found references.
    pub remap: Vec<ImageError>,
    /// Errors raised while checking individual digests for vulnerabilities.
    pub vuln: Vec<ImageError>,
    /// Errors raised while attesting individual digests.
    pub attest: Vec<ImageError>,
}

impl RunErrors {
    /// Whether any phase produced an error.
    pub fn is_empty(&self) -> bool {
        self.remap.is_empty() && self.vuln.is_empty() && self.attest.is_empty()
    }

    /// The total number of per-image errors across every phase.
    pub fn len(&self) -> usize {
        self.remap.len() + self.vuln.len() + self.attest.len()
    }
}

/// Run the full pipeline against `app`'s configuration, reading `input`
/// (already read into memory by the caller) and writing transformed
/// manifests to `output`. Returns the accumulated mapping and any
/// per-image errors; the caller decides the process exit code from these.
pub async fn run(
    app: &Application,
    input: &str,
    output: &mut impl std::io::Write,
) -> Result<(Mapping, RunErrors)> {
    let mut errors = RunErrors::default();

    let auth = build_auth(app.username.clone(), app.password.clone());
    let registry: Arc<dyn RegistryClient> = Arc::new(crate::registry::OciRegistryClient::new(auth));

    let static_mapping = load_static_mapping(app, registry.as_ref()).await?;

    let rules = compile_rules(app)?;
    let chain = build_chain(app, registry.clone(), static_mapping.clone())?;

    if app.mappings_only {
        eprintln!("{SHIELD}{}", style("relocating images from static mapping").bold().dim());
        run_mappings_only(&chain, static_mapping.as_deref(), &mut errors).await;
    } else {
        crate::updater::run(input, output, &rules, &chain, app.rename_force_digest)
            .await
            .context("run updater over manifest stream")?;
    }

    let mapping = chain.mapping().lock().await.clone();

    let mapping = run_vuln_check(app, mapping, &mut errors).await?;

    persist_mapping(app, registry.as_ref(), &mapping).await?;

    run_attest(app, &mapping, &mut errors).await?;

    Ok((mapping, errors))
}

/// Build the registry auth from the CLI's username/password flags (§6).
fn build_auth(
    username: Option<String>,
    password: Option<String>,
) -> oci_client::secrets::RegistryAuth {
    match (username, password) {
        (Some(user), Some(pass)) => oci_client::secrets::RegistryAuth::Basic(user, pass),
        _ => oci_client::secrets::RegistryAuth::Anonymous,
    }
}

/// Load and (optionally) verify the preloaded static mapping (§4.5): a
/// local JSON file takes precedence over a registry image when both are
/// configured, matching the CLI flags' declaration order in §6.
async fn load_static_mapping(
    app: &Application,
    registry: &dyn RegistryClient,
) -> Result<Option<Arc<Mapping>>> {
    let mapping = if let Some(path) = &app.static_json_mappings_file {
        Some(mapping::load_file(path).await.context("load static mapping file")?)
    } else if let Some(reference) = &app.static_json_mappings_img {
        Some(
            mapping::load_image(registry, reference)
                .await
                .context("load static mapping image")?,
        )
    } else {
        None
    };

    if let Some(mapping) = &mapping {
        if app.verify_static_json_mappings {
            mapping::verify(registry, mapping)
                .await
                .context("verify static mapping against registry")?;
        }
    }

    Ok(mapping.map(Arc::new))
}

/// `-input yaml` means only the user's own rules (plus the always-on
/// generic `image:` fallback baked into the built-in set) apply; `-input
/// k8s` additionally relies on the Kubernetes-specific built-ins. Since
/// the built-in set already covers both with no k8s-only entries that
/// would misfire against plain YAML, the distinction is just whether a
/// `-rules-config` file is read — both formats always get the built-ins.
fn compile_rules(app: &Application) -> Result<RuleSet> {
    let mut raw_rules = Vec::new();
    if let Some(path) = &app.rules_config {
        let text = std::fs::read_to_string(path).with_context(|| format!("read rules file {}", path.display()))?;
        let user_rules: Vec<crate::finder::RawRule> =
            serde_yaml::from_str(&text).with_context(|| format!("decode rules file {}", path.display()))?;
        raw_rules.extend(user_rules);
    }
    RuleSet::compile(&raw_rules).context("compile image-finder rules")
}

fn build_chain(
    app: &Application,
    registry: Arc<dyn RegistryClient>,
    static_mapping: Option<Arc<Mapping>>,
) -> Result<Chain> {
    let ignore = app
        .ignore
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("compile -ignore regex")?;
    let rename_ignore = Regex::new(&app.rename_ignore).context("compile -rename-ignore regex")?;

    let mapping = Arc::new(Mutex::new(Mapping::new()));

    Ok(Chain::new(
        IgnoreRemapper::new(ignore),
        StaticRemapper::new(static_mapping, app.mappings_only),
        RenameRemapper::new(rename_ignore, app.rename_remote_path.clone(), app.rename_template.clone()),
        registry.clone(),
        RecorderRemapper::new(mapping),
        EnsureRemapper::new(registry, copy_mode(app.clobber), app.dryrun, !app.no_copy),
    ))
}

fn copy_mode(clobber: bool) -> CopyMode {
    if clobber {
        CopyMode::Clobber
    } else {
        CopyMode::NoClobber
    }
}

/// Drive the chain directly over every key already present in the
/// preloaded static mapping, instead of scanning a manifest stream
/// (§4.8 "mappings-only mode"). `static_mapping` is the preloaded store
/// itself, not `chain.mapping()` (the recorder's accumulator, which is
/// still empty at this point).
async fn run_mappings_only(chain: &Chain, static_mapping: Option<&Mapping>, errors: &mut RunErrors) {
    let keys: Vec<String> = static_mapping
        .map(|mapping| mapping.keys().map(str::to_string).collect())
        .unwrap_or_default();

    for source in keys {
        let original: Reference = match source.parse() {
            Ok(r) => r,
            Err(err) => {
                errors.remap.push(ImageError {
                    image: source,
                    error: err.into(),
                });
                continue;
            }
        };
        if let Err(err) = chain.run(original).await {
            errors.remap.push(ImageError {
                image: source,
                error: err.into(),
            });
        }
    }
}

/// Run C6 across every recorded digest concurrently (§4.8, §5: bounded
/// fan-out, per-task timeout, errors accumulated rather than aborting
/// the run). A policy violation becomes an accumulated error, not an
/// early return, so every image is still checked (§4.6).
async fn run_vuln_check(app: &Application, mut mapping: Mapping, errors: &mut RunErrors) -> Result<Mapping> {
    let policy = Policy::new(
        app.vulncheck_max_cvss,
        app.vulncheck_ignore_cve_list.clone(),
        app.vulncheck_ignore_images
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("compile -vulncheck-ignore-images regex")?,
    );

    if policy.disabled() {
        return Ok(mapping);
    }

    let oracle: Arc<dyn VulnGetter> = build_vuln_oracle(app)?;

    let mut set: JoinSet<(String, Result<crate::vuln::RawFindings>)> = JoinSet::new();
    for (source, qi) in mapping.iter() {
        if policy.image_ignored(source) {
            continue;
        }
        let source = source.to_string();
        let target: Reference = qi.tag.parse().with_context(|| format!("recorded target {} is not a valid reference", qi.tag))?;
        let digest = crate::reference::Digest::parse(qi.digest.clone())?;
        let image_digest_ref = target.digest_ref(&digest);
        let oracle = oracle.clone();
        let timeout = app.vulncheck_timeout;
        set.spawn(async move {
            let result = run_one_vuln_check(oracle, &image_digest_ref, timeout).await;
            (source, result)
        });
    }

    let progress = phase_progress(MAGNIFIER, "scanning images", set.len());
    let mut violations = 0usize;
    while let Some(joined) = set.join_next().await {
        let (source, result) = joined.context("vuln-check task panicked")?;
        match result {
            Ok(raw) => {
                let classified = policy.classify(raw);
                violations += classified.found.len();
                if let Some(qi) = mapping.get_mut(&source) {
                    qi.found_cves = classified.found;
                    qi.ignored_cves = classified.ignored;
                }
            }
            Err(error) => errors.vuln.push(ImageError { image: source, error }),
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    if violations > 0 {
        errors.vuln.push(ImageError {
            image: "*".to_string(),
            error: VulnError::PolicyViolation(violations).into(),
        });
    }

    Ok(mapping)
}

async fn run_one_vuln_check(
    oracle: Arc<dyn VulnGetter>,
    image_digest_ref: &str,
    timeout: Duration,
) -> Result<crate::vuln::RawFindings> {
    tokio::time::timeout(timeout, oracle.get(image_digest_ref))
        .await
        .map_err(|_| VulnError::Scan {
            digest: image_digest_ref.to_string(),
            source: color_eyre::eyre::eyre!("vulnerability check timed out"),
        })?
}

fn build_vuln_oracle(app: &Application) -> Result<Arc<dyn VulnGetter>> {
    match app.vulncheck_method {
        VulnCheckMethod::Trivy => Ok(Arc::new(crate::vuln::trivy::TrivyOracle::new(&app.trivy_command))),
        VulnCheckMethod::Grafeas => {
            let parent = app
                .grafeas_parent
                .clone()
                .context("-grafeas-parent is required when -vulncheck-method=grafeas")?;
            let store = build_occurrence_store(app)?;
            Ok(Arc::new(crate::vuln::grafeas::GrafeasOracle::new(
                store,
                parent,
                app.vulncheck_max_retries,
            )))
        }
    }
}

fn build_occurrence_store(app: &Application) -> Result<Arc<dyn OccurrenceStore>> {
    let access_token = std::env::var("GRAFEAS_ACCESS_TOKEN")
        .context("GRAFEAS_ACCESS_TOKEN must be set to use a remote occurrence store")?;
    let api_root = std::env::var("GRAFEAS_API_ROOT")
        .unwrap_or_else(|_| "https://containeranalysis.googleapis.com/v1".to_string());
    Ok(Arc::new(crate::grafeas_http::GrafeasHttpStore::new(api_root, access_token)))
}

/// Persist the finished mapping to whichever sinks are configured: a local
/// file, a registry image, or both (§4.5, §4.8).
async fn persist_mapping(app: &Application, registry: &dyn RegistryClient, mapping: &Mapping) -> Result<()> {
    if let Some(path) = &app.write_json_mappings_file {
        mapping::save_file(path, mapping).await.context("write mapping file")?;
    }
    if let Some(reference) = &app.write_json_mappings_img {
        if app.dryrun {
            tracing::info!(image = %reference, "dry-run: would push mapping image");
        } else {
            mapping::save_image(registry, reference, mapping)
                .await
                .context("push mapping image")?;
        }
    }
    Ok(())
}

/// Run C7 across every unique digest recorded (§4.8, §3 "copy executed
/// once" applies equally to attestation: dedupe by digest within one run).
async fn run_attest(app: &Application, mapping: &Mapping, errors: &mut RunErrors) -> Result<()> {
    let (Some(attestor), Some(key_version)) = (&app.binauthz_attestor, &app.gcp_kms_key) else {
        return Ok(());
    };
    let Some(parent) = &app.grafeas_parent else {
        return Ok(());
    };

    let access_token = std::env::var("GRAFEAS_ACCESS_TOKEN")
        .context("GRAFEAS_ACCESS_TOKEN must be set to attest")?;
    let api_root = std::env::var("GRAFEAS_API_ROOT")
        .unwrap_or_else(|_| "https://containeranalysis.googleapis.com/v1".to_string());
    let store: Arc<dyn OccurrenceStore> =
        Arc::new(crate::grafeas_http::GrafeasHttpStore::new(api_root, access_token.clone()));
    let signer: Arc<dyn crate::attest::Signer> =
        Arc::new(crate::kms::KmsSigner::new(key_version.clone(), access_token));

    let attester = Arc::new(Attester::new(signer, store, parent.clone(), attestor.clone()));

    let mut set: JoinSet<(String, Result<(), crate::error::AttestError>)> = JoinSet::new();
    for digest in mapping.unique_digests() {
        let full_reference = mapping
            .iter()
            .find(|(_, qi)| qi.digest == digest)
            .map(|(_, qi)| qi.tag.clone())
            .unwrap_or_else(|| digest.clone());
        let attester = attester.clone();
        set.spawn(async move {
            let result = attester.attest(&full_reference, &digest).await;
            (full_reference, result)
        });
    }

    let progress = phase_progress(SEAL, "attesting images", set.len());
    while let Some(joined) = set.join_next().await {
        let (image, result) = joined.context("attest task panicked")?;
        if let Err(error) = result {
            errors.attest.push(ImageError {
                image,
                error: error.into(),
            });
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(())
}
