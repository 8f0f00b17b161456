//! The local scanner subprocess oracle (§4.6, "trivy-style").
//!
//! Executes a configured command with the digest reference appended as the
//! final argument, and parses stdout against the well-known scanner JSON
//! schema (`Results[].Vulnerabilities[].{VulnerabilityID, CVSS.<vendor>.V3Score}`).

use async_trait::async_trait;
use color_eyre::eyre::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::process::Command;
use tracing::instrument;

use super::{Cve, RawFindings, VulnGetter};

/// Scans by shelling out to a configured command, e.g. `trivy image -f json`.
pub struct TrivyOracle {
    /// The command and its leading arguments; the target reference is
    /// appended as the final argument.
    command: Vec<String>,
}

impl TrivyOracle {
    /// Build an oracle around a full command line, e.g.
    /// `"trivy image -f json"` split on whitespace.
    pub fn new(command_line: &str) -> Self {
        let command = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Self { command }
    }
}

#[async_trait]
impl VulnGetter for TrivyOracle {
    #[instrument(skip(self), fields(image = %image_digest_ref))]
    async fn get(&self, image_digest_ref: &str) -> Result<RawFindings> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("trivy command is empty");
        };

        let output = Command::new(program)
            .args(args)
            .arg(image_digest_ref)
            .output()
            .await
            .with_context(|| format!("execute scanner command: {:?}", self.command))?;

        // §4.6: "Non-zero exit with non-empty stdout is still parsed; empty
        // stdout is a hard error" — the exit code is deliberately ignored
        // below as long as stdout has content.
        if output.stdout.is_empty() {
            bail!(
                "scanner produced no output for {image_digest_ref} (exit status: {})",
                output.status
            );
        }

        let report: ScanReport = serde_json::from_slice(&output.stdout)
            .context("parse scanner output as the well-known schema")?;
        Ok(RawFindings {
            cves: report.into_cves(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ScanReport {
    #[serde(default, rename = "Results")]
    results: Vec<ScanResult>,
}

#[derive(Debug, Deserialize)]
struct ScanResult {
    #[serde(default, rename = "Vulnerabilities")]
    vulnerabilities: Vec<ScanVulnerability>,
}

#[derive(Debug, Deserialize)]
struct ScanVulnerability {
    #[serde(rename = "VulnerabilityID")]
    id: String,
    #[serde(default, rename = "CVSS")]
    cvss: HashMap<String, CvssEntry>,
}

#[derive(Debug, Deserialize)]
struct CvssEntry {
    #[serde(default, rename = "V3Score")]
    v3_score: Option<f64>,
}

impl ScanReport {
    fn into_cves(self) -> Vec<Cve> {
        self.results
            .into_iter()
            .flat_map(|r| r.vulnerabilities)
            .map(|v| {
                // "The highest available V3 score is the CVE's score" (§4.6)
                // across every vendor's entry in the `CVSS` map.
                let score = v
                    .cvss
                    .values()
                    .filter_map(|entry| entry.v3_score)
                    .fold(0.0_f64, f64::max);
                Cve { id: v.id, score }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_known_schema_and_takes_highest_vendor_score() {
        let json = r#"
        {
          "Results": [
            {
              "Vulnerabilities": [
                {
                  "VulnerabilityID": "CVE-2023-0001",
                  "CVSS": {
                    "nvd": { "V3Score": 6.5 },
                    "redhat": { "V3Score": 7.8 }
                  }
                }
              ]
            }
          ]
        }
        "#;
        let report: ScanReport = serde_json::from_str(json).unwrap();
        let cves = report.into_cves();
        assert_eq!(cves.len(), 1);
        assert_eq!(cves[0].id, "CVE-2023-0001");
        assert_eq!(cves[0].score, 7.8);
    }

    #[test]
    fn missing_results_yields_no_cves() {
        let report: ScanReport = serde_json::from_str("{}").unwrap();
        assert!(report.into_cves().is_empty());
    }
}
