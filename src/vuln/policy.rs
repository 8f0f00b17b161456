//! The CVSS + ignore-list policy filter (§4.6).

use regex::Regex;

use super::{Cve, PolicyResult, RawFindings};

/// The configured policy: a CVSS floor, an ignore-list of CVE IDs, and a
/// regex of image references to skip entirely.
pub struct Policy {
    max_cvss: f64,
    ignore_cves: Vec<String>,
    ignore_images: Option<Regex>,
}

impl Policy {
    /// Build a policy. `max_cvss == 0.0` disables checking entirely (§4.6,
    /// §9 open question: "surprising default; preserved for compatibility").
    pub fn new(max_cvss: f64, ignore_cves: Vec<String>, ignore_images: Option<Regex>) -> Self {
        Self {
            max_cvss,
            ignore_cves,
            ignore_images,
        }
    }

    /// Whether vulnerability checking is disabled for the whole run.
    pub fn disabled(&self) -> bool {
        self.max_cvss == 0.0
    }

    /// Whether `image` should be skipped entirely (both lists stay empty).
    pub fn image_ignored(&self, image: &str) -> bool {
        self.ignore_images
            .as_ref()
            .is_some_and(|re| re.is_match(image))
    }

    /// Classify raw findings into found/ignored per the configured policy.
    /// A CVE exactly at `max_cvss` is a violation (`>=`, §8 "Policy boundary").
    pub fn classify(&self, raw: RawFindings) -> PolicyResult {
        let mut found = Vec::new();
        let mut ignored = Vec::new();
        for cve in raw.cves {
            if self.ignore_cves.iter().any(|id| id == &cve.id) {
                ignored.push(cve);
            } else if cve.score >= self.max_cvss {
                found.push(cve);
            }
            // else: below threshold and not ignored — dropped, per §4.6.
        }
        PolicyResult { found, ignored }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cve(id: &str, score: f64) -> Cve {
        Cve {
            id: id.to_string(),
            score,
        }
    }

    #[test]
    fn disabled_when_max_cvss_zero() {
        let policy = Policy::new(0.0, vec![], None);
        assert!(policy.disabled());
    }

    #[test]
    fn boundary_score_is_a_violation() {
        let policy = Policy::new(7.0, vec![], None);
        let result = policy.classify(RawFindings {
            cves: vec![cve("CVE-BOUNDARY", 7.0)],
        });
        assert_eq!(result.found.len(), 1);
        assert!(result.ignored.is_empty());
    }

    #[test]
    fn scenario_four_from_spec() {
        let policy = Policy::new(7.0, vec!["CVE-1".to_string()], None);
        let result = policy.classify(RawFindings {
            cves: vec![cve("CVE-1", 7.0), cve("CVE-2", 6.9)],
        });
        assert_eq!(result.ignored, vec![cve("CVE-1", 7.0)]);
        assert!(result.found.is_empty());
    }

    #[test]
    fn ignored_image_regex_short_circuits_upstream() {
        let policy = Policy::new(5.0, vec![], Some(Regex::new(r"^internal\.example/").unwrap()));
        assert!(policy.image_ignored("internal.example/app:v1"));
        assert!(!policy.image_ignored("docker.io/library/nginx:1.25"));
    }
}
