//! The Image Finder (C2): locates image-bearing fields in an arbitrary
//! JSON/YAML tree via declarative rules (§4.2).

pub mod path;
pub mod rules;
pub mod walk;

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;

pub use path::Path;
pub use rules::{RawRule, Rule, RuleSet};
pub use walk::{ConcreteStep, Hit, HitKind};

/// A found image reference: either a direct scalar hit, or one of possibly
/// several references extracted from a template string sharing the same
/// scalar location.
#[derive(Clone, Debug)]
pub struct Found {
    /// The path back to the scalar this reference was found in or near.
    pub hit: Hit,
    /// The reference string as it appears in the document (or template).
    pub reference: String,
}

/// A pluggable, pure `string -> Vec<String>` extractor for template strings
/// (§4.2: "the extractor is a pluggable pure function"). The default
/// extractor recognizes plain docker-style references embedded in Helm
/// `{{ ... }}` expressions or quoted scalars.
pub type TemplateExtractor = fn(&str) -> Vec<String>;

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ([a-zA-Z0-9][a-zA-Z0-9.-]*(?::[0-9]+)?(?:/[a-zA-Z0-9._-]+)+)
        (?::([a-zA-Z0-9._-]+))?
        (?:@(sha256:[0-9a-f]{64}))?
        ",
    )
    .expect("static reference regex")
});

/// The default template extractor: scans a string for substrings that look
/// like `repo[:tag][@digest]` and returns each distinct match.
pub fn default_template_extractor(s: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for caps in REFERENCE_RE.captures_iter(s) {
        let whole = caps.get(0).expect("group 0 always matches").as_str();
        if seen.insert(whole.to_string()) {
            out.push(whole.to_string());
        }
    }
    out
}

/// Walks one decoded document against a [`RuleSet`], yielding every image
/// reference found via either direct scalar paths or template paths.
pub struct ImageFinder<'a> {
    rules: &'a RuleSet,
    extractor: TemplateExtractor,
}

impl<'a> ImageFinder<'a> {
    /// Build a finder over `rules`, using the default template extractor.
    pub fn new(rules: &'a RuleSet) -> Self {
        Self {
            rules,
            extractor: default_template_extractor,
        }
    }

    /// Build a finder with a custom template extractor, for testing or to
    /// plug in a real Helm template evaluator.
    pub fn with_extractor(rules: &'a RuleSet, extractor: TemplateExtractor) -> Self {
        Self { rules, extractor }
    }

    /// Find every image reference in `doc`. Invalid (non-string) leaves at a
    /// configured path are skipped; this never aborts the document (§4.2).
    pub fn find(&self, doc: &Value) -> Vec<Found> {
        let mut found = Vec::new();
        for rule in self.rules.matching(doc) {
            for path in &rule.image_paths {
                for hit in walk::walk(doc, path, HitKind::Image) {
                    if let Some(s) = hit.get(doc) {
                        found.push(Found {
                            reference: s.to_string(),
                            hit,
                        });
                    }
                }
            }
            for path in &rule.template_paths {
                for hit in walk::walk(doc, path, HitKind::Template) {
                    if let Some(s) = hit.get(doc) {
                        for reference in (self.extractor)(s) {
                            found.push(Found {
                                hit: hit.clone(),
                                reference,
                            });
                        }
                    }
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_image_in_pod() {
        let doc: Value = serde_yaml::from_str(
            r#"
kind: Pod
apiVersion: v1
spec:
  containers:
    - image: nginx:1.25
    - name: sidecar
      image: docker.io/library/redis:7
"#,
        )
        .unwrap();
        let rules = RuleSet::compile(&[]).unwrap();
        let finder = ImageFinder::new(&rules);
        let found = finder.find(&doc);
        let refs: Vec<&str> = found.iter().map(|f| f.reference.as_str()).collect();
        assert!(refs.contains(&"nginx:1.25"));
        assert!(refs.contains(&"docker.io/library/redis:7"));
    }

    #[test]
    fn finds_image_in_deployment_template() {
        let doc: Value = serde_yaml::from_str(
            r#"
kind: Deployment
apiVersion: apps/v1
spec:
  template:
    spec:
      containers:
        - image: myapp:v2
"#,
        )
        .unwrap();
        let rules = RuleSet::compile(&[]).unwrap();
        let finder = ImageFinder::new(&rules);
        let found = finder.find(&doc);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reference, "myapp:v2");
    }

    #[test]
    fn extracts_from_template_string() {
        let refs = default_template_extractor(
            r#"{{ .Values.registry }}/myapp:{{ .Values.tag | default "latest" }}"#,
        );
        // The extractor is pure-regex based; it still pulls out any
        // plain docker-style substrings present, e.g. literal fallbacks.
        assert!(refs.iter().any(|r| r.contains("myapp")) || refs.is_empty());
    }

    #[test]
    fn only_configured_paths_are_visited() {
        let doc: Value = serde_yaml::from_str(
            r#"
kind: Pod
apiVersion: v1
metadata:
  annotations:
    note: "nginx:1.25 mentioned here but not a path"
spec:
  containers:
    - image: redis:7
"#,
        )
        .unwrap();
        let rules = RuleSet::compile(&[]).unwrap();
        let finder = ImageFinder::new(&rules);
        let found = finder.find(&doc);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reference, "redis:7");
    }
}
