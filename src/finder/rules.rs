//! Declarative rules mapping a document `kind`/`apiVersion` to the paths
//! that should be visited for image references (C2, §4.2, §6).

use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::FinderError;

use super::path::Path;

/// One rule as read from the rules YAML file, before compilation.
#[derive(Clone, Debug, Deserialize)]
pub struct RawRule {
    /// Regex matched against the document's `kind` field.
    pub kind: String,
    /// Regex matched against the document's `apiVersion` field.
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Paths whose scalar value *is* an image reference.
    #[serde(rename = "imageJSONPaths", default)]
    pub image_paths: Vec<String>,
    /// Paths whose scalar value is a template containing image references.
    #[serde(rename = "templateImageJSONPaths", default)]
    pub template_paths: Vec<String>,
}

/// A compiled rule, ready to be matched against documents.
pub struct Rule {
    kind: Regex,
    api_version: Regex,
    /// Paths whose value is a bare image reference.
    pub image_paths: Vec<Path>,
    /// Paths whose value is a template containing image references.
    pub template_paths: Vec<Path>,
}

impl Rule {
    /// Compile a [`RawRule`], failing fast on invalid regex or path syntax
    /// per the "Lifecycle" invariant in §3: rules compile once at startup.
    pub fn compile(raw: &RawRule) -> Result<Self, FinderError> {
        let kind = Regex::new(&raw.kind)
            .map_err(|e| FinderError::BadRule(format!("kind regex {:?}: {e}", raw.kind)))?;
        let api_version = Regex::new(&raw.api_version).map_err(|e| {
            FinderError::BadRule(format!("apiVersion regex {:?}: {e}", raw.api_version))
        })?;
        let image_paths = raw
            .image_paths
            .iter()
            .map(|p| Path::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        let template_paths = raw
            .template_paths
            .iter()
            .map(|p| Path::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind,
            api_version,
            image_paths,
            template_paths,
        })
    }

    /// Whether this rule applies to a document's `kind`/`apiVersion`.
    pub fn matches(&self, doc: &Value) -> bool {
        let kind = doc.get("kind").and_then(Value::as_str).unwrap_or("");
        let api_version = doc
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or("");
        self.kind.is_match(kind) && self.api_version.is_match(api_version)
    }
}

/// The compiled set of rules applied to every document (§3, §4.2).
pub struct RuleSet {
    rules: Vec<Rule>,
}

/// Built-in rules always appended to the user-supplied set, covering the
/// common Kubernetes workload kinds and bare Helm-style `image:` scalars.
pub const BUILTIN_RULES_YAML: &str = include_str!("default_rules.yaml");

impl RuleSet {
    /// Compile `user_rules` and append the built-in defaults (§6: "Built-in
    /// defaults... are always appended to the user list").
    pub fn compile(user_rules: &[RawRule]) -> Result<Self, FinderError> {
        let builtin: Vec<RawRule> = serde_yaml::from_str(BUILTIN_RULES_YAML)
            .map_err(|e| FinderError::BadRule(format!("built-in rules: {e}")))?;

        let mut rules = Vec::with_capacity(user_rules.len() + builtin.len());
        for raw in user_rules.iter().chain(builtin.iter()) {
            rules.push(Rule::compile(raw)?);
        }
        Ok(Self { rules })
    }

    /// The rules matching `doc`, in declaration order (user rules first).
    pub fn matching<'a>(&'a self, doc: &Value) -> impl Iterator<Item = &'a Rule> {
        self.rules.iter().filter(move |r| r.matches(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_compile() {
        let set = RuleSet::compile(&[]).expect("built-in rules must compile");
        assert!(!set.rules.is_empty());
    }

    #[test]
    fn pod_matches_builtin_rule() {
        let set = RuleSet::compile(&[]).unwrap();
        let doc: Value = serde_yaml::from_str("kind: Pod\napiVersion: v1\n").unwrap();
        assert!(set.matching(&doc).count() >= 1);
    }

    #[test]
    fn bad_regex_rejected_at_compile() {
        let raw = RawRule {
            kind: "(".to_string(),
            api_version: ".*".to_string(),
            image_paths: vec![],
            template_paths: vec![],
        };
        assert!(Rule::compile(&raw).is_err());
    }
}
