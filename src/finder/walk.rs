//! Tree walking over a decoded YAML/JSON document.
//!
//! [`walk`] resolves a [`Path`] (which may contain wildcards) against a
//! document and returns one [`Hit`] per scalar reached. Each `Hit` carries a
//! fully concrete path so the updater can fetch and overwrite the value in
//! place without re-walking the tree.

use serde_yaml::Value;

use super::path::{Path, Step};

/// One concrete step of a resolved path (no wildcards remain).
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ConcreteStep {
    /// An object key.
    Key(String),
    /// An array index.
    Index(usize),
}

impl std::fmt::Display for ConcreteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcreteStep::Key(k) => write!(f, ".{k}"),
            ConcreteStep::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Which kind of path produced a [`Hit`].
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum HitKind {
    /// The scalar at this path *is* an image reference.
    Image,
    /// The scalar at this path is a template string that *contains* one or
    /// more image references.
    Template,
}

/// A single located scalar, with a fully concrete path back to it.
#[derive(Clone, Debug)]
pub struct Hit {
    /// The concrete path from the document root to this scalar.
    pub cursor: Vec<ConcreteStep>,
    /// Whether this is a direct image scalar or a template string.
    pub kind: HitKind,
}

impl std::fmt::Display for Hit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for step in &self.cursor {
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

impl Hit {
    /// Read the current string value at this hit's path, if the node is a
    /// scalar string. Returns `None` on a type mismatch (non-string leaf),
    /// matching §4.2: such mismatches are reported per-hit, not fatal.
    pub fn get<'v>(&self, root: &'v Value) -> Option<&'v str> {
        get_path(root, &self.cursor)?.as_str()
    }

    /// Overwrite the string value at this hit's path.
    pub fn set(&self, root: &mut Value, new: String) -> Option<()> {
        let node = get_path_mut(root, &self.cursor)?;
        *node = Value::String(new);
        Some(())
    }
}

fn get_path<'v>(root: &'v Value, cursor: &[ConcreteStep]) -> Option<&'v Value> {
    let mut node = root;
    for step in cursor {
        node = match (step, node) {
            (ConcreteStep::Key(k), Value::Mapping(map)) => map.get(Value::String(k.clone()))?,
            (ConcreteStep::Index(i), Value::Sequence(seq)) => seq.get(*i)?,
            _ => return None,
        };
    }
    Some(node)
}

fn get_path_mut<'v>(root: &'v mut Value, cursor: &[ConcreteStep]) -> Option<&'v mut Value> {
    let mut node = root;
    for step in cursor {
        node = match (step, node) {
            (ConcreteStep::Key(k), Value::Mapping(map)) => map.get_mut(Value::String(k.clone()))?,
            (ConcreteStep::Index(i), Value::Sequence(seq)) => seq.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Resolve `path` against `root`, yielding one [`Hit`] per scalar reached.
/// Wildcards expand to every element of the array, or every value of the
/// object, at that step.
pub fn walk(root: &Value, path: &Path, kind: HitKind) -> Vec<Hit> {
    let mut hits = Vec::new();
    walk_steps(root, &path.0, Vec::new(), kind, &mut hits);
    hits
}

fn walk_steps(
    node: &Value,
    remaining: &[Step],
    cursor: Vec<ConcreteStep>,
    kind: HitKind,
    out: &mut Vec<Hit>,
) {
    let Some((step, rest)) = remaining.split_first() else {
        out.push(Hit { cursor, kind });
        return;
    };

    match step {
        Step::Key(key) => {
            if let Value::Mapping(map) = node {
                if let Some(child) = map.get(Value::String(key.clone())) {
                    let mut next = cursor;
                    next.push(ConcreteStep::Key(key.clone()));
                    walk_steps(child, rest, next, kind, out);
                }
            }
        }
        Step::Index(idx) => {
            if let Value::Sequence(seq) = node {
                if let Some(child) = seq.get(*idx) {
                    let mut next = cursor;
                    next.push(ConcreteStep::Index(*idx));
                    walk_steps(child, rest, next, kind, out);
                }
            }
        }
        Step::Wildcard => match node {
            Value::Sequence(seq) => {
                for (i, child) in seq.iter().enumerate() {
                    let mut next = cursor.clone();
                    next.push(ConcreteStep::Index(i));
                    walk_steps(child, rest, next, kind, out);
                }
            }
            Value::Mapping(map) => {
                for (key, child) in map.iter() {
                    let Some(key) = key.as_str() else { continue };
                    let mut next = cursor.clone();
                    next.push(ConcreteStep::Key(key.to_string()));
                    walk_steps(child, rest, next, kind, out);
                }
            }
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn walks_wildcard_array() {
        let root = doc(
            r#"
spec:
  containers:
    - image: nginx:1.25
    - image: redis:7
"#,
        );
        let path = Path::parse("spec.containers[*].image").unwrap();
        let hits = walk(&root, &path, HitKind::Image);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].get(&root), Some("nginx:1.25"));
        assert_eq!(hits[1].get(&root), Some("redis:7"));
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut root = doc("spec:\n  image: nginx:1.25\n");
        let path = Path::parse("spec.image").unwrap();
        let hits = walk(&root, &path, HitKind::Image);
        assert_eq!(hits.len(), 1);
        hits[0].set(&mut root, "nginx@sha256:deadbeef".to_string());
        assert_eq!(hits[0].get(&root), Some("nginx@sha256:deadbeef"));
    }

    #[test]
    fn missing_path_yields_no_hits() {
        let root = doc("spec:\n  image: nginx:1.25\n");
        let path = Path::parse("spec.missing.image").unwrap();
        assert!(walk(&root, &path, HitKind::Image).is_empty());
    }

    #[test]
    fn non_string_leaf_reports_none_not_panic() {
        let root = doc("spec:\n  image: 5\n");
        let path = Path::parse("spec.image").unwrap();
        let hits = walk(&root, &path, HitKind::Image);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get(&root), None);
    }
}
