//! JSON-path-like step syntax used by finder rules.
//!
//! A path is a dot-separated sequence of object keys, optionally followed
//! by an array selector `[N]` or `[*]`. Example: `spec.template.spec.containers[*].image`.

use std::fmt;

use crate::error::FinderError;

/// One step of a compiled path.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Step {
    /// Select a named object key.
    Key(String),
    /// Select every element of an array.
    Wildcard,
    /// Select a specific array index.
    Index(usize),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(k) => write!(f, "{k}"),
            Step::Wildcard => write!(f, "[*]"),
            Step::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// A compiled path: an ordered sequence of [`Step`]s reaching into a tree.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Path(pub Vec<Step>);

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join("."))
    }
}

impl Path {
    /// Parse a dotted path string, failing on malformed array selectors.
    pub fn parse(s: &str) -> Result<Self, FinderError> {
        let mut steps = Vec::new();
        for segment in s.split('.') {
            if segment.is_empty() {
                return Err(FinderError::BadRule(format!("empty path segment in {s:?}")));
            }
            let mut rest = segment;
            // A segment can carry a leading key followed by any number of
            // bracketed selectors, e.g. `containers[*]` or `items[0]`.
            if let Some(bracket) = rest.find('[') {
                let key = &rest[..bracket];
                if !key.is_empty() {
                    steps.push(Step::Key(key.to_string()));
                }
                rest = &rest[bracket..];
                while !rest.is_empty() {
                    if !rest.starts_with('[') {
                        return Err(FinderError::BadRule(format!(
                            "malformed selector in path {s:?}"
                        )));
                    }
                    let close = rest.find(']').ok_or_else(|| {
                        FinderError::BadRule(format!("unterminated selector in path {s:?}"))
                    })?;
                    let inner = &rest[1..close];
                    if inner == "*" {
                        steps.push(Step::Wildcard);
                    } else {
                        let idx: usize = inner.parse().map_err(|_| {
                            FinderError::BadRule(format!("bad array index in path {s:?}"))
                        })?;
                        steps.push(Step::Index(idx));
                    }
                    rest = &rest[close + 1..];
                }
            } else {
                steps.push(Step::Key(rest.to_string()));
            }
        }
        if steps.is_empty() {
            return Err(FinderError::BadRule(format!("empty path {s:?}")));
        }
        Ok(Path(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_keys() {
        let p = Path::parse("spec.template.spec").unwrap();
        assert_eq!(
            p.0,
            vec![
                Step::Key("spec".into()),
                Step::Key("template".into()),
                Step::Key("spec".into()),
            ]
        );
    }

    #[test]
    fn parses_wildcard_and_index() {
        let p = Path::parse("containers[*].image").unwrap();
        assert_eq!(
            p.0,
            vec![
                Step::Key("containers".into()),
                Step::Wildcard,
                Step::Key("image".into()),
            ]
        );

        let p = Path::parse("items[2].name").unwrap();
        assert_eq!(
            p.0,
            vec![
                Step::Key("items".into()),
                Step::Index(2),
                Step::Key("name".into()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_selector() {
        assert!(Path::parse("containers[*.image").is_err());
        assert!(Path::parse("").is_err());
        assert!(Path::parse("a..b").is_err());
    }
}
