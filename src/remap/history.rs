//! The ordered record of `(remapper-name, output-reference)` pairs for one
//! source image as it traverses the chain (§3 "History").

use crate::reference::Reference;

/// One source image's journey through the remapper chain.
#[derive(Clone, Debug)]
pub struct History {
    original: Reference,
    entries: Vec<(&'static str, Reference)>,
    ignored: bool,
}

impl History {
    /// Start a new, empty history for `original`.
    pub fn new(original: Reference) -> Self {
        Self {
            original,
            entries: Vec::new(),
            ignored: false,
        }
    }

    /// The reference this history started from; never mutated.
    pub fn original(&self) -> &Reference {
        &self.original
    }

    /// The most recent output reference, or the original if the chain has
    /// not appended anything yet.
    pub fn terminal(&self) -> &Reference {
        self.entries
            .last()
            .map(|(_, r)| r)
            .unwrap_or(&self.original)
    }

    /// Append a new output reference, attributed to `remapper`.
    pub fn push(&mut self, remapper: &'static str, output: Reference) {
        self.entries.push((remapper, output));
    }

    /// Mark this source as ignored (the `ErrSkip` sentinel was raised).
    pub fn mark_ignored(&mut self) {
        self.ignored = true;
    }

    /// Whether this source was ignored by the chain.
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// Whether a remapper with this name has already appended an entry.
    pub fn has_entry_from(&self, remapper: &str) -> bool {
        self.entries.iter().any(|(name, _)| *name == remapper)
    }

    /// The full ordered list of `(remapper-name, output-reference)` pairs.
    pub fn entries(&self) -> &[(&'static str, Reference)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_falls_back_to_original() {
        let original: Reference = "nginx:1.25".parse().unwrap();
        let history = History::new(original.clone());
        assert_eq!(history.terminal(), &original);
    }

    #[test]
    fn terminal_tracks_latest_push() {
        let original: Reference = "nginx:1.25".parse().unwrap();
        let renamed: Reference = "mirror.example.com/nginx:1.25".parse().unwrap();
        let mut history = History::new(original);
        history.push("rename", renamed.clone());
        assert_eq!(history.terminal(), &renamed);
        assert!(history.has_entry_from("rename"));
        assert!(!history.has_entry_from("static"));
    }
}
