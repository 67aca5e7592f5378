use std::fmt;

use crate::model::EntryId;

// ─────────────────────────────────────────────
// Full object paths
// ─────────────────────────────────────────────

/// One arc of a full path: the entry reached and the member name it
/// was reached by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub id:   EntryId,
    pub name: String,
}

/// Ordered chain of directory entries from a tree root down to the
/// node currently being visited.
///
/// The walker grows the path by one arc per descent step and shrinks
/// it on the way back up; diagnostics, animation matching and cycle
/// detection all read it. Cloning takes a deep copy, used whenever a
/// region snapshot freezes the current position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbPath {
    steps: Vec<PathStep>,
}

impl DbPath {
    pub fn new() -> DbPath {
        DbPath { steps: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn push(&mut self, id: EntryId, name: impl Into<String>) {
        self.steps.push(PathStep { id, name: name.into() });
    }

    pub fn pop(&mut self) -> Option<PathStep> {
        self.steps.pop()
    }

    pub fn first(&self) -> Option<&PathStep> {
        self.steps.first()
    }

    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Whether `name` already occurs in the path, excluding the most
    /// recently pushed arc (the one currently under test).
    pub fn detect_cycle(&self, name: &str) -> bool {
        let upper = self.steps.len().saturating_sub(1);
        self.steps[..upper].iter().any(|s| s.name == name)
    }
}

/// `/a/b/c` form used across diagnostics. An empty path prints as
/// the empty string.
impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "/{}", step.name)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DbPath {
        let mut p = DbPath::new();
        p.push(EntryId(0), "scene");
        p.push(EntryId(1), "wheel");
        p.push(EntryId(2), "hub");
        p
    }

    #[test]
    fn display_uses_slash_separated_form() {
        assert_eq!(sample().to_string(), "/scene/wheel/hub");
        assert_eq!(DbPath::new().to_string(), "");
    }

    #[test]
    fn push_and_pop_are_symmetric() {
        let mut p = sample();
        assert_eq!(p.len(), 3);
        let top = p.pop().unwrap();
        assert_eq!(top.name, "hub");
        assert_eq!(top.id, EntryId(2));
        assert_eq!(p.len(), 2);
        assert_eq!(p.last().unwrap().name, "wheel");
        assert_eq!(p.first().unwrap().name, "scene");
    }

    #[test]
    fn cycle_check_skips_the_newest_arc() {
        let mut p = sample();
        // "hub" only occurs at the tail, so it is not yet a cycle.
        assert!(!p.detect_cycle("hub"));
        // A second "scene" at the tail closes the loop.
        p.push(EntryId(0), "scene");
        assert!(p.detect_cycle("scene"));
        assert!(!p.detect_cycle("nowhere"));
    }

    #[test]
    fn empty_path_never_cycles() {
        assert!(!DbPath::new().detect_cycle("anything"));
    }
}
