//! Named move sequences matched against a finished combo's inputs.
//!
//! This is a labelling pass that runs after health-delta segmentation has
//! closed a combo. It never creates, splits or drops combos; it only fills
//! in [`ComboRecord::pattern`](crate::combo::ComboRecord::pattern).
//!
//! A pattern matches when its steps occur in order (not necessarily
//! adjacent) within `max_span_frames` of each other. When several patterns
//! match, the one with the most steps wins; ties go to the one declared
//! first.

use serde::{Deserialize, Serialize};

use crate::input::InputCommand;

/// A named input sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct MovePattern {
    name: String,
    notation: String,
    steps: Vec<InputCommand>,
    max_span_frames: u64,
}

impl MovePattern {
    /// `None` when `notation` does not parse.
    pub fn new(name: impl Into<String>, notation: &str, max_span_frames: u64) -> Option<Self> {
        let steps = InputCommand::parse_sequence(notation)?;
        Some(Self {
            name: name.into(),
            notation: notation.to_string(),
            steps,
            max_span_frames,
        })
    }

    /// Display name recorded on matching combos.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Notation the pattern was built from.
    pub fn notation(&self) -> &str {
        &self.notation
    }

    /// Parsed steps.
    pub fn steps(&self) -> &[InputCommand] {
        &self.steps
    }

    /// Maximum frames between the first and last matched step.
    pub fn max_span_frames(&self) -> u64 {
        self.max_span_frames
    }

    /// True when the steps occur in order within the span.
    ///
    /// `inputs` must be sorted by frame number.
    pub fn matches(&self, inputs: &[(u64, InputCommand)]) -> bool {
        let Some(first) = self.steps.first() else {
            return false;
        };
        inputs.iter().enumerate().any(|(i, &(start, cmd))| {
            cmd.satisfies(*first) && self.completes_from(&inputs[i + 1..], start)
        })
    }

    // Greedy earliest completion from a fixed start gives the tightest span
    // for that start.
    fn completes_from(&self, rest: &[(u64, InputCommand)], start: u64) -> bool {
        let mut remaining = self.steps[1..].iter().peekable();
        let mut end = start;
        for &(frame, cmd) in rest {
            let Some(step) = remaining.peek() else { break };
            if frame.saturating_sub(start) > self.max_span_frames {
                return false;
            }
            if cmd.satisfies(**step) {
                end = frame;
                remaining.next();
            }
        }
        remaining.peek().is_none() && end - start <= self.max_span_frames
    }
}

/// Serialized form of a [`MovePattern`] in configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Display name.
    pub name: String,
    /// Numpad notation, e.g. `"236A"`.
    pub notation: String,
    /// Frame span limit.
    #[serde(default = "default_span")]
    pub max_span_frames: u64,
}

fn default_span() -> u64 {
    DEFAULT_PATTERN_SPAN
}

/// Span used when a pattern entry omits `max_span_frames`.
pub const DEFAULT_PATTERN_SPAN: u64 = 30;

/// An ordered set of [`MovePattern`]s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatternMatcher {
    patterns: Vec<MovePattern>,
}

impl PatternMatcher {
    /// Matcher over `patterns`, in priority order for ties.
    pub fn new(patterns: Vec<MovePattern>) -> Self {
        Self { patterns }
    }

    /// Build from configuration entries. Entries whose notation does not
    /// parse are skipped with a warning.
    pub fn from_specs(specs: &[PatternSpec]) -> Self {
        let patterns = specs
            .iter()
            .filter_map(|s| {
                let p = MovePattern::new(s.name.clone(), &s.notation, s.max_span_frames);
                if p.is_none() {
                    tracing::warn!(pattern = %s.name, notation = %s.notation, "skipping unparseable move pattern");
                }
                p
            })
            .collect();
        Self::new(patterns)
    }

    /// Add a pattern at the lowest tie priority.
    pub fn push(&mut self, pattern: MovePattern) {
        self.patterns.push(pattern);
    }

    /// Registered patterns.
    pub fn patterns(&self) -> &[MovePattern] {
        &self.patterns
    }

    /// True when no patterns are registered.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Name of the longest matching pattern.
    pub fn best_match(&self, inputs: &[(u64, InputCommand)]) -> Option<&str> {
        let mut best: Option<&MovePattern> = None;
        for p in &self.patterns {
            if best.is_some_and(|b| b.steps.len() >= p.steps.len()) {
                continue;
            }
            if p.matches(inputs) {
                best = Some(p);
            }
        }
        best.map(|p| p.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(tokens: &[(u64, &str)]) -> Vec<(u64, InputCommand)> {
        tokens
            .iter()
            .map(|&(f, t)| (f, InputCommand::parse(t).unwrap()))
            .collect()
    }

    #[test]
    fn test_ordered_subsequence_matches() {
        let hadoken = MovePattern::new("Hadoken", "236A", 20).unwrap();
        let inputs = stream(&[(0, "2"), (1, "1"), (2, "3"), (4, "6"), (5, "6A")]);
        assert!(hadoken.matches(&inputs));
    }

    #[test]
    fn test_out_of_order_does_not_match() {
        let hadoken = MovePattern::new("Hadoken", "236A", 20).unwrap();
        let inputs = stream(&[(0, "6A"), (1, "3"), (2, "2")]);
        assert!(!hadoken.matches(&inputs));
    }

    #[test]
    fn test_span_limit() {
        let p = MovePattern::new("Link", "2B 6C", 10).unwrap();
        assert!(p.matches(&stream(&[(0, "2B"), (10, "6C")])));
        assert!(!p.matches(&stream(&[(0, "2B"), (11, "6C")])));
        // A later start can still fit the window.
        assert!(p.matches(&stream(&[(0, "2B"), (5, "2B"), (15, "6C")])));
    }

    #[test]
    fn test_longest_pattern_wins() {
        let m = PatternMatcher::new(vec![
            MovePattern::new("Jab", "5A", 30).unwrap(),
            MovePattern::new("Fireball", "236A", 30).unwrap(),
        ]);
        let inputs = stream(&[(0, "2"), (1, "6A")]);
        assert_eq!(m.best_match(&inputs), None, "6A does not satisfy 5A");

        let inputs = stream(&[(0, "5A"), (3, "2"), (4, "3"), (5, "6A")]);
        assert_eq!(m.best_match(&inputs), Some("Fireball"));
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let m = PatternMatcher::new(vec![
            MovePattern::new("First", "2A", 30).unwrap(),
            MovePattern::new("Second", "2A", 30).unwrap(),
        ]);
        assert_eq!(m.best_match(&stream(&[(0, "2A")])), Some("First"));
    }

    #[test]
    fn test_bad_specs_are_skipped() {
        let specs = vec![
            PatternSpec { name: "ok".into(), notation: "214B".into(), max_span_frames: 20 },
            PatternSpec { name: "bad".into(), notation: "2Z".into(), max_span_frames: 20 },
        ];
        let m = PatternMatcher::from_specs(&specs);
        assert_eq!(m.patterns().len(), 1);
        assert_eq!(m.patterns()[0].name(), "ok");
    }
}
