//! Dialogue chain recorder and text classification.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::types::DIALOGUE_HISTORY_CAPACITY;

// ============================================================================
// Classification
// ============================================================================

/// Coarse class of one dialogue line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueClass {
    /// Engine chrome: save prompts, button hints. Never quest signal.
    System,
    /// Pure goodbyes with no other content.
    Farewell,
    /// Environmental flavor text: posters, televisions, bookshelves.
    Ambient,
    /// Anything else - potential quest signal.
    Other,
}

/// Pluggable dialogue classification.
///
/// The recorder filters only `System` lines; ambient text stays in the window
/// on purpose so the extractor sees full context. Extractors use `Farewell`
/// and `Ambient` to avoid minting objectives out of flavor text.
pub trait DialogueClassifier {
    fn classify(&self, text: &str) -> DialogueClass;
}

const SYSTEM_PATTERNS: &[&str] = &[
    "no item assigned",
    "no registered item",
    "press start",
    "press select",
    "saving",
    "save completed",
    "now loading",
];

const FAREWELL_PATTERNS: &[&str] = &["see you", "goodbye", "take care", "come back soon"];

const AMBIENT_PATTERNS: &[&str] = &[
    "there is a movie on tv",
    "it's a nintendo",
    "game boy",
    "it's a poster",
    "it's a map",
    "it's a bookshelf",
    "there are books",
    "it's a clock",
    "it's a pc",
    "someone's pc",
    "it's a trash",
    "it's a plant",
    "nothing here",
];

/// Fixed-pattern classifier matching the substrings the game engine emits.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedClassifier;

impl DialogueClassifier for RuleBasedClassifier {
    fn classify(&self, text: &str) -> DialogueClass {
        let lower = text.trim().to_lowercase();
        if SYSTEM_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
            return DialogueClass::System;
        }
        if AMBIENT_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
            return DialogueClass::Ambient;
        }
        if FAREWELL_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
            return DialogueClass::Farewell;
        }
        DialogueClass::Other
    }
}

// ============================================================================
// Dialogue History
// ============================================================================

/// Bounded, consecutive-deduplicated window of recent dialogue per worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for DialogueHistory {
    fn default() -> Self {
        Self::new(DIALOGUE_HISTORY_CAPACITY)
    }
}

impl DialogueHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record one line. Empty text, an exact repeat of the newest entry, and
    /// system/UI chrome are all dropped. Oldest entries fall off first.
    pub fn record(&mut self, text: &str, classifier: &dyn DialogueClassifier) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.entries.back().map(String::as_str) == Some(trimmed) {
            return;
        }
        if classifier.classify(trimmed) == DialogueClass::System {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(trimmed.to_string());
    }

    /// Recorded lines, oldest first.
    pub fn window(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
