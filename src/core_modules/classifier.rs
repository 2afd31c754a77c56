// THEORY:
// The `classifier` is the first gate every detection passes through. Detectors
// ship their class name and score glued together in one label ("book 0.82"),
// so the classifier splits that label back into a base name and a confidence,
// then maps the base name onto the small closed set of categories the engine
// knows how to represent.
//
// It is pure, total and stateless: any string, including garbage, yields a
// category (possibly `Unknown`) and a confidence in [0, 1]. Filtering on the
// result is the caller's business.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence assumed when the label carries no parsable score.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

const SCREEN_LABELS: &[&str] = &["computer", "laptop", "monitor", "tv", "screen", "television"];
const BOOK_LABELS: &[&str] = &["book", "books"];
const HUMAN_LABELS: &[&str] = &["person", "human", "people"];

/// The semantic categories an overlay can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Unknown,
    Screen,
    Book,
    Human,
}

impl Category {
    /// Categories that can produce an overlay.
    pub const TRACKED: [Category; 3] = [Category::Screen, Category::Book, Category::Human];

    /// Exact, case-sensitive lookup of an already lower-cased base label.
    pub fn from_base_label(base_label: &str) -> Self {
        if SCREEN_LABELS.contains(&base_label) {
            Category::Screen
        } else if BOOK_LABELS.contains(&base_label) {
            Category::Book
        } else if HUMAN_LABELS.contains(&base_label) {
            Category::Human
        } else {
            Category::Unknown
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Unknown => "unknown",
            Category::Screen => "screen",
            Category::Book => "book",
            Category::Human => "human",
        };
        f.write_str(name)
    }
}

/// Result of splitting and mapping one raw label.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub base_label: String,
    pub confidence: f32,
    pub category: Category,
}

/// Splits a raw label into its lower-cased base name and confidence.
///
/// An empty (or whitespace-only) label gives `("", 0.0)`. A second token that
/// parses as a finite float is used as the confidence, clamped to [0, 1];
/// anything else falls back to [`DEFAULT_CONFIDENCE`].
pub fn extract_label_and_confidence(label: &str) -> (String, f32) {
    let mut tokens = label.split_whitespace();
    let Some(first) = tokens.next() else {
        return (String::new(), 0.0);
    };
    let confidence = tokens
        .next()
        .and_then(|token| token.parse::<f32>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);
    (first.to_lowercase(), confidence)
}

/// Full classification of a raw detector label.
pub fn classify(label: &str) -> Classification {
    let (base_label, confidence) = extract_label_and_confidence(label);
    let category = Category::from_base_label(&base_label);
    Classification {
        base_label,
        confidence,
        category,
    }
}
