//! DOM contract constants and stylesheet composition.
//!
//! DESIGN
//! ======
//! The visible footprint on a page is deliberately tiny: one marker
//! class on the document root, two style elements, and an exemption
//! class consumed by the preservation rule. The preservation stylesheet
//! is rebuilt from the current flags on every apply; when no category is
//! active it is emptied rather than removed, so toggling flags does not
//! churn the element list.

use crate::prefs::Preferences;

// =============================================================================
// DOM CONTRACT
// =============================================================================

/// Document-root marker class that activates the inversion filter.
pub const INVERTED_CLASS: &str = "umbra-inverted";

/// Style element holding the base inversion rule.
pub const BASE_STYLE_ID: &str = "umbra-base-style";

/// Style element holding the dynamic preservation-override rule.
pub const PRESERVE_STYLE_ID: &str = "umbra-preserve-style";

/// Exemption class applied by the smart classifier.
pub const PRESERVE_CLASS: &str = "umbra-keep";

/// The filter that produces the dark-mode effect. Applying it a second
/// time on preserved elements cancels the root inversion.
const INVERT_FILTER: &str = "invert(100%) hue-rotate(180deg)";

// =============================================================================
// RULE COMPOSITION
// =============================================================================

/// The base rule: invert the whole page while the marker class is set.
#[must_use]
pub fn base_rule() -> String {
    format!("html.{INVERTED_CLASS} {{ filter: {INVERT_FILTER}; }}")
}

/// Selectors for every active preservation category.
#[must_use]
pub fn preservation_selectors(prefs: &Preferences) -> Vec<&'static str> {
    let mut selectors = Vec::new();
    if prefs.preserve_images {
        selectors.extend(["img", "[style*=\"background-image\"]", "[style*=\"background:url\"]"]);
    }
    if prefs.preserve_videos {
        selectors.extend(["video", "iframe[src*=\"youtube\"]", "iframe[src*=\"vimeo\"]", ".video-player"]);
    }
    if prefs.preserve_canvas {
        selectors.push("canvas");
    }
    if prefs.smart_inversion {
        selectors.push(".umbra-keep");
    }
    selectors
}

/// One combined rule re-inverting every preserved element, each selector
/// scoped under the inverted root. Empty when no category is active.
#[must_use]
pub fn preservation_rule(prefs: &Preferences) -> String {
    let selectors = preservation_selectors(prefs);
    if selectors.is_empty() {
        return String::new();
    }
    let scoped = selectors
        .iter()
        .map(|s| format!("html.{INVERTED_CLASS} {s}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{scoped} {{ filter: {INVERT_FILTER}; }}")
}

// =============================================================================
// TESTS
// =============================================================================
