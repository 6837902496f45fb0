//! Smart preservation classifier — exempt naturally dark elements.
//!
//! DESIGN
//! ======
//! When smart inversion is on, elements that are already dark (computed
//! background luminance below the threshold) or painted with a gradient
//! get the exemption class, so the root filter does not wash them out.
//! The pass runs continuously: an initial full-document scan, then one
//! pass per added subtree from the mutation stream. Marking is
//! best-effort with no undo; an element stays exempt even if its
//! background later changes.
//!
//! The subscription is an owned, cancellable task: started once on first
//! enablement, aborted on page teardown.

use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::page::css::{INVERTED_CLASS, PRESERVE_CLASS};
use crate::page::dom::{ElementSnapshot, PageDom};

/// Luminance cutoff: weighted `0.299 r + 0.587 g + 0.114 b` below this
/// counts as dark.
const DARK_LUMINANCE_THRESHOLD: u32 = 128;

/// Structural tags that never carry a meaningful background of their own.
const SKIP_TAGS: &[&str] = &["html", "head", "style", "script", "meta", "link"];

// =============================================================================
// CLASSIFIER
// =============================================================================

pub struct SmartClassifier {
    dom: Arc<dyn PageDom>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SmartClassifier {
    #[must_use]
    pub fn new(dom: Arc<dyn PageDom>) -> Self {
        Self { dom, task: Mutex::new(None) }
    }

    /// Start the continuous pass. Subsequent calls are no-ops while the
    /// task is running.
    pub fn start(&self) {
        let mut task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let dom = Arc::clone(&self.dom);
        *task = Some(tokio::spawn(async move {
            let mut mutations = dom.mutations();

            // Initial pass over everything already in the document.
            for element in dom.all_elements() {
                mark_if_preservable(dom.as_ref(), &element);
            }

            loop {
                match mutations.recv().await {
                    Ok(batch) => {
                        // Scan only while the page is actually inverted.
                        if !dom.has_root_class(INVERTED_CLASS) {
                            continue;
                        }
                        for element in batch {
                            mark_if_preservable(dom.as_ref(), &element);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "mutation stream lagged; skipped subtrees stay unmarked");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Stop the pass on page teardown.
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for SmartClassifier {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

fn mark_if_preservable(dom: &dyn PageDom, element: &ElementSnapshot) {
    if should_preserve(element) {
        dom.add_element_class(element.id, PRESERVE_CLASS);
    }
}

/// Pure decision: dark computed background or gradient background image.
#[must_use]
pub fn should_preserve(element: &ElementSnapshot) -> bool {
    if SKIP_TAGS.contains(&element.tag.as_str()) {
        return false;
    }

    if let Some(color) = element.background_color.as_deref() {
        if color != "transparent" && color != "rgba(0, 0, 0, 0)" && is_dark_color(color) {
            return true;
        }
    }

    if let Some(image) = element.background_image.as_deref() {
        if image != "none" && image.contains("gradient") {
            return true;
        }
    }

    false
}

/// True when the color parses and its weighted luminance is below the
/// threshold. Unparsable colors are treated as light.
#[must_use]
pub fn is_dark_color(color: &str) -> bool {
    let Some((r, g, b)) = parse_color(color) else {
        return false;
    };
    let luminance = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
    luminance < DARK_LUMINANCE_THRESHOLD
}

/// Parse `rgb()`/`rgba()` and 3- or 6-digit hex into channels.
#[must_use]
pub fn parse_color(color: &str) -> Option<(u8, u8, u8)> {
    if let Some(hex) = color.strip_prefix('#') {
        return parse_hex(hex);
    }
    if color.starts_with("rgb") {
        return parse_rgb_function(color);
    }
    None
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let r = u8::from_str_radix(&expanded[0..2], 16).ok()?;
    let g = u8::from_str_radix(&expanded[2..4], 16).ok()?;
    let b = u8::from_str_radix(&expanded[4..6], 16).ok()?;
    Some((r, g, b))
}

fn parse_rgb_function(color: &str) -> Option<(u8, u8, u8)> {
    let body = color.split_once('(')?.1.split(')').next()?;
    let mut channels = body.split(',').map(str::trim);
    let r = channels.next()?.parse().ok()?;
    let g = channels.next()?.parse().ok()?;
    let b = channels.next()?.parse().ok()?;
    Some((r, g, b))
}

// =============================================================================
// TESTS
// =============================================================================
