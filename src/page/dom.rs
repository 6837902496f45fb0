//! Page DOM binding — the thin surface the applier and classifier touch.
//!
//! DESIGN
//! ======
//! The real rendering engine is out of scope; the theme logic only ever
//! toggles a root class, writes two style elements, keeps one durable
//! per-origin flag, and tags elements with an exemption class. That
//! surface is the [`PageDom`] trait. [`MemoryDom`] is the in-memory
//! binding used by the simulated browser and the test suite; a real-DOM
//! binding implements the same trait on the browser side.
//!
//! Mutation delivery mirrors the platform's observer: each event carries
//! the flattened snapshots of an added subtree.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

// =============================================================================
// TYPES
// =============================================================================

/// Opaque element handle, valid for the lifetime of one document.
pub type ElementId = usize;

/// Computed-style snapshot of one element, as the classifier sees it.
#[derive(Debug, Clone)]
pub struct ElementSnapshot {
    pub id: ElementId,
    /// Lowercase tag name.
    pub tag: String,
    pub background_color: Option<String>,
    pub background_image: Option<String>,
}

/// The DOM operations the theme logic is allowed to perform.
pub trait PageDom: Send + Sync {
    fn hostname(&self) -> String;

    fn has_root_class(&self, class: &str) -> bool;
    fn add_root_class(&self, class: &str);
    fn remove_root_class(&self, class: &str);

    fn has_style(&self, id: &str) -> bool;
    /// Append a new style element. Callers check `has_style` first; the
    /// DOM itself does not deduplicate.
    fn insert_style(&self, id: &str, css: &str);
    /// Replace the text of a style element, creating it when missing.
    fn set_style_text(&self, id: &str, css: &str);
    fn style_text(&self, id: &str) -> Option<String>;

    /// Durable per-origin flag, surviving reloads of this document.
    fn flag(&self, key: &str) -> Option<String>;
    fn set_flag(&self, key: &str, value: &str);
    fn remove_flag(&self, key: &str);

    /// Snapshot of every element currently in the document.
    fn all_elements(&self) -> Vec<ElementSnapshot>;
    fn add_element_class(&self, id: ElementId, class: &str);
    /// Subscribe to added-subtree notifications.
    fn mutations(&self) -> broadcast::Receiver<Vec<ElementSnapshot>>;
}

// =============================================================================
// IN-MEMORY DOM
// =============================================================================

struct Element {
    tag: String,
    background_color: Option<String>,
    background_image: Option<String>,
    classes: Vec<String>,
}

struct DomInner {
    hostname: String,
    root_classes: Vec<String>,
    /// (id, css) pairs; a vec so duplicate insertions stay observable.
    styles: Vec<(String, String)>,
    flags: HashMap<String, String>,
    elements: Vec<Element>,
}

/// In-memory document backing the simulated browser.
pub struct MemoryDom {
    inner: Mutex<DomInner>,
    mutations_tx: broadcast::Sender<Vec<ElementSnapshot>>,
}

impl MemoryDom {
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        let (mutations_tx, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(DomInner {
                hostname: hostname.into(),
                root_classes: Vec::new(),
                styles: Vec::new(),
                flags: HashMap::new(),
                elements: Vec::new(),
            }),
            mutations_tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DomInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Reset the document as a same-origin reload would: classes, styles,
    /// and elements go, the durable flags stay.
    pub fn reload(&self) {
        let mut inner = self.lock();
        inner.root_classes.clear();
        inner.styles.clear();
        inner.elements.clear();
    }

    /// Add one element and emit a single-node mutation.
    pub fn attach_element(
        &self,
        tag: &str,
        background_color: Option<&str>,
        background_image: Option<&str>,
    ) -> ElementId {
        self.attach_subtree(&[(tag, background_color, background_image)])[0]
    }

    /// Add a subtree and emit one mutation carrying all of its nodes.
    pub fn attach_subtree(&self, nodes: &[(&str, Option<&str>, Option<&str>)]) -> Vec<ElementId> {
        let mut snapshots = Vec::with_capacity(nodes.len());
        let ids = {
            let mut inner = self.lock();
            nodes
                .iter()
                .map(|(tag, color, image)| {
                    let id = inner.elements.len();
                    inner.elements.push(Element {
                        tag: (*tag).to_string(),
                        background_color: color.map(String::from),
                        background_image: image.map(String::from),
                        classes: Vec::new(),
                    });
                    snapshots.push(ElementSnapshot {
                        id,
                        tag: (*tag).to_string(),
                        background_color: color.map(String::from),
                        background_image: image.map(String::from),
                    });
                    id
                })
                .collect()
        };
        let _ = self.mutations_tx.send(snapshots);
        ids
    }

    /// Number of style elements carrying this id. More than one means a
    /// caller skipped its existence check.
    #[must_use]
    pub fn style_count(&self, id: &str) -> usize {
        self.lock().styles.iter().filter(|(sid, _)| sid == id).count()
    }

    #[must_use]
    pub fn element_classes(&self, id: ElementId) -> Vec<String> {
        self.lock()
            .elements
            .get(id)
            .map(|e| e.classes.clone())
            .unwrap_or_default()
    }
}

impl PageDom for MemoryDom {
    fn hostname(&self) -> String {
        self.lock().hostname.clone()
    }

    fn has_root_class(&self, class: &str) -> bool {
        self.lock().root_classes.iter().any(|c| c == class)
    }

    fn add_root_class(&self, class: &str) {
        let mut inner = self.lock();
        if !inner.root_classes.iter().any(|c| c == class) {
            inner.root_classes.push(class.to_string());
        }
    }

    fn remove_root_class(&self, class: &str) {
        self.lock().root_classes.retain(|c| c != class);
    }

    fn has_style(&self, id: &str) -> bool {
        self.lock().styles.iter().any(|(sid, _)| sid == id)
    }

    fn insert_style(&self, id: &str, css: &str) {
        self.lock().styles.push((id.to_string(), css.to_string()));
    }

    fn set_style_text(&self, id: &str, css: &str) {
        let mut inner = self.lock();
        match inner.styles.iter_mut().find(|(sid, _)| sid == id) {
            Some((_, text)) => css.clone_into(text),
            None => inner.styles.push((id.to_string(), css.to_string())),
        }
    }

    fn style_text(&self, id: &str) -> Option<String> {
        self.lock()
            .styles
            .iter()
            .find(|(sid, _)| sid == id)
            .map(|(_, text)| text.clone())
    }

    fn flag(&self, key: &str) -> Option<String> {
        self.lock().flags.get(key).cloned()
    }

    fn set_flag(&self, key: &str, value: &str) {
        self.lock().flags.insert(key.to_string(), value.to_string());
    }

    fn remove_flag(&self, key: &str) {
        self.lock().flags.remove(key);
    }

    fn all_elements(&self) -> Vec<ElementSnapshot> {
        self.lock()
            .elements
            .iter()
            .enumerate()
            .map(|(id, e)| ElementSnapshot {
                id,
                tag: e.tag.clone(),
                background_color: e.background_color.clone(),
                background_image: e.background_image.clone(),
            })
            .collect()
    }

    fn add_element_class(&self, id: ElementId, class: &str) {
        let mut inner = self.lock();
        if let Some(element) = inner.elements.get_mut(id) {
            if !element.classes.iter().any(|c| c == class) {
                element.classes.push(class.to_string());
            }
        }
    }

    fn mutations(&self) -> broadcast::Receiver<Vec<ElementSnapshot>> {
        self.mutations_tx.subscribe()
    }
}

// =============================================================================
// TESTS
// =============================================================================
