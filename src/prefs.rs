//! Preference model — the key-value schema shared with the platform store.
//!
//! DESIGN
//! ======
//! The platform's sync storage is the single source of truth; these types
//! only give it a schema. Components read on demand and never cache
//! authoritatively beyond a transient read-then-act. Writes go through
//! `PrefPatch` so a caller can update a subset of keys without clobbering
//! the rest, matching the store's partial-write semantics.
//!
//! Serialized field names are the storage keys, so they stay camelCase.

use serde::{Deserialize, Serialize};

// =============================================================================
// PREFERENCES
// =============================================================================

/// Popup chrome appearance. Does not affect page inversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiTheme {
    #[default]
    Light,
    Dark,
}

/// The full preference record, one per profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// Master dark-mode switch.
    pub enabled: bool,
    pub preserve_images: bool,
    pub preserve_videos: bool,
    pub preserve_canvas: bool,
    pub smart_inversion: bool,
    /// Ordered domain list; dark mode is forced off on matching domains.
    pub exclusions: Vec<String>,
    pub ui_theme: UiTheme,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: false,
            preserve_images: true,
            preserve_videos: true,
            preserve_canvas: true,
            smart_inversion: false,
            exclusions: Vec::new(),
            ui_theme: UiTheme::Light,
        }
    }
}

// =============================================================================
// PARTIAL WRITES
// =============================================================================

/// A partial preference write. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrefPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_videos: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_canvas: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_inversion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_theme: Option<UiTheme>,
}

impl PrefPatch {
    /// Patch flipping only the master switch.
    #[must_use]
    pub fn enabled(value: bool) -> Self {
        Self { enabled: Some(value), ..Self::default() }
    }

    /// The full default record, written once on install.
    #[must_use]
    pub fn install_defaults() -> Self {
        Self::full(&Preferences::default())
    }

    /// Patch covering every key of an existing record.
    #[must_use]
    pub fn full(prefs: &Preferences) -> Self {
        Self {
            enabled: Some(prefs.enabled),
            preserve_images: Some(prefs.preserve_images),
            preserve_videos: Some(prefs.preserve_videos),
            preserve_canvas: Some(prefs.preserve_canvas),
            smart_inversion: Some(prefs.smart_inversion),
            exclusions: Some(prefs.exclusions.clone()),
            ui_theme: Some(prefs.ui_theme),
        }
    }

    /// Apply this patch to a record, returning the keys that changed.
    pub fn apply_to(&self, prefs: &mut Preferences) -> Vec<PrefChange> {
        fn set<T: Clone + PartialEq + Serialize>(
            changes: &mut Vec<PrefChange>,
            key: PrefKey,
            slot: &mut T,
            value: Option<&T>,
        ) {
            let Some(value) = value else { return };
            if *slot == *value {
                return;
            }
            changes.push(PrefChange {
                key,
                old: serde_json::to_value(&*slot).unwrap_or_default(),
                new: serde_json::to_value(value).unwrap_or_default(),
            });
            *slot = value.clone();
        }

        let mut changes = Vec::new();
        set(&mut changes, PrefKey::Enabled, &mut prefs.enabled, self.enabled.as_ref());
        set(&mut changes, PrefKey::PreserveImages, &mut prefs.preserve_images, self.preserve_images.as_ref());
        set(&mut changes, PrefKey::PreserveVideos, &mut prefs.preserve_videos, self.preserve_videos.as_ref());
        set(&mut changes, PrefKey::PreserveCanvas, &mut prefs.preserve_canvas, self.preserve_canvas.as_ref());
        set(&mut changes, PrefKey::SmartInversion, &mut prefs.smart_inversion, self.smart_inversion.as_ref());
        set(&mut changes, PrefKey::Exclusions, &mut prefs.exclusions, self.exclusions.as_ref());
        set(&mut changes, PrefKey::UiTheme, &mut prefs.ui_theme, self.ui_theme.as_ref());

        changes
    }
}

// =============================================================================
// CHANGE NOTIFICATIONS
// =============================================================================

/// Storage keys, serialized exactly as the platform store names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrefKey {
    Enabled,
    PreserveImages,
    PreserveVideos,
    PreserveCanvas,
    SmartInversion,
    Exclusions,
    UiTheme,
}

/// One changed key, delivered on the store's change-notification stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefChange {
    pub key: PrefKey,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

// =============================================================================
// TESTS
// =============================================================================
