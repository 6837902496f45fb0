//! Host capability boundary — everything the platform does for us.
//!
//! ARCHITECTURE
//! ============
//! The coordination core is written once against the [`Host`] trait. The
//! historical per-browser script variants collapse into adapters: the
//! stdio [`bridge`] speaks to the browser-side shim in production, and
//! the in-memory [`sim`] browser backs the test suite. The shim owns
//! per-vendor API divergence; nothing above this module knows which
//! browser family is on the other side.
//!
//! Inbound platform activity (tab lifecycle, hotkey commands, preference
//! changes, runtime messages) is delivered as one typed [`HostEvent`]
//! stream handed out when the adapter is constructed; the background
//! dispatcher is its single consumer.

pub mod bridge;
pub mod sim;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::message::{Ack, Request};
use crate::prefs::{PrefChange, PrefPatch, Preferences};

// =============================================================================
// TYPES
// =============================================================================

/// Platform tab identifier.
pub type TabId = u32;

/// URL schemes that mark a tab as privileged and off-limits.
const PRIVILEGED_SCHEMES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "about:",
    "moz-extension://",
    "edge://",
    "view-source:",
];

/// A tab as reported by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    /// Absent while the platform has not resolved the tab yet.
    pub url: Option<String>,
}

impl TabInfo {
    /// A tab is valid when it has a URL and the scheme is not privileged.
    /// Only valid tabs are tracked, injected into, or messaged.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match &self.url {
            Some(url) => !PRIVILEGED_SCHEMES.iter().any(|scheme| url.starts_with(scheme)),
            None => false,
        }
    }
}

/// Extension icon appearance, mirroring the enabled flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconTheme {
    Light,
    Dark,
}

impl IconTheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IconTheme::Light => "light",
            IconTheme::Dark => "dark",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "light" => Some(IconTheme::Light),
            "dark" => Some(IconTheme::Dark),
            _ => None,
        }
    }

    /// Packaged icon resource for this theme.
    #[must_use]
    pub fn icon_path(self) -> &'static str {
        match self {
            IconTheme::Light => "icons/icon-light-16.png",
            IconTheme::Dark => "icons/icon-dark-16.png",
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Tab lifecycle notifications from the platform.
#[derive(Debug, Clone)]
pub enum TabEvent {
    Created(TabInfo),
    /// Any tab mutation; `load_complete` marks the end of a navigation.
    Updated { tab: TabInfo, load_complete: bool },
    Removed(TabId),
}

/// Everything the platform pushes at the background process.
#[derive(Debug)]
pub enum HostEvent {
    Tab(TabEvent),
    /// A global keyboard command fired, identified by name.
    Command(String),
    /// One preference key changed in the store.
    PrefChanged(PrefChange),
    /// An inbound runtime message awaiting an ack.
    Runtime { request: Request, reply: oneshot::Sender<Ack> },
    /// The extension was just installed; defaults must be written.
    Installed,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Failures at the platform boundary. None of these are fatal: every
/// caller converts them to a log line plus a safe default.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("storage operation failed: {0}")]
    Storage(String),

    #[error("message delivery to tab {tab_id} failed: {reason}")]
    Delivery { tab_id: TabId, reason: String },

    #[error("script injection into tab {tab_id} failed: {reason}")]
    Injection { tab_id: TabId, reason: String },

    #[error("tab query failed: {0}")]
    TabQuery(String),

    #[error("icon update failed: {0}")]
    Icon(String),

    #[error("host bridge unavailable: {0}")]
    Bridge(String),
}

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Preference store access. Split out so per-page components depend on
/// the store alone, not the whole platform surface.
#[async_trait::async_trait]
pub trait PrefAccess: Send + Sync {
    /// Read the full preference record.
    async fn get_preferences(&self) -> Result<Preferences, HostError>;

    /// Write a partial preference record. Last write wins; the store
    /// emits one change notification per key that actually changed.
    async fn set_preferences(&self, patch: PrefPatch) -> Result<(), HostError>;
}

/// The full platform capability surface used by the background process.
#[async_trait::async_trait]
pub trait Host: PrefAccess {
    /// Enumerate all open tabs. Order is platform enumeration order and
    /// not guaranteed stable.
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, HostError>;

    /// Deliver a request to one tab's page and await its ack.
    async fn send_to_tab(&self, tab_id: TabId, request: Request) -> Result<Ack, HostError>;

    /// Inject the content logic into a tab. Idempotent when the logic is
    /// already present.
    async fn inject_into(&self, tab_id: TabId) -> Result<(), HostError>;

    /// Set the extension icon resource.
    async fn set_icon(&self, theme: IconTheme) -> Result<(), HostError>;
}

// =============================================================================
// TESTS
// =============================================================================
