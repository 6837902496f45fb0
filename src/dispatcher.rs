//! Background dispatcher — tab registry, broadcast, and icon state.
//!
//! DESIGN
//! ======
//! The dispatcher is the single consumer of the host event stream and
//! the only component allowed to talk to more than one tab. It owns the
//! live tab membership set, the debounced icon state, and the two
//! broadcast entry points (preference change, forced refresh), which
//! deliberately share one code path.
//!
//! ERROR HANDLING
//! ==============
//! Per-tab work is isolated: injection or delivery failing on one tab is
//! logged and swallowed, and never aborts the remaining tabs. Storage
//! failures downgrade the operation to a no-op with a log line. Nothing
//! in this module is fatal.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::exclusion::{hostname_of, is_excluded};
use crate::host::{Host, HostEvent, IconTheme, TabEvent, TabId, TabInfo};
use crate::message::{Ack, Action, Request};
use crate::prefs::{PrefChange, PrefKey, PrefPatch};

/// The one global keyboard command: flip `enabled` and rebroadcast.
pub const TOGGLE_COMMAND: &str = "toggle-dark-mode";

const DEFAULT_ICON_DEBOUNCE_MS: u64 = 300;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Delay coalescing bursts of icon updates into a single write.
    pub icon_debounce: Duration,
}

impl DispatcherConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self { icon_debounce: Duration::from_millis(env_parse("UMBRA_ICON_DEBOUNCE_MS", DEFAULT_ICON_DEBOUNCE_MS)) }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { icon_debounce: Duration::from_millis(DEFAULT_ICON_DEBOUNCE_MS) }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Default)]
struct IconState {
    current: Option<IconTheme>,
    /// At most one scheduled update; superseded by any newer request.
    pending: Option<JoinHandle<()>>,
}

struct Shared {
    tabs: Mutex<HashSet<TabId>>,
    icon: Mutex<IconState>,
}

/// Process-wide coordinator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    host: Arc<dyn Host>,
    shared: Arc<Shared>,
    config: DispatcherConfig,
}

// =============================================================================
// EVENT LOOP
// =============================================================================

impl Dispatcher {
    #[must_use]
    pub fn new(host: Arc<dyn Host>, config: DispatcherConfig) -> Self {
        Self {
            host,
            shared: Arc::new(Shared { tabs: Mutex::new(HashSet::new()), icon: Mutex::new(IconState::default()) }),
            config,
        }
    }

    /// Consume the host event stream until it closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        self.sync_icon_from_store().await;

        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("host event stream closed; dispatcher stopping");
    }

    pub async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::Tab(tab_event) => self.on_tab_event(tab_event).await,
            HostEvent::Command(name) => self.on_command(&name).await,
            HostEvent::PrefChanged(change) => self.on_pref_changed(&change).await,
            HostEvent::Runtime { request, reply } => {
                let ack = self.on_runtime(&request).await;
                // The sender may be gone (fire-and-forget notifications).
                let _ = reply.send(ack);
            }
            HostEvent::Installed => self.on_installed().await,
        }
    }
}

// =============================================================================
// TAB LIFECYCLE
// =============================================================================

impl Dispatcher {
    async fn on_tab_event(&self, event: TabEvent) {
        match event {
            TabEvent::Created(tab) => {
                if tab.is_valid() {
                    self.lock_tabs().insert(tab.id);
                }
            }
            TabEvent::Updated { tab, load_complete } => {
                if tab.is_valid() {
                    self.lock_tabs().insert(tab.id);
                    if load_complete {
                        self.on_navigation_complete(&tab).await;
                    }
                }
            }
            TabEvent::Removed(tab_id) => {
                self.lock_tabs().remove(&tab_id);
            }
        }
    }

    /// A page finished loading: derive exclusion from the new URL and
    /// send exactly one apply-or-remove instruction.
    async fn on_navigation_complete(&self, tab: &TabInfo) {
        let prefs = match self.host.get_preferences().await {
            Ok(prefs) => prefs,
            Err(e) => {
                error!(error = %e, "preference read failed; navigation update skipped");
                return;
            }
        };
        if !prefs.enabled {
            return;
        }

        let url = tab.url.as_deref().unwrap_or_default();
        let Some(domain) = hostname_of(url) else {
            warn!(tab_id = tab.id, url, "invalid tab URL; navigation update skipped");
            return;
        };

        let action = if is_excluded(&domain, &prefs.exclusions) {
            Action::RemoveTheme
        } else {
            Action::ApplyTheme
        };
        match self.host.send_to_tab(tab.id, Request::new(action)).await {
            Ok(ack) if !ack.success => warn!(tab_id = tab.id, error = ?ack.error, "page rejected instruction"),
            Ok(_) => {}
            Err(e) => warn!(tab_id = tab.id, error = %e, "navigation update not delivered"),
        }
    }

    fn lock_tabs(&self) -> std::sync::MutexGuard<'_, HashSet<TabId>> {
        self.shared
            .tabs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Currently tracked tab ids, sorted for stable assertions.
    #[must_use]
    pub fn tracked_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.lock_tabs().iter().copied().collect();
        tabs.sort_unstable();
        tabs
    }
}

// =============================================================================
// COMMANDS AND PREFERENCE CHANGES
// =============================================================================

impl Dispatcher {
    async fn on_command(&self, name: &str) {
        if name != TOGGLE_COMMAND {
            debug!(command = name, "ignoring unknown command");
            return;
        }

        // Read-then-write as one logical step. Last write wins; a
        // concurrent second toggle may be lost.
        let prefs = match self.host.get_preferences().await {
            Ok(prefs) => prefs,
            Err(e) => {
                error!(error = %e, "preference read failed; toggle command dropped");
                return;
            }
        };
        if let Err(e) = self.host.set_preferences(PrefPatch::enabled(!prefs.enabled)).await {
            error!(error = %e, "preference write failed; toggle command dropped");
            return;
        }
        // The fan-out rides the resulting change notification, so the
        // hotkey and the settings UI converge on one broadcast path.
    }

    async fn on_pref_changed(&self, change: &PrefChange) {
        if change.key != PrefKey::Enabled {
            return;
        }
        let Some(enabled) = change.new.as_bool() else {
            warn!(value = %change.new, "enabled changed to a non-boolean; ignoring");
            return;
        };

        let exclusions = match self.host.get_preferences().await {
            Ok(prefs) => prefs.exclusions,
            Err(e) => {
                warn!(error = %e, "preference read failed; broadcasting without exclusions");
                Vec::new()
            }
        };
        self.refresh_all_tabs(enabled, &exclusions).await;
        self.set_icon_theme(if enabled { IconTheme::Dark } else { IconTheme::Light });
    }

    async fn on_installed(&self) {
        if let Err(e) = self.host.set_preferences(PrefPatch::install_defaults()).await {
            error!(error = %e, "writing install defaults failed");
        }
        self.set_icon_theme(IconTheme::Light);
    }

    async fn sync_icon_from_store(&self) {
        match self.host.get_preferences().await {
            Ok(prefs) => {
                self.set_icon_theme(if prefs.enabled { IconTheme::Dark } else { IconTheme::Light });
            }
            Err(e) => warn!(error = %e, "startup preference read failed; icon left as-is"),
        }
    }
}

// =============================================================================
// RUNTIME MESSAGES
// =============================================================================

impl Dispatcher {
    async fn on_runtime(&self, request: &Request) -> Ack {
        match request.action {
            Action::ChangeIcon => match request.icon_theme() {
                Some(theme) => {
                    self.set_icon_theme(theme);
                    Ack::ok()
                }
                None => Ack::fail("missing or invalid icon theme"),
            },
            Action::ForceUpdateAllTabs => {
                let (enabled, exclusions) = match (request.enabled_payload(), request.exclusions_payload()) {
                    (Some(enabled), Some(exclusions)) => (enabled, exclusions),
                    // Older callers omit the payload; fall back to the store.
                    _ => match self.host.get_preferences().await {
                        Ok(prefs) => (prefs.enabled, prefs.exclusions),
                        Err(e) => {
                            error!(error = %e, "preference read failed; force update aborted");
                            return Ack::fail("preferences unavailable");
                        }
                    },
                };
                self.refresh_all_tabs(enabled, &exclusions).await;
                Ack::ok()
            }
            Action::ApplyTheme | Action::RemoveTheme | Action::ToggleTheme => {
                Ack::fail(format!("unhandled action: {}", request.action))
            }
        }
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

impl Dispatcher {
    /// Re-inject and instruct every valid open tab. Tabs are processed
    /// concurrently and failures stay per-tab.
    async fn refresh_all_tabs(&self, enabled: bool, exclusions: &[String]) {
        let tabs = match self.host.query_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                error!(error = %e, "tab query failed; broadcast aborted");
                return;
            }
        };

        let work = tabs
            .into_iter()
            .filter(TabInfo::is_valid)
            .map(|tab| self.refresh_one_tab(tab, enabled, exclusions));
        futures::future::join_all(work).await;
    }

    async fn refresh_one_tab(&self, tab: TabInfo, enabled: bool, exclusions: &[String]) {
        if let Err(e) = self.host.inject_into(tab.id).await {
            warn!(tab_id = tab.id, error = %e, "content inject failed; tab skipped");
            return;
        }

        let excluded = match hostname_of(tab.url.as_deref().unwrap_or_default()) {
            Some(domain) => is_excluded(&domain, exclusions),
            None => {
                warn!(tab_id = tab.id, "invalid tab URL; treating as not excluded");
                false
            }
        };

        let action = if enabled && !excluded { Action::ApplyTheme } else { Action::RemoveTheme };
        match self.host.send_to_tab(tab.id, Request::new(action)).await {
            Ok(ack) if !ack.success => warn!(tab_id = tab.id, error = ?ack.error, "page rejected instruction"),
            Ok(_) => {}
            Err(e) => warn!(tab_id = tab.id, error = %e, "tab update skipped"),
        }
    }
}

// =============================================================================
// ICON DEBOUNCE
// =============================================================================

impl Dispatcher {
    /// Schedule an icon update. Redundant requests for the current theme
    /// are no-ops; within the debounce window only the last request
    /// fires.
    pub fn set_icon_theme(&self, theme: IconTheme) {
        let mut icon = self.lock_icon();
        if icon.current == Some(theme) {
            return;
        }
        if let Some(pending) = icon.pending.take() {
            pending.abort();
        }

        let host = Arc::clone(&self.host);
        let shared = Arc::clone(&self.shared);
        let delay = self.config.icon_debounce;
        icon.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = host.set_icon(theme).await {
                error!(error = %e, "icon update failed");
            }
            // Recorded even on failure so the next request still
            // debounces against the attempted theme.
            let mut icon = shared
                .icon
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            icon.current = Some(theme);
            icon.pending = None;
        }));
    }

    #[must_use]
    pub fn current_icon_theme(&self) -> Option<IconTheme> {
        self.lock_icon().current
    }

    fn lock_icon(&self) -> std::sync::MutexGuard<'_, IconState> {
        self.shared
            .icon
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
