//! Per-page theme applier — the inversion state machine for one page.
//!
//! DESIGN
//! ======
//! One applier lives in each loaded page. It owns two pieces of local
//! state: whether the inversion class is currently applied, and the last
//! icon theme it notified the background about (so repeated applies do
//! not spam the debounced icon path).
//!
//! Both apply and remove re-check the enabled flag and exclusion status
//! against the page's own hostname before acting, never trusting the
//! caller's view — messages race, and a stale "apply" can land after a
//! fresh "remove". Both operations are idempotent and safe to repeat.
//!
//! A durable per-origin marker records inverted state so a reload can
//! restore it before preferences are re-fetched, avoiding a flash of
//! uninverted content; the regular startup check then confirms or
//! reverts.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::exclusion::is_excluded;
use crate::host::{HostError, IconTheme, PrefAccess};
use crate::message::Request;
use crate::page::classifier::SmartClassifier;
use crate::page::css::{self, BASE_STYLE_ID, INVERTED_CLASS, PRESERVE_STYLE_ID};
use crate::page::dom::PageDom;
use crate::prefs::Preferences;

/// Durable per-origin flag recording inverted state across reloads.
pub const STATE_FLAG: &str = "umbraState";

/// Value stored under [`STATE_FLAG`] while inverted.
const STATE_ENABLED: &str = "enabled";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApplierError {
    /// The preference store could not be read; the operation was not
    /// applied and page state is unchanged.
    #[error("preference read failed: {0}")]
    Prefs(#[from] HostError),
}

#[derive(Default)]
struct PageThemeState {
    inverted: bool,
    last_notified: Option<IconTheme>,
}

pub struct ThemeApplier {
    prefs: Arc<dyn PrefAccess>,
    dom: Arc<dyn PageDom>,
    /// Outbound runtime messages toward the background (icon changes).
    outbound: mpsc::UnboundedSender<Request>,
    classifier: SmartClassifier,
    state: Mutex<PageThemeState>,
}

// =============================================================================
// LIFECYCLE
// =============================================================================

impl ThemeApplier {
    #[must_use]
    pub fn new(
        prefs: Arc<dyn PrefAccess>,
        dom: Arc<dyn PageDom>,
        outbound: mpsc::UnboundedSender<Request>,
    ) -> Self {
        let classifier = SmartClassifier::new(Arc::clone(&dom));
        Self { prefs, dom, outbound, classifier, state: Mutex::new(PageThemeState::default()) }
    }

    /// Page load entry point: restore from the durable marker first, then
    /// confirm against current preferences.
    pub async fn startup(&self) {
        self.restore_from_marker();

        match self.prefs.get_preferences().await {
            Ok(prefs) => {
                let result = if prefs.enabled && !is_excluded(&self.dom.hostname(), &prefs.exclusions) {
                    self.apply_theme().await
                } else {
                    self.remove_theme().await
                };
                if let Err(e) = result {
                    warn!(error = %e, "startup theme sync failed");
                }
            }
            Err(e) => warn!(error = %e, "startup preference read failed; keeping restored state"),
        }
    }

    /// Re-apply the marker state before any storage read. Silent: icon
    /// notification waits for the confirmed apply.
    fn restore_from_marker(&self) {
        if self.dom.flag(STATE_FLAG).as_deref() != Some(STATE_ENABLED) {
            return;
        }
        self.ensure_base_style();
        self.dom.add_root_class(INVERTED_CLASS);
        self.lock_state().inverted = true;
    }

    /// Stop background work on page teardown.
    pub fn shutdown(&self) {
        self.classifier.stop();
    }

    #[must_use]
    pub fn is_inverted(&self) -> bool {
        self.lock_state().inverted
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PageThemeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// =============================================================================
// APPLY / REMOVE / TOGGLE
// =============================================================================

impl ThemeApplier {
    /// Apply the inversion. No-ops when dark mode is off or this domain
    /// is excluded, regardless of what the caller believed.
    ///
    /// # Errors
    ///
    /// Returns an error when the preference store cannot be read; the
    /// page is left unchanged.
    pub async fn apply_theme(&self) -> Result<(), ApplierError> {
        let prefs = self.prefs.get_preferences().await?;
        if !prefs.enabled || is_excluded(&self.dom.hostname(), &prefs.exclusions) {
            return Ok(());
        }

        self.ensure_base_style();
        self.refresh_preservation(&prefs);
        self.dom.add_root_class(INVERTED_CLASS);
        self.dom.set_flag(STATE_FLAG, STATE_ENABLED);
        self.lock_state().inverted = true;
        self.notify_icon(IconTheme::Dark);
        Ok(())
    }

    /// Remove the inversion. No-ops when the page should in fact remain
    /// inverted (enabled and not excluded).
    ///
    /// # Errors
    ///
    /// Returns an error when the preference store cannot be read; the
    /// page is left unchanged.
    pub async fn remove_theme(&self) -> Result<(), ApplierError> {
        let prefs = self.prefs.get_preferences().await?;
        if prefs.enabled && !is_excluded(&self.dom.hostname(), &prefs.exclusions) {
            return Ok(());
        }

        self.dom.remove_root_class(INVERTED_CLASS);
        self.dom.remove_flag(STATE_FLAG);
        self.lock_state().inverted = false;
        self.notify_icon(IconTheme::Light);
        Ok(())
    }

    /// Apply or remove based on the current local inverted state.
    ///
    /// # Errors
    ///
    /// Propagates the underlying apply/remove preference-read failure.
    pub async fn toggle_theme(&self) -> Result<(), ApplierError> {
        let inverted = self.lock_state().inverted;
        if inverted {
            self.remove_theme().await
        } else {
            self.apply_theme().await
        }
    }
}

// =============================================================================
// INTERNALS
// =============================================================================

impl ThemeApplier {
    /// Insert the base inversion rule once. The marker check keeps
    /// repeated applies from stacking style elements.
    fn ensure_base_style(&self) {
        if !self.dom.has_style(BASE_STYLE_ID) {
            self.dom.insert_style(BASE_STYLE_ID, &css::base_rule());
        }
    }

    /// Rebuild the preservation stylesheet from current flags and start
    /// the smart pass when it is enabled.
    fn refresh_preservation(&self, prefs: &Preferences) {
        self.dom.set_style_text(PRESERVE_STYLE_ID, &css::preservation_rule(prefs));
        if prefs.smart_inversion {
            self.classifier.start();
        }
    }

    /// Tell the background about the icon theme, once per transition.
    fn notify_icon(&self, theme: IconTheme) {
        {
            let mut state = self.lock_state();
            if state.last_notified == Some(theme) {
                return;
            }
            state.last_notified = Some(theme);
        }
        if self.outbound.send(Request::change_icon(theme)).is_err() {
            debug!("background channel closed; icon notification dropped");
        }
    }
}

#[cfg(test)]
#[path = "applier_test.rs"]
mod tests;
