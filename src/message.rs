//! Request — the messaging contract between background, pages, and popup.
//!
//! DESIGN
//! ======
//! Every cross-context message is a `Request` carrying an action name and
//! a flat data payload. Handlers answer with an `Ack` (`success` plus an
//! optional error string); the transport keeps the channel open for the
//! asynchronous reply and correlates it by request id.
//!
//! - Flat data: payload is always `Map<String, Value>`, never nested.
//! - The dispatch layers route on `action` alone and only the accessor
//!   helpers here inspect `data`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::host::IconTheme;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Data key for the icon theme on `changeIcon` requests.
pub const DATA_THEME: &str = "theme";

/// Data key for the enabled flag on `forceUpdateAllTabs` requests.
pub const DATA_ENABLED: &str = "enabled";

/// Data key for the exclusion list on `forceUpdateAllTabs` requests.
pub const DATA_EXCLUSIONS: &str = "exclusions";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// Every action a message can carry, page-bound or background-bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Invoke the page applier's apply path.
    ApplyTheme,
    /// Invoke the page applier's remove path.
    RemoveTheme,
    /// Apply or remove based on the page's current inverted state.
    ToggleTheme,
    /// Update the process-wide icon state (debounced in the background).
    ChangeIcon,
    /// Re-broadcast apply/remove to every valid tab.
    ForceUpdateAllTabs,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::ApplyTheme => "applyTheme",
            Action::RemoveTheme => "removeTheme",
            Action::ToggleTheme => "toggleTheme",
            Action::ChangeIcon => "changeIcon",
            Action::ForceUpdateAllTabs => "forceUpdateAllTabs",
        };
        f.write_str(name)
    }
}

/// One cross-context message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Data::is_empty")]
    pub data: Data,
}

/// Handler reply. `success: false` carries a reason in `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Request {
    /// Create a request with an empty payload.
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self { id: Uuid::new_v4(), action, data: Data::new() }
    }

    /// Create a `changeIcon` request for the given theme.
    #[must_use]
    pub fn change_icon(theme: IconTheme) -> Self {
        Self::new(Action::ChangeIcon).with_data(DATA_THEME, theme.as_str())
    }

    /// Create a `forceUpdateAllTabs` request carrying the current flags.
    #[must_use]
    pub fn force_update(enabled: bool, exclusions: &[String]) -> Self {
        Self::new(Action::ForceUpdateAllTabs)
            .with_data(DATA_ENABLED, enabled)
            .with_data(DATA_EXCLUSIONS, exclusions.to_vec())
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl Ack {
    /// Successful reply.
    #[must_use]
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    /// Failed reply with a reason.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

// =============================================================================
// PAYLOAD ACCESSORS
// =============================================================================

impl Request {
    /// Parse the icon theme from a `changeIcon` payload.
    #[must_use]
    pub fn icon_theme(&self) -> Option<IconTheme> {
        self.data
            .get(DATA_THEME)
            .and_then(|v| v.as_str())
            .and_then(IconTheme::parse)
    }

    /// Read the enabled flag from a `forceUpdateAllTabs` payload.
    #[must_use]
    pub fn enabled_payload(&self) -> Option<bool> {
        self.data.get(DATA_ENABLED).and_then(serde_json::Value::as_bool)
    }

    /// Read the exclusion list from a `forceUpdateAllTabs` payload.
    #[must_use]
    pub fn exclusions_payload(&self) -> Option<Vec<String>> {
        let entries = self.data.get(DATA_EXCLUSIONS)?.as_array()?;
        entries
            .iter()
            .map(|v| v.as_str().map(String::from))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_are_camel_case_on_the_wire() {
        let json = serde_json::to_string(&Action::ForceUpdateAllTabs).unwrap();
        assert_eq!(json, "\"forceUpdateAllTabs\"");
        let back: Action = serde_json::from_str("\"applyTheme\"").unwrap();
        assert_eq!(back, Action::ApplyTheme);
    }

    #[test]
    fn json_round_trip() {
        let original = Request::new(Action::ApplyTheme).with_data("key", "value");
        let json = serde_json::to_string(&original).expect("serialize");
        let restored: Request = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.action, Action::ApplyTheme);
        assert_eq!(restored.data.get("key").and_then(|v| v.as_str()), Some("value"));
    }

    #[test]
    fn empty_payload_is_omitted_and_defaulted() {
        let json = serde_json::to_string(&Request::new(Action::ToggleTheme)).unwrap();
        assert!(!json.contains("data"));

        let restored: Request =
            serde_json::from_str("{\"id\":\"9f2c4e36-5b1a-4f07-9c69-1a2b3c4d5e6f\",\"action\":\"toggleTheme\"}")
                .unwrap();
        assert!(restored.data.is_empty());
    }

    #[test]
    fn change_icon_payload_round_trips() {
        let req = Request::change_icon(IconTheme::Dark);
        assert_eq!(req.action, Action::ChangeIcon);
        assert_eq!(req.icon_theme(), Some(IconTheme::Dark));
    }

    #[test]
    fn invalid_icon_theme_is_none() {
        let req = Request::new(Action::ChangeIcon).with_data(DATA_THEME, "sepia");
        assert_eq!(req.icon_theme(), None);
    }

    #[test]
    fn force_update_payload_round_trips() {
        let exclusions = vec!["a.com".to_string(), "b.com".to_string()];
        let req = Request::force_update(true, &exclusions);
        assert_eq!(req.enabled_payload(), Some(true));
        assert_eq!(req.exclusions_payload(), Some(exclusions));
    }

    #[test]
    fn ack_error_is_omitted_on_success() {
        let json = serde_json::to_string(&Ack::ok()).unwrap();
        assert_eq!(json, "{\"success\":true}");

        let fail = Ack::fail("boom");
        assert!(!fail.success);
        assert_eq!(fail.error.as_deref(), Some("boom"));
    }
}
