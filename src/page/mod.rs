//! Page-side components — everything that runs inside a loaded page.
//!
//! ARCHITECTURE
//! ============
//! The [`agent`] task is the page's entry point; it owns one
//! [`applier`], which in turn owns the [`classifier`] pass. All DOM
//! access goes through the [`dom`] binding, and [`css`] holds the
//! visible contract (marker class, style element ids) plus the rule
//! composition.

pub mod agent;
pub mod applier;
pub mod classifier;
pub mod css;
pub mod dom;
