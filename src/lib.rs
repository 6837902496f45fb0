//! umbra — coordination core of a site-wide dark-mode browser extension.
//!
//! ARCHITECTURE
//! ============
//! Three cooperating contexts, each a single-threaded event loop with no
//! shared memory between them:
//!
//! - the background [`dispatcher`], the process-wide coordinator owning
//!   the tab registry, the broadcast paths, and the debounced icon state
//! - one [`page`] agent per loaded page, owning the inversion state
//!   machine and the smart preservation pass
//! - the settings popup (out of scope here beyond its message contract)
//!
//! All cross-context traffic is asynchronous [`message`] passing with no
//! ordering guarantee beyond per-channel FIFO; every handler re-checks
//! the preference store instead of trusting the caller. The platform is
//! reached only through the [`host`] capability trait, with a stdio
//! bridge adapter in production and a simulated browser in tests.

pub mod dispatcher;
pub mod exclusion;
pub mod host;
pub mod message;
pub mod page;
pub mod prefs;
