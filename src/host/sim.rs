//! Simulated browser — the in-memory host adapter behind the test suite.
//!
//! DESIGN
//! ======
//! `SimHost` models exactly the platform surface the core touches: a tab
//! table with per-tab documents and mailboxes, a preference store with
//! change notifications, an icon-write log, and failure injection for
//! the error paths (delivery, injection, storage). Opening or navigating
//! a tab spawns a page agent against the tab's document, the same way a
//! manifest-declared content script loads with the page.
//!
//! Driver methods (`open_tab`, `press_command`, `send_runtime`, ...) play
//! the role of the browser UI; the `Host` impl is what the dispatcher
//! sees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::exclusion::hostname_of;
use crate::host::{Host, HostError, HostEvent, IconTheme, PrefAccess, TabEvent, TabId, TabInfo};
use crate::message::{Ack, Request};
use crate::page::agent::{PageMailbox, spawn_page_agent};
use crate::page::dom::{MemoryDom, PageDom};
use crate::prefs::{PrefChange, PrefPatch, Preferences};

// =============================================================================
// IN-MEMORY PREFERENCE STORE
// =============================================================================

/// In-memory preference store with optional failure injection.
pub struct MemoryPrefs {
    inner: Mutex<Preferences>,
    fail: AtomicBool,
}

impl MemoryPrefs {
    #[must_use]
    pub fn new(initial: Preferences) -> Self {
        Self { inner: Mutex::new(initial), fail: AtomicBool::new(false) }
    }

    /// Make every subsequent read and write fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Apply a patch and return the changes it produced.
    ///
    /// # Errors
    ///
    /// Fails when failure injection is armed.
    pub fn apply(&self, patch: &PrefPatch) -> Result<Vec<PrefChange>, HostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::Storage("simulated storage failure".into()));
        }
        let mut prefs = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(patch.apply_to(&mut prefs))
    }

    #[must_use]
    pub fn snapshot(&self) -> Preferences {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryPrefs {
    fn default() -> Self {
        Self::new(Preferences::default())
    }
}

#[async_trait::async_trait]
impl PrefAccess for MemoryPrefs {
    async fn get_preferences(&self) -> Result<Preferences, HostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::Storage("simulated storage failure".into()));
        }
        Ok(self.snapshot())
    }

    async fn set_preferences(&self, patch: PrefPatch) -> Result<(), HostError> {
        self.apply(&patch).map(|_| ())
    }
}

// =============================================================================
// SIMULATED BROWSER
// =============================================================================

struct SimTab {
    url: Option<String>,
    dom: Arc<MemoryDom>,
    agent: Option<PageMailbox>,
    fail_delivery: bool,
    fail_injection: bool,
}

struct SimInner {
    tabs: HashMap<TabId, SimTab>,
    next_tab_id: TabId,
    icon_writes: Vec<IconTheme>,
}

pub struct SimHost {
    prefs: Arc<MemoryPrefs>,
    inner: Mutex<SimInner>,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    /// Whether page loads spawn an agent automatically, like a
    /// manifest-declared content script.
    auto_inject: AtomicBool,
}

impl SimHost {
    /// Build a simulated browser and hand out its event stream. The
    /// dispatcher is the stream's single consumer.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self {
            prefs: Arc::new(MemoryPrefs::default()),
            inner: Mutex::new(SimInner { tabs: HashMap::new(), next_tab_id: 1, icon_writes: Vec::new() }),
            events_tx,
            auto_inject: AtomicBool::new(true),
        });
        (host, events_rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn spawn_agent(&self, dom: &Arc<MemoryDom>) -> PageMailbox {
        spawn_page_agent(
            Arc::clone(&self.prefs) as Arc<dyn PrefAccess>,
            Arc::clone(dom) as Arc<dyn PageDom>,
            self.events_tx.clone(),
        )
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.events_tx.send(event);
    }
}

// =============================================================================
// BROWSER DRIVER (test surface)
// =============================================================================

impl SimHost {
    /// Fire the install notification.
    pub fn install(&self) {
        self.emit(HostEvent::Installed);
    }

    /// Open a tab, load its page, and report both lifecycle events.
    pub fn open_tab(&self, url: &str) -> TabId {
        let dom = Arc::new(MemoryDom::new(hostname_of(url).unwrap_or_default()));
        let info = {
            let mut inner = self.lock();
            let id = inner.next_tab_id;
            inner.next_tab_id += 1;
            let info = TabInfo { id, url: Some(url.to_string()) };
            let agent = (self.auto_inject.load(Ordering::SeqCst) && info.is_valid())
                .then(|| self.spawn_agent(&dom));
            inner.tabs.insert(
                id,
                SimTab { url: Some(url.to_string()), dom, agent, fail_delivery: false, fail_injection: false },
            );
            info
        };
        self.emit(HostEvent::Tab(TabEvent::Created(info.clone())));
        self.emit(HostEvent::Tab(TabEvent::Updated { tab: info.clone(), load_complete: true }));
        info.id
    }

    /// Same-origin reload: document state resets, durable flags survive,
    /// and a fresh agent loads with the page.
    pub fn reload_tab(&self, tab_id: TabId) {
        let info = {
            let mut inner = self.lock();
            let Some(tab) = inner.tabs.get_mut(&tab_id) else { return };
            tab.dom.reload();
            tab.agent = None;
            let info = TabInfo { id: tab_id, url: tab.url.clone() };
            if self.auto_inject.load(Ordering::SeqCst) && info.is_valid() {
                tab.agent = Some(self.spawn_agent(&Arc::clone(&tab.dom)));
            }
            info
        };
        self.emit(HostEvent::Tab(TabEvent::Updated { tab: info, load_complete: true }));
    }

    /// Cross-origin navigation: a fresh document replaces the old one.
    pub fn navigate(&self, tab_id: TabId, url: &str) {
        let info = {
            let mut inner = self.lock();
            let Some(tab) = inner.tabs.get_mut(&tab_id) else { return };
            tab.url = Some(url.to_string());
            tab.dom = Arc::new(MemoryDom::new(hostname_of(url).unwrap_or_default()));
            tab.agent = None;
            let info = TabInfo { id: tab_id, url: Some(url.to_string()) };
            if self.auto_inject.load(Ordering::SeqCst) && info.is_valid() {
                tab.agent = Some(self.spawn_agent(&Arc::clone(&tab.dom)));
            }
            info
        };
        self.emit(HostEvent::Tab(TabEvent::Updated { tab: info, load_complete: true }));
    }

    pub fn close_tab(&self, tab_id: TabId) {
        self.lock().tabs.remove(&tab_id);
        self.emit(HostEvent::Tab(TabEvent::Removed(tab_id)));
    }

    /// Fire a global keyboard command.
    pub fn press_command(&self, name: &str) {
        self.emit(HostEvent::Command(name.to_string()));
    }

    /// Deliver a runtime message to the background and await its ack,
    /// the way the popup does.
    pub async fn send_runtime(&self, request: Request) -> Option<Ack> {
        let (reply, rx) = oneshot::channel();
        self.events_tx.send(HostEvent::Runtime { request, reply }).ok()?;
        rx.await.ok()
    }

    #[must_use]
    pub fn document(&self, tab_id: TabId) -> Option<Arc<MemoryDom>> {
        self.lock().tabs.get(&tab_id).map(|t| Arc::clone(&t.dom))
    }

    #[must_use]
    pub fn injected(&self, tab_id: TabId) -> bool {
        self.lock().tabs.get(&tab_id).is_some_and(|t| t.agent.is_some())
    }

    #[must_use]
    pub fn icon_writes(&self) -> Vec<IconTheme> {
        self.lock().icon_writes.clone()
    }

    #[must_use]
    pub fn prefs(&self) -> &MemoryPrefs {
        &self.prefs
    }

    pub fn set_auto_inject(&self, on: bool) {
        self.auto_inject.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_delivery(&self, tab_id: TabId, fail: bool) {
        if let Some(tab) = self.lock().tabs.get_mut(&tab_id) {
            tab.fail_delivery = fail;
        }
    }

    pub fn set_fail_injection(&self, tab_id: TabId, fail: bool) {
        if let Some(tab) = self.lock().tabs.get_mut(&tab_id) {
            tab.fail_injection = fail;
        }
    }
}

// =============================================================================
// HOST IMPL
// =============================================================================

#[async_trait::async_trait]
impl PrefAccess for SimHost {
    async fn get_preferences(&self) -> Result<Preferences, HostError> {
        self.prefs.get_preferences().await
    }

    async fn set_preferences(&self, patch: PrefPatch) -> Result<(), HostError> {
        // The store reports each changed key on the notification stream.
        let changes = self.prefs.apply(&patch)?;
        for change in changes {
            self.emit(HostEvent::PrefChanged(change));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Host for SimHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        let inner = self.lock();
        let mut tabs: Vec<TabInfo> = inner
            .tabs
            .iter()
            .map(|(id, tab)| TabInfo { id: *id, url: tab.url.clone() })
            .collect();
        tabs.sort_by_key(|t| t.id);
        Ok(tabs)
    }

    async fn send_to_tab(&self, tab_id: TabId, request: Request) -> Result<Ack, HostError> {
        let mailbox = {
            let inner = self.lock();
            let Some(tab) = inner.tabs.get(&tab_id) else {
                return Err(HostError::Delivery { tab_id, reason: "tab closed".into() });
            };
            if tab.fail_delivery {
                return Err(HostError::Delivery { tab_id, reason: "simulated delivery failure".into() });
            }
            let Some(mailbox) = tab.agent.clone() else {
                return Err(HostError::Delivery { tab_id, reason: "no receiver in page".into() });
            };
            mailbox
        };

        let (reply, rx) = oneshot::channel();
        mailbox
            .send((request, reply))
            .map_err(|_| HostError::Delivery { tab_id, reason: "page unloaded".into() })?;
        rx.await
            .map_err(|_| HostError::Delivery { tab_id, reason: "page unloaded before ack".into() })
    }

    async fn inject_into(&self, tab_id: TabId) -> Result<(), HostError> {
        let dom = {
            let inner = self.lock();
            let Some(tab) = inner.tabs.get(&tab_id) else {
                return Err(HostError::Injection { tab_id, reason: "tab closed".into() });
            };
            if tab.fail_injection {
                return Err(HostError::Injection { tab_id, reason: "simulated injection failure".into() });
            }
            if tab.agent.is_some() {
                // Already present; re-injection is a no-op.
                return Ok(());
            }
            Arc::clone(&tab.dom)
        };

        let mailbox = self.spawn_agent(&dom);
        if let Some(tab) = self.lock().tabs.get_mut(&tab_id) {
            tab.agent = Some(mailbox);
        }
        Ok(())
    }

    async fn set_icon(&self, theme: IconTheme) -> Result<(), HostError> {
        self.lock().icon_writes.push(theme);
        Ok(())
    }
}

#[cfg(test)]
#[path = "sim_test.rs"]
mod tests;
