//! Per-page event loop — the content-side entry point for one page.
//!
//! DESIGN
//! ======
//! Each loaded page runs one agent task owning one [`ThemeApplier`].
//! Inbound requests from the background are answered with an ack;
//! outbound notifications from the applier (icon changes) are forwarded
//! to the background as fire-and-forget runtime messages. The agent
//! never sends frames on the applier's behalf — the applier decides, the
//! agent routes.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::host::{HostEvent, PrefAccess};
use crate::message::{Ack, Action, Request};
use crate::page::applier::ThemeApplier;
use crate::page::dom::PageDom;

/// Sender half of a page's request mailbox.
pub type PageMailbox = mpsc::UnboundedSender<(Request, oneshot::Sender<Ack>)>;

/// Spawn the agent task for one page and return its mailbox.
///
/// The task runs until the mailbox closes (page teardown), then stops
/// the applier's background work.
pub fn spawn_page_agent(
    prefs: Arc<dyn PrefAccess>,
    dom: Arc<dyn PageDom>,
    background: mpsc::UnboundedSender<HostEvent>,
) -> PageMailbox {
    let (mailbox_tx, mut mailbox_rx): (PageMailbox, _) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let applier = ThemeApplier::new(prefs, dom, outbound_tx);

    tokio::spawn(async move {
        applier.startup().await;

        loop {
            tokio::select! {
                inbound = mailbox_rx.recv() => {
                    let Some((request, reply)) = inbound else { break };
                    let ack = handle_request(&applier, &request).await;
                    let _ = reply.send(ack);
                }
                Some(request) = outbound_rx.recv() => {
                    // Fire-and-forget: the background's ack is not awaited.
                    let (ack_tx, _ack_rx) = oneshot::channel();
                    if background.send(HostEvent::Runtime { request, reply: ack_tx }).is_err() {
                        debug!("background event stream closed; notification dropped");
                    }
                }
            }
        }

        applier.shutdown();
    });

    mailbox_tx
}

async fn handle_request(applier: &ThemeApplier, request: &Request) -> Ack {
    let result = match request.action {
        Action::ApplyTheme => applier.apply_theme().await,
        Action::RemoveTheme => applier.remove_theme().await,
        Action::ToggleTheme => applier.toggle_theme().await,
        Action::ChangeIcon | Action::ForceUpdateAllTabs => {
            return Ack::fail(format!("unhandled action: {}", request.action));
        }
    };

    match result {
        Ok(()) => Ack::ok(),
        Err(e) => Ack::fail(e.to_string()),
    }
}
