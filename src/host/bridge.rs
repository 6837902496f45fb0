//! Stdio bridge — the production host adapter.
//!
//! DESIGN
//! ======
//! The browser-side shim is a thin script that forwards platform events
//! and executes capability calls; this adapter speaks to it in
//! newline-delimited JSON over a byte stream (stdin/stdout in
//! production, an in-memory duplex in tests). Outbound calls carry a
//! correlation id and await the shim's response through a pending map;
//! inbound platform activity is translated onto the [`HostEvent`]
//! stream.
//!
//! ERROR HANDLING
//! ==============
//! A shim-reported failure maps onto the matching [`HostError`] variant
//! so callers keep their per-tab isolation semantics. A dead or silent
//! shim surfaces as `HostError::Bridge` after the call timeout; it never
//! wedges the dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::host::{Host, HostError, HostEvent, IconTheme, PrefAccess, TabEvent, TabId, TabInfo};
use crate::message::{Ack, Request};
use crate::prefs::{PrefChange, PrefPatch, Preferences};

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Frames sent to the shim.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum CoreFrame {
    GetPreferences { id: Uuid },
    SetPreferences { id: Uuid, patch: PrefPatch },
    QueryTabs { id: Uuid },
    SendToTab { id: Uuid, tab_id: TabId, request: Request },
    Inject { id: Uuid, tab_id: TabId },
    SetIcon { id: Uuid, theme: IconTheme, icon_path: String },
    /// Reply to a shim-initiated runtime request.
    Ack { request_id: Uuid, ack: Ack },
}

/// Frames received from the shim.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ShimFrame {
    Response {
        id: Uuid,
        ok: bool,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    TabCreated {
        tab: TabInfo,
    },
    TabUpdated {
        tab: TabInfo,
        #[serde(default)]
        complete: bool,
    },
    TabRemoved {
        tab_id: TabId,
    },
    Command {
        name: String,
    },
    PrefChanged {
        change: PrefChange,
    },
    Runtime {
        id: Uuid,
        request: Request,
    },
    Installed,
}

struct ShimResult {
    ok: bool,
    result: serde_json::Value,
    error: Option<String>,
}

impl ShimResult {
    fn reason(&self) -> String {
        self.error.clone().unwrap_or_else(|| "unspecified".into())
    }
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ShimResult>>>>;

// =============================================================================
// ADAPTER
// =============================================================================

pub struct BridgeHost {
    out_tx: mpsc::UnboundedSender<CoreFrame>,
    pending: PendingMap,
    call_timeout: Duration,
}

impl BridgeHost {
    /// Spawn reader and writer tasks over the given byte streams and
    /// hand out the host plus its event stream. The call timeout comes
    /// from `UMBRA_BRIDGE_TIMEOUT_SECS` (default 10).
    pub fn spawn<R, W>(reader: R, writer: W) -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let timeout_secs = env_parse("UMBRA_BRIDGE_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS);
        Self::spawn_with_timeout(reader, writer, Duration::from_secs(timeout_secs))
    }

    /// `spawn` with an explicit call timeout.
    pub fn spawn_with_timeout<R, W>(
        reader: R,
        writer: W,
        call_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(write_outbound(writer, out_rx));
        tokio::spawn(route_inbound(reader, Arc::clone(&pending), events_tx, out_tx.clone()));

        (Arc::new(Self { out_tx, pending, call_timeout }), events_rx)
    }

    async fn call(&self, id: Uuid, frame: CoreFrame) -> Result<ShimResult, HostError> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);

        if self.out_tx.send(frame).is_err() {
            self.lock_pending().remove(&id);
            return Err(HostError::Bridge("bridge writer closed".into()));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(HostError::Bridge("bridge reader closed".into())),
            Err(_) => {
                self.lock_pending().remove(&id);
                Err(HostError::Bridge(format!("call timed out after {}s", self.call_timeout.as_secs())))
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<ShimResult>>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
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
// IO TASKS
// =============================================================================

async fn write_outbound<W>(mut writer: W, mut out_rx: mpsc::UnboundedReceiver<CoreFrame>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = out_rx.recv().await {
        let mut line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "outbound bridge frame failed to serialize");
                continue;
            }
        };
        line.push('\n');
        if writer.write_all(line.as_bytes()).await.is_err() {
            warn!("bridge writer closed");
            break;
        }
        let _ = writer.flush().await;
    }
}

async fn route_inbound<R>(
    reader: R,
    pending: PendingMap,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    out_tx: mpsc::UnboundedSender<CoreFrame>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "bridge read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: ShimFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "invalid inbound bridge frame");
                continue;
            }
        };

        let forwarded = match frame {
            ShimFrame::Response { id, ok, result, error } => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(ShimResult { ok, result, error });
                    }
                    None => warn!(%id, "response for unknown or timed-out call"),
                }
                Ok(())
            }
            ShimFrame::TabCreated { tab } => events_tx.send(HostEvent::Tab(TabEvent::Created(tab))),
            ShimFrame::TabUpdated { tab, complete } => {
                events_tx.send(HostEvent::Tab(TabEvent::Updated { tab, load_complete: complete }))
            }
            ShimFrame::TabRemoved { tab_id } => events_tx.send(HostEvent::Tab(TabEvent::Removed(tab_id))),
            ShimFrame::Command { name } => events_tx.send(HostEvent::Command(name)),
            ShimFrame::PrefChanged { change } => events_tx.send(HostEvent::PrefChanged(change)),
            ShimFrame::Installed => events_tx.send(HostEvent::Installed),
            ShimFrame::Runtime { id, request } => {
                let (reply, rx) = oneshot::channel();
                let sent = events_tx.send(HostEvent::Runtime { request, reply });
                if sent.is_ok() {
                    let out = out_tx.clone();
                    tokio::spawn(async move {
                        let ack = rx.await.unwrap_or_else(|_| Ack::fail("request dropped"));
                        let _ = out.send(CoreFrame::Ack { request_id: id, ack });
                    });
                }
                sent
            }
        };

        if forwarded.is_err() {
            // Dispatcher gone; nothing left to route to.
            break;
        }
    }
    info!("bridge stream ended");
}

// =============================================================================
// HOST IMPL
// =============================================================================

#[async_trait::async_trait]
impl PrefAccess for BridgeHost {
    async fn get_preferences(&self) -> Result<Preferences, HostError> {
        let id = Uuid::new_v4();
        let result = self.call(id, CoreFrame::GetPreferences { id }).await?;
        if !result.ok {
            return Err(HostError::Storage(result.reason()));
        }
        serde_json::from_value(result.result).map_err(|e| HostError::Storage(format!("malformed preferences: {e}")))
    }

    async fn set_preferences(&self, patch: PrefPatch) -> Result<(), HostError> {
        let id = Uuid::new_v4();
        let result = self.call(id, CoreFrame::SetPreferences { id, patch }).await?;
        if !result.ok {
            return Err(HostError::Storage(result.reason()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Host for BridgeHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        let id = Uuid::new_v4();
        let result = self.call(id, CoreFrame::QueryTabs { id }).await?;
        if !result.ok {
            return Err(HostError::TabQuery(result.reason()));
        }
        serde_json::from_value(result.result).map_err(|e| HostError::TabQuery(format!("malformed tab list: {e}")))
    }

    async fn send_to_tab(&self, tab_id: TabId, request: Request) -> Result<Ack, HostError> {
        let id = Uuid::new_v4();
        let result = self.call(id, CoreFrame::SendToTab { id, tab_id, request }).await?;
        if !result.ok {
            return Err(HostError::Delivery { tab_id, reason: result.reason() });
        }
        serde_json::from_value(result.result)
            .map_err(|e| HostError::Delivery { tab_id, reason: format!("malformed ack: {e}") })
    }

    async fn inject_into(&self, tab_id: TabId) -> Result<(), HostError> {
        let id = Uuid::new_v4();
        let result = self.call(id, CoreFrame::Inject { id, tab_id }).await?;
        if !result.ok {
            return Err(HostError::Injection { tab_id, reason: result.reason() });
        }
        Ok(())
    }

    async fn set_icon(&self, theme: IconTheme) -> Result<(), HostError> {
        let id = Uuid::new_v4();
        let frame = CoreFrame::SetIcon { id, theme, icon_path: theme.icon_path().to_string() };
        let result = self.call(id, frame).await?;
        if !result.ok {
            return Err(HostError::Icon(result.reason()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "bridge_test.rs"]
mod tests;
