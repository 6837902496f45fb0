use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf, split};
use tokio::time::timeout;

use super::*;
use crate::message::Action;
use crate::prefs::PrefKey;

type Shim = (
    tokio::io::Lines<BufReader<ReadHalf<tokio::io::DuplexStream>>>,
    WriteHalf<tokio::io::DuplexStream>,
);

fn connect(call_timeout: Duration) -> (Arc<BridgeHost>, mpsc::UnboundedReceiver<HostEvent>, Shim) {
    let (core_side, shim_side) = tokio::io::duplex(4096);
    let (core_read, core_write) = split(core_side);
    let (host, events) = BridgeHost::spawn_with_timeout(core_read, core_write, call_timeout);

    let (shim_read, shim_write) = split(shim_side);
    let shim_lines = BufReader::new(shim_read).lines();
    (host, events, (shim_lines, shim_write))
}

async fn shim_next(shim: &mut Shim) -> serde_json::Value {
    let line = timeout(Duration::from_millis(500), shim.0.next_line())
        .await
        .expect("shim read timed out")
        .expect("shim read failed")
        .expect("stream closed");
    serde_json::from_str(&line).expect("outbound frame is json")
}

async fn shim_send(shim: &mut Shim, frame: &serde_json::Value) {
    let mut line = frame.to_string();
    line.push('\n');
    shim.1.write_all(line.as_bytes()).await.expect("shim write");
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("event receive timed out")
        .expect("event stream closed")
}

// =============================================================================
// Outbound calls
// =============================================================================

#[tokio::test]
async fn set_icon_round_trips_through_the_shim() {
    let (host, _events, mut shim) = connect(Duration::from_secs(5));

    let call = tokio::spawn(async move { host.set_icon(IconTheme::Dark).await });

    let frame = shim_next(&mut shim).await;
    assert_eq!(frame["op"], "setIcon");
    assert_eq!(frame["theme"], "dark");
    assert_eq!(frame["iconPath"], "icons/icon-dark-16.png");

    let id = frame["id"].clone();
    shim_send(&mut shim, &serde_json::json!({"op": "response", "id": id, "ok": true})).await;

    call.await.expect("join").expect("set_icon");
}

#[tokio::test]
async fn query_tabs_parses_the_shim_result() {
    let (host, _events, mut shim) = connect(Duration::from_secs(5));

    let call = tokio::spawn(async move { host.query_tabs().await });

    let frame = shim_next(&mut shim).await;
    assert_eq!(frame["op"], "queryTabs");
    let id = frame["id"].clone();
    shim_send(
        &mut shim,
        &serde_json::json!({
            "op": "response",
            "id": id,
            "ok": true,
            "result": [
                {"id": 3, "url": "https://a.example/"},
                {"id": 7, "url": null},
            ],
        }),
    )
    .await;

    let tabs = call.await.expect("join").expect("query");
    assert_eq!(tabs.len(), 2);
    assert_eq!(tabs[0].id, 3);
    assert!(tabs[0].is_valid());
    assert!(!tabs[1].is_valid());
}

#[tokio::test]
async fn shim_failures_map_onto_typed_errors() {
    let (host, _events, mut shim) = connect(Duration::from_secs(5));

    let call = tokio::spawn(async move { host.send_to_tab(4, Request::new(Action::ApplyTheme)).await });

    let frame = shim_next(&mut shim).await;
    assert_eq!(frame["op"], "sendToTab");
    assert_eq!(frame["tabId"], 4);
    let id = frame["id"].clone();
    shim_send(
        &mut shim,
        &serde_json::json!({"op": "response", "id": id, "ok": false, "error": "no receiver"}),
    )
    .await;

    let err = call.await.expect("join").expect_err("delivery failure");
    match err {
        HostError::Delivery { tab_id, reason } => {
            assert_eq!(tab_id, 4);
            assert_eq!(reason, "no receiver");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn a_silent_shim_times_out_instead_of_wedging() {
    let (host, _events, _shim) = connect(Duration::from_secs(1));

    let err = host.get_preferences().await.expect_err("timeout");
    assert!(matches!(err, HostError::Bridge(_)));
    assert!(err.to_string().contains("timed out"));
}

// =============================================================================
// Inbound events
// =============================================================================

#[tokio::test]
async fn platform_events_flow_onto_the_event_stream() {
    let (_host, mut events, mut shim) = connect(Duration::from_secs(5));

    shim_send(&mut shim, &serde_json::json!({"op": "tabCreated", "tab": {"id": 1, "url": "https://a.example/"}}))
        .await;
    shim_send(
        &mut shim,
        &serde_json::json!({"op": "tabUpdated", "tab": {"id": 1, "url": "https://a.example/"}, "complete": true}),
    )
    .await;
    shim_send(&mut shim, &serde_json::json!({"op": "tabRemoved", "tabId": 1})).await;
    shim_send(&mut shim, &serde_json::json!({"op": "command", "name": "toggle-dark-mode"})).await;
    shim_send(
        &mut shim,
        &serde_json::json!({"op": "prefChanged", "change": {"key": "enabled", "old": false, "new": true}}),
    )
    .await;
    shim_send(&mut shim, &serde_json::json!({"op": "installed"})).await;

    assert!(matches!(next_event(&mut events).await, HostEvent::Tab(TabEvent::Created(tab)) if tab.id == 1));
    assert!(matches!(
        next_event(&mut events).await,
        HostEvent::Tab(TabEvent::Updated { load_complete: true, .. })
    ));
    assert!(matches!(next_event(&mut events).await, HostEvent::Tab(TabEvent::Removed(1))));
    assert!(matches!(next_event(&mut events).await, HostEvent::Command(name) if name == "toggle-dark-mode"));
    assert!(matches!(
        next_event(&mut events).await,
        HostEvent::PrefChanged(change) if change.key == PrefKey::Enabled && change.new == serde_json::json!(true)
    ));
    assert!(matches!(next_event(&mut events).await, HostEvent::Installed));
}

#[tokio::test]
async fn malformed_inbound_lines_are_skipped() {
    let (_host, mut events, mut shim) = connect(Duration::from_secs(5));

    shim.1.write_all(b"this is not json\n\n").await.expect("shim write");
    shim_send(&mut shim, &serde_json::json!({"op": "installed"})).await;

    assert!(matches!(next_event(&mut events).await, HostEvent::Installed));
}

#[tokio::test]
async fn runtime_requests_get_their_ack_written_back() {
    let (_host, mut events, mut shim) = connect(Duration::from_secs(5));

    let request_id = uuid::Uuid::new_v4();
    shim_send(
        &mut shim,
        &serde_json::json!({
            "op": "runtime",
            "id": request_id,
            "request": {"id": uuid::Uuid::new_v4(), "action": "changeIcon", "data": {"theme": "dark"}},
        }),
    )
    .await;

    let HostEvent::Runtime { request, reply } = next_event(&mut events).await else {
        panic!("expected a runtime request");
    };
    assert_eq!(request.action, Action::ChangeIcon);
    assert_eq!(request.icon_theme(), Some(IconTheme::Dark));
    reply.send(Ack::ok()).expect("reply");

    let frame = shim_next(&mut shim).await;
    assert_eq!(frame["op"], "ack");
    assert_eq!(frame["requestId"], serde_json::json!(request_id));
    assert_eq!(frame["ack"]["success"], true);
}

// =============================================================================
// Wire shapes
// =============================================================================

#[test]
fn outbound_frames_use_camel_case_tags_and_fields() {
    let id = Uuid::new_v4();
    let frame = CoreFrame::SendToTab { id, tab_id: 9, request: Request::new(Action::RemoveTheme) };
    let json = serde_json::to_value(&frame).expect("serialize");

    assert_eq!(json["op"], "sendToTab");
    assert_eq!(json["tabId"], 9);
    assert_eq!(json["request"]["action"], "removeTheme");
}

#[test]
fn inbound_ack_frame_shape_is_stable() {
    let frame = CoreFrame::Ack { request_id: Uuid::new_v4(), ack: Ack::fail("nope") };
    let json = serde_json::to_value(&frame).expect("serialize");

    assert_eq!(json["op"], "ack");
    assert_eq!(json["ack"]["success"], false);
    assert_eq!(json["ack"]["error"], "nope");
}
