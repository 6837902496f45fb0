use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::host::PrefAccess;
use crate::host::sim::SimHost;
use crate::page::css::INVERTED_CLASS;
use crate::page::dom::PageDom;
use crate::prefs::Preferences;

fn spawn_dispatcher(host: Arc<SimHost>, events: mpsc::UnboundedReceiver<HostEvent>) -> Dispatcher {
    let dispatcher = Dispatcher::new(host, DispatcherConfig::default());
    let runner = dispatcher.clone();
    tokio::spawn(async move { runner.run(events).await });
    dispatcher
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("never observed: {what}");
}

fn page_inverted(host: &SimHost, tab_id: TabId) -> bool {
    host.document(tab_id)
        .is_some_and(|dom| dom.has_root_class(INVERTED_CLASS))
}

// =============================================================================
// Tab registry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn membership_tracks_valid_tabs_only() {
    let (host, events) = SimHost::new();
    let dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let a = host.open_tab("https://a.example/");
    let b = host.open_tab("chrome://settings");
    let c = host.open_tab("https://c.example/");

    wait_until("two tracked tabs", || dispatcher.tracked_tabs() == vec![a, c]).await;
    assert!(!dispatcher.tracked_tabs().contains(&b));

    host.close_tab(a);
    wait_until("tab removed", || dispatcher.tracked_tabs() == vec![c]).await;
}

#[tokio::test(start_paused = true)]
async fn navigation_applies_on_a_plain_domain_and_removes_on_an_excluded_one() {
    let (host, events) = SimHost::new();
    host.prefs()
        .apply(&PrefPatch { enabled: Some(true), exclusions: Some(vec!["excluded.example".into()]), ..PrefPatch::default() })
        .expect("seed prefs");
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let plain = host.open_tab("https://site.example/page");
    let excluded = host.open_tab("https://mail.excluded.example/inbox");

    let check = Arc::clone(&host);
    wait_until("plain tab inverted", move || page_inverted(&check, plain)).await;
    // The excluded tab gets a remove instruction and its own guard
    // agrees: it must never end up inverted.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!page_inverted(&host, excluded));
}

#[tokio::test(start_paused = true)]
async fn navigation_is_skipped_while_disabled() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let tab = host.open_tab("https://site.example/");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!page_inverted(&host, tab));
}

#[tokio::test(start_paused = true)]
async fn unparsable_tab_url_is_logged_and_skipped() {
    let (host, events) = SimHost::new();
    host.prefs().apply(&PrefPatch::enabled(true)).expect("seed prefs");
    host.set_auto_inject(false);
    let dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    // "https://" parses to no hostname; the tab is tracked but no
    // instruction is attempted and nothing crashes.
    let odd = host.open_tab("https://");
    let ok = host.open_tab("https://site.example/");

    wait_until("both tabs tracked", || dispatcher.tracked_tabs() == vec![odd, ok]).await;
}

#[tokio::test(start_paused = true)]
async fn delivery_failure_on_navigation_is_swallowed() {
    let (host, events) = SimHost::new();
    host.prefs().apply(&PrefPatch::enabled(true)).expect("seed prefs");
    host.set_auto_inject(false);
    let dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    // No agent is listening, so the send fails; the dispatcher keeps
    // processing later events.
    let silent = host.open_tab("https://silent.example/");
    let late = host.open_tab("https://late.example/");

    wait_until("both tabs tracked", || dispatcher.tracked_tabs() == vec![silent, late]).await;
}

// =============================================================================
// Icon debounce
// =============================================================================

#[tokio::test(start_paused = true)]
async fn rapid_icon_requests_coalesce_into_one_write() {
    let (host, _events) = SimHost::new();
    let dispatcher = Dispatcher::new(Arc::clone(&host) as Arc<dyn Host>, DispatcherConfig::default());

    dispatcher.set_icon_theme(IconTheme::Dark);
    dispatcher.set_icon_theme(IconTheme::Light);
    dispatcher.set_icon_theme(IconTheme::Dark);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(host.icon_writes(), vec![IconTheme::Dark]);
    assert_eq!(dispatcher.current_icon_theme(), Some(IconTheme::Dark));
}

#[tokio::test(start_paused = true)]
async fn redundant_icon_request_is_a_noop() {
    let (host, _events) = SimHost::new();
    let dispatcher = Dispatcher::new(Arc::clone(&host) as Arc<dyn Host>, DispatcherConfig::default());

    dispatcher.set_icon_theme(IconTheme::Dark);
    tokio::time::sleep(Duration::from_millis(400)).await;
    dispatcher.set_icon_theme(IconTheme::Dark);
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(host.icon_writes(), vec![IconTheme::Dark]);
}

#[tokio::test(start_paused = true)]
async fn startup_syncs_the_icon_from_the_store() {
    let (host, events) = SimHost::new();
    host.prefs().apply(&PrefPatch::enabled(true)).expect("seed prefs");
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let check = Arc::clone(&host);
    wait_until("dark icon write", move || check.icon_writes() == vec![IconTheme::Dark]).await;
}

// =============================================================================
// Broadcast
// =============================================================================

#[tokio::test(start_paused = true)]
async fn enabling_broadcasts_to_every_valid_tab() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let a = host.open_tab("https://a.example/");
    let b = host.open_tab("https://b.example/");
    tokio::time::sleep(Duration::from_millis(20)).await;

    host.set_preferences(PrefPatch::enabled(true)).await.expect("enable");

    let check = Arc::clone(&host);
    wait_until("both pages inverted", move || page_inverted(&check, a) && page_inverted(&check, b)).await;
    let check = Arc::clone(&host);
    wait_until("dark icon write", move || check.icon_writes().last() == Some(&IconTheme::Dark)).await;
}

#[tokio::test(start_paused = true)]
async fn one_failing_tab_does_not_block_the_others() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let t1 = host.open_tab("https://one.example/");
    let t2 = host.open_tab("https://two.example/");
    let t3 = host.open_tab("https://three.example/");
    tokio::time::sleep(Duration::from_millis(20)).await;
    host.set_fail_delivery(t2, true);

    host.set_preferences(PrefPatch::enabled(true)).await.expect("enable");

    let check = Arc::clone(&host);
    wait_until("tabs 1 and 3 inverted", move || page_inverted(&check, t1) && page_inverted(&check, t3)).await;
    assert!(!page_inverted(&host, t2));
}

#[tokio::test(start_paused = true)]
async fn injection_failure_skips_only_that_tab() {
    let (host, events) = SimHost::new();
    host.set_auto_inject(false);
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let broken = host.open_tab("https://broken.example/");
    let fine = host.open_tab("https://fine.example/");
    tokio::time::sleep(Duration::from_millis(20)).await;
    host.set_fail_injection(broken, true);

    host.set_preferences(PrefPatch::enabled(true)).await.expect("enable");

    let check = Arc::clone(&host);
    wait_until("healthy tab inverted", move || page_inverted(&check, fine)).await;
    assert!(!host.injected(broken));
}

#[tokio::test(start_paused = true)]
async fn disabling_removes_the_theme_everywhere() {
    let (host, events) = SimHost::new();
    host.prefs().apply(&PrefPatch::enabled(true)).expect("seed prefs");
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let tab = host.open_tab("https://site.example/");
    let check = Arc::clone(&host);
    wait_until("page inverted", move || page_inverted(&check, tab)).await;

    host.set_preferences(PrefPatch::enabled(false)).await.expect("disable");

    let check = Arc::clone(&host);
    wait_until("page restored", move || !page_inverted(&check, tab)).await;
    let check = Arc::clone(&host);
    wait_until("light icon write", move || check.icon_writes().last() == Some(&IconTheme::Light)).await;
}

#[tokio::test(start_paused = true)]
async fn non_enabled_preference_changes_do_not_broadcast() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);
    let tab = host.open_tab("https://site.example/");

    host.set_preferences(PrefPatch { preserve_images: Some(false), ..PrefPatch::default() })
        .await
        .expect("tweak flag");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!page_inverted(&host, tab));
    // Only the startup sync touched the icon.
    assert_eq!(host.icon_writes(), vec![IconTheme::Light]);
}

// =============================================================================
// Toggle command
// =============================================================================

#[tokio::test(start_paused = true)]
async fn toggle_command_flips_persists_and_broadcasts() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);
    let tab = host.open_tab("https://site.example/");
    tokio::time::sleep(Duration::from_millis(20)).await;

    host.press_command(TOGGLE_COMMAND);

    let check = Arc::clone(&host);
    wait_until("page inverted", move || page_inverted(&check, tab)).await;
    assert!(host.prefs().snapshot().enabled);

    host.press_command(TOGGLE_COMMAND);

    let check = Arc::clone(&host);
    wait_until("page restored", move || !page_inverted(&check, tab)).await;
    assert!(!host.prefs().snapshot().enabled);
}

#[tokio::test(start_paused = true)]
async fn unknown_commands_are_ignored() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    host.press_command("open-settings");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(host.prefs().snapshot(), Preferences::default());
}

// =============================================================================
// Runtime messages
// =============================================================================

#[tokio::test(start_paused = true)]
async fn force_update_reaches_every_tab_and_reports_success() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let t1 = host.open_tab("https://one.example/");
    let t2 = host.open_tab("https://two.example/");
    let t3 = host.open_tab("https://three.example/");
    tokio::time::sleep(Duration::from_millis(20)).await;
    host.set_fail_delivery(t2, true);
    // Enable without a change notification so only the forced refresh
    // can deliver the instructions.
    host.prefs().apply(&PrefPatch::enabled(true)).expect("seed prefs");

    let exclusions: Vec<String> = Vec::new();
    let ack = host
        .send_runtime(Request::force_update(true, &exclusions))
        .await
        .expect("ack");

    assert!(ack.success, "a failing tab must not fail the operation");
    let check = Arc::clone(&host);
    wait_until("tabs 1 and 3 inverted", move || page_inverted(&check, t1) && page_inverted(&check, t3)).await;
    assert!(!page_inverted(&host, t2));
}

#[tokio::test(start_paused = true)]
async fn force_update_without_payload_falls_back_to_the_store() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);
    let tab = host.open_tab("https://site.example/");
    tokio::time::sleep(Duration::from_millis(20)).await;
    host.prefs().apply(&PrefPatch::enabled(true)).expect("seed prefs");

    let ack = host
        .send_runtime(Request::new(Action::ForceUpdateAllTabs))
        .await
        .expect("ack");

    assert!(ack.success);
    let check = Arc::clone(&host);
    wait_until("page inverted", move || page_inverted(&check, tab)).await;
}

#[tokio::test(start_paused = true)]
async fn change_icon_message_drives_the_debounced_path() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let ack = host
        .send_runtime(Request::change_icon(IconTheme::Dark))
        .await
        .expect("ack");
    assert!(ack.success);

    let check = Arc::clone(&host);
    wait_until("dark icon write", move || check.icon_writes().last() == Some(&IconTheme::Dark)).await;
}

#[tokio::test(start_paused = true)]
async fn change_icon_without_a_theme_is_rejected() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let ack = host
        .send_runtime(Request::new(Action::ChangeIcon))
        .await
        .expect("ack");

    assert!(!ack.success);
    assert!(ack.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn page_bound_actions_are_rejected_by_the_background() {
    let (host, events) = SimHost::new();
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    let ack = host
        .send_runtime(Request::new(Action::ApplyTheme))
        .await
        .expect("ack");

    assert!(!ack.success);
}

// =============================================================================
// Install
// =============================================================================

#[tokio::test(start_paused = true)]
async fn install_writes_defaults_and_a_light_icon() {
    let (host, events) = SimHost::new();
    host.prefs()
        .apply(&PrefPatch { enabled: Some(true), exclusions: Some(vec!["stale.example".into()]), ..PrefPatch::default() })
        .expect("dirty store");
    let _dispatcher = spawn_dispatcher(Arc::clone(&host), events);

    host.install();

    let check = Arc::clone(&host);
    wait_until("defaults restored", move || check.prefs().snapshot() == Preferences::default()).await;
    let check = Arc::clone(&host);
    wait_until("light icon write", move || check.icon_writes().last() == Some(&IconTheme::Light)).await;
}
