use std::sync::Arc;

use umbra::dispatcher::{Dispatcher, DispatcherConfig};
use umbra::host::Host;
use umbra::host::bridge::BridgeHost;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = DispatcherConfig::from_env();
    let (host, events) = BridgeHost::spawn(tokio::io::stdin(), tokio::io::stdout());
    tracing::info!(icon_debounce = ?config.icon_debounce, "umbra background starting");

    let dispatcher = Dispatcher::new(host as Arc<dyn Host>, config);
    dispatcher.run(events).await;

    tracing::info!("umbra background stopped");
}
