//! relaybus: standalone relay host
//!
//! Binds the incoming and outgoing addresses of one relay and forwards
//! every frame published to the former to all subscribers of the latter.
//!
//! ## Architecture
//! ```text
//! [publishers] --> incoming --[relaybus]--> outgoing --> [subscribers]
//! ```
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - RELAYBUS_CONFIG: path to a YAML config file (optional)
//! - RELAYBUS_BUS__INCOMING / RELAYBUS_BUS__OUTGOING: relay addresses
//! - RELAYBUS_LOG: tracing filter (default: info)

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use relaybus::config::Config;
use relaybus::utils::bootstrap::{init_tracing, shutdown_signal};
use relaybus::{DualSocketBus, MessageBusService, SocketContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;
    let endpoint = config.endpoint()?;

    let dispatcher = Arc::new(config.dispatcher());
    let context = SocketContext::new();
    let relay = DualSocketBus::new(endpoint.clone(), dispatcher.clone(), &context);

    let mut service = MessageBusService::new();
    service.add(Arc::new(relay.clone()));

    info!(endpoint = %endpoint, dispatcher = dispatcher.id(), "relaybus starting");
    let result = service
        .run_until(shutdown_signal(), CancellationToken::new())
        .await;
    service.dispose();
    dispatcher.dispose();
    info!(relayed = relay.relayed_count(), "relaybus stopped");

    result?;
    Ok(())
}
