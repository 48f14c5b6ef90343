use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{info, warn};
use tracing_log_relay::{
    dispatcher::Dispatcher,
    env::dispatcher_config_from_env,
    layer::RelayLayer,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[tokio::main]
async fn main() {
    // No remote writers: every record lands in `<app>.log`.
    let dispatcher = Dispatcher::new(dispatcher_config_from_env("buffer_load"))
        .expect("open buffer file");
    let (layer, _handle) = RelayLayer::new(dispatcher.clone(), 4096);
    let spilled = layer.spilled_events.clone();
    tracing::subscriber::set_global_default(Registry::default().with(layer))
        .expect("set global subscriber");

    let n = 50_000;
    let start = Instant::now();
    for i in 0..n {
        if i % 10 == 0 {
            warn!(iteration = i, "load warning");
        } else {
            info!(iteration = i, "load event");
        }
    }
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let drained = dispatcher.buffer().retry_write();
    println!(
        "emitted {} events in {:?}; {} buffered, {} spilled past the channel",
        n,
        start.elapsed(),
        drained.len(),
        spilled.load(Ordering::Relaxed),
    );
    dispatcher.shutdown();
}
