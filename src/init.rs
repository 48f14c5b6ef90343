use crate::dispatcher::Dispatcher;
use crate::layer::RelayLayer;
use crate::record::{Level, LogRecord};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the relay layer.
///
/// **Fields**
/// - `channel_buffer`: records queued between the emitting threads and the
///   dispatcher task before new records spill straight to the buffer file.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt` layer is added
///   next to [`RelayLayer`] so events are also printed to the console.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub channel_buffer: usize,
    pub enable_stdout: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            enable_stdout: true,
        }
    }
}

/// Install a global `tracing` subscriber that relays every event through
/// `dispatcher`.
///
/// Must be called inside a Tokio runtime. Fails if a global subscriber is
/// already installed.
pub fn init_tracing_with_config(
    dispatcher: Dispatcher,
    config: RelayConfig,
) -> Result<(), SetGlobalDefaultError> {
    let (layer, _handle) = RelayLayer::new(dispatcher, config.channel_buffer);

    // The two subscriber shapes have different types, hence two branches.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// Initialize tracing with [`RelayConfig::default`].
pub fn init_tracing(dispatcher: Dispatcher) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(dispatcher, RelayConfig::default())
}

/// Record every panic as a [`Level::Panic`] entry with a `stack` field.
///
/// The record is enriched and appended to the buffer file from inside the
/// hook, so it survives the process going down and is replayed once a
/// writer is healthy. `module` is the per-call module joined with the
/// dispatcher's prefix. The previously installed hook still runs afterwards.
pub fn install_panic_hook(dispatcher: Dispatcher, module: impl Into<String>) {
    let module = module.into();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());

        let mut record = LogRecord::new(Level::Panic, message)
            .with_module(module.clone())
            .with_panic_stack();
        if let Some(location) = info.location() {
            record = record.with_field("location", location.to_string());
        }
        dispatcher.enrich(&mut record);
        dispatcher.buffer().append(&record);

        previous(info);
    }));
}
