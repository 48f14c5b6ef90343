use crate::dispatcher::Dispatcher;
use crate::record::{Level, LogRecord};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Event targets never forwarded to the dispatcher: the relay's own
/// diagnostics and those of its transport clients would otherwise loop
/// back into the writers that produced them.
const IGNORED_TARGETS: &[&str] = &[env!("CARGO_CRATE_NAME"), "rdkafka", "zookeeper_client"];

/// `tracing_subscriber` layer that turns every event, at every level, into
/// a [`LogRecord`] and hands it to a [`Dispatcher`].
///
/// Events travel through a bounded channel to a background task that
/// awaits [`Dispatcher::log`], so a stalled broker never blocks the
/// emitting thread. When the channel is full the record is enriched and
/// appended straight to the buffer file instead of being dropped.
pub struct RelayLayer {
    sender: mpsc::Sender<LogRecord>,
    dispatcher: Dispatcher,
    /// Total events seen by the layer.
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Written directly to the buffer because the channel was full.
    pub spilled_events: Arc<AtomicU64>,
}

impl RelayLayer {
    /// Create a new layer and spawn the task that feeds `dispatcher`.
    ///
    /// The task stops when the dispatcher's context is cancelled, moving
    /// any records still queued into the buffer file. `buffer` is raised
    /// to at least 16.
    pub fn new(dispatcher: Dispatcher, buffer: usize) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);

        let worker = dispatcher.clone();
        let handle = tokio::spawn(async move {
            let ctx = worker.context().clone();
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    record = rx.recv() => match record {
                        Some(record) => worker.log(record).await,
                        None => return,
                    },
                }
            }

            // Writers stop on cancellation; whatever is still queued goes to
            // the buffer file. Later sends see a closed channel and spill.
            rx.close();
            while let Some(mut record) = rx.recv().await {
                worker.enrich(&mut record);
                worker.buffer().append(&record);
            }
        });

        (
            Self {
                sender: tx,
                dispatcher,
                total_events: Arc::new(AtomicU64::new(0)),
                enqueued_events: Arc::new(AtomicU64::new(0)),
                spilled_events: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|ignored| {
        target == *ignored
            || target
                .strip_prefix(ignored)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

impl<S> Layer<S> for RelayLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_ignored(meta.target()) {
            return;
        }
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: Level::from(meta.level()),
            message: message.unwrap_or_default(),
            fields,
        };

        match self.sender.try_send(record) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(mut record))
            | Err(mpsc::error::TrySendError::Closed(mut record)) => {
                self.spilled_events.fetch_add(1, Ordering::Relaxed);
                self.dispatcher.enrich(&mut record);
                self.dispatcher.buffer().append(&record);
            }
        }
    }
}

use tracing::field::{Field, Visit};

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use tempfile::tempdir;
    use tokio::time::{sleep, Duration};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[test]
    fn own_targets_are_ignored() {
        assert!(is_ignored(env!("CARGO_CRATE_NAME")));
        assert!(is_ignored(&format!("{}::dispatcher", env!("CARGO_CRATE_NAME"))));
        assert!(is_ignored("rdkafka::producer"));
        assert!(!is_ignored("rdkafka_consumer_app"));
        assert!(!is_ignored("my_service::handlers"));
    }

    #[tokio::test]
    async fn events_reach_the_buffer_with_typed_fields() {
        let dir = tempdir().unwrap();
        let mut config = DispatcherConfig::new("layer-test");
        config.buffer_dir = dir.path().to_path_buf();
        let dispatcher = Dispatcher::new(config).unwrap();

        let (layer, _handle) = RelayLayer::new(dispatcher.clone(), 64);
        let total = Arc::clone(&layer.total_events);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::trace!(target: "app", "fine grained");
            tracing::info!(target: "app", user_id = 42u64, ratio = 0.5, ok = true, module = "auth", "signed in");
            tracing::error!(target: "app", "failed: {}", "disk");
        });

        let mut records = Vec::new();
        for _ in 0..50 {
            sleep(Duration::from_millis(10)).await;
            records.extend(dispatcher.buffer().retry_write());
            if records.len() >= 3 {
                break;
            }
        }

        assert_eq!(total.load(Ordering::Relaxed), 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].level, Level::Trace);
        assert_eq!(records[1].message, "signed in");
        assert_eq!(records[1].fields["user_id"], serde_json::json!(42));
        assert_eq!(records[1].fields["ratio"], serde_json::json!(0.5));
        assert_eq!(records[1].fields["ok"], serde_json::json!(true));
        assert_eq!(records[1].module(), Some("auth"));
        assert_eq!(records[1].app(), Some("layer-test"));
        assert_eq!(records[2].level, Level::Error);
        assert_eq!(records[2].message, "failed: disk");
        dispatcher.shutdown();
    }

    #[tokio::test]
    async fn queued_records_are_buffered_on_shutdown() {
        let dir = tempdir().unwrap();
        let mut config = DispatcherConfig::new("drain-test");
        config.buffer_dir = dir.path().to_path_buf();
        let dispatcher = Dispatcher::new(config).unwrap();

        let (layer, handle) = RelayLayer::new(dispatcher.clone(), 64);
        let enqueued = Arc::clone(&layer.enqueued_events);
        let spilled = Arc::clone(&layer.spilled_events);
        let subscriber = Registry::default().with(layer);

        // The worker has not been polled yet, so all ten stay queued.
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..10 {
                tracing::error!(target: "app", seq = i, "queued");
            }
        });
        assert_eq!(enqueued.load(Ordering::Relaxed), 10);

        dispatcher.shutdown();
        handle.await.unwrap();

        let records = dispatcher.buffer().retry_write();
        assert_eq!(spilled.load(Ordering::Relaxed), 0);
        assert_eq!(records.len(), 10);
        let seqs: Vec<_> = records.iter().map(|r| r.fields["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<i64>>());
        assert!(records.iter().all(|r| r.app() == Some("drain-test")));
    }

    #[tokio::test]
    async fn closed_channel_spills_to_buffer() {
        let dir = tempdir().unwrap();
        let mut config = DispatcherConfig::new("spill-test");
        config.buffer_dir = dir.path().to_path_buf();
        let dispatcher = Dispatcher::new(config).unwrap();

        let (layer, handle) = RelayLayer::new(dispatcher.clone(), 16);
        let spilled = Arc::clone(&layer.spilled_events);
        dispatcher.shutdown();
        handle.await.unwrap();

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "app", "after shutdown");
        });

        assert_eq!(spilled.load(Ordering::Relaxed), 1);
        let records = dispatcher.buffer().retry_write();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "after shutdown");
        assert_eq!(records[0].app(), Some("spill-test"));
    }
}
