//! Shared fakes for relay integration tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_log_relay::backend::KafkaWriterConfig;
use tracing_log_relay::dispatcher::{Dispatcher, DispatcherConfig};
use tracing_log_relay::producer::{BrokerProducer, Delivery, ProducerError};
use tracing_log_relay::remote::RemoteWriter;

/// In-memory broker that can be switched between accepting and rejecting.
#[derive(Default)]
pub struct FlakyBroker {
    failing: AtomicBool,
    attempts: Mutex<usize>,
    delivered: Mutex<Vec<serde_json::Value>>,
}

#[allow(dead_code)]
impl FlakyBroker {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn down() -> Arc<Self> {
        let broker = Self::default();
        broker.failing.store(true, Ordering::SeqCst);
        Arc::new(broker)
    }

    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// `message` values of every accepted payload, in arrival order.
    pub fn messages(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|v| v["message"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.delivered.lock().unwrap().clone()
    }
}

impl BrokerProducer for FlakyBroker {
    fn send(&self, _key: &str, payload: &[u8]) -> Delivery {
        *self.attempts.lock().unwrap() += 1;
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(ProducerError::Rejected("leader not available".into()))
        } else {
            let value = serde_json::from_slice(payload).expect("payload is json");
            self.delivered.lock().unwrap().push(value);
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}

#[allow(dead_code)]
pub fn dispatcher(dir: &std::path::Path, retry_interval: Duration) -> Dispatcher {
    let mut config = DispatcherConfig::new("relay-it");
    config.buffer_dir = dir.to_path_buf();
    config.module_prefix = Some("it".to_string());
    config.retry_interval = retry_interval;
    Dispatcher::new(config).expect("open dispatcher")
}

#[allow(dead_code)]
pub fn remote_writer(dispatcher: &Dispatcher, broker: Arc<FlakyBroker>, reset: Duration) -> Arc<RemoteWriter> {
    let mut config = KafkaWriterConfig::new(vec!["zk:2181".to_string()]);
    config.health_reset_interval = reset;
    Arc::new(RemoteWriter::with_producer(broker, &config, dispatcher.context()))
}

/// Poll `check` every 10ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
