use crate::backend::KafkaWriterConfig;
use crate::discovery::DiscoveryError;
use crate::format::JsonFormatter;
use crate::producer::{AsyncProducer, BrokerProducer, ProducerError, ProducerFailure, ProducerMessage};
use crate::record::LogRecord;
use crate::writer::{HealthFlag, Writer, WriterContext, WriterError, WriterStatus};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, warn};

#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("broker discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("producer session failed: {0}")]
    Producer(#[from] ProducerError),
}

/// Writer shipping logstash-formatted records to a Kafka topic.
///
/// Health flips to FAIL on every delivery error and is reset to OK on a
/// fixed timer, whether or not anything was delivered in between. A writer
/// that is still broken simply fails again on the next attempt.
pub struct RemoteWriter {
    ctx: WriterContext,
    formatter: JsonFormatter,
    key: String,
    input: mpsc::Sender<ProducerMessage>,
    bounced: mpsc::Sender<LogRecord>,
    failures: Mutex<Option<mpsc::Receiver<LogRecord>>>,
    health: Arc<HealthFlag>,
}

impl RemoteWriter {
    /// Discover the broker cluster through ZooKeeper and start shipping.
    ///
    /// The coordination session is only held for the duration of discovery.
    #[cfg(feature = "kafka")]
    pub async fn run(config: &KafkaWriterConfig, ctx: &WriterContext) -> Result<Self, RemoteError> {
        use crate::discovery::{discover_brokers, ZkCoordinator};
        use crate::kafka::KafkaProducer;

        let brokers = {
            let coordinator = ZkCoordinator::connect(&config.zk_hosts, config.zk_timeout).await?;
            discover_brokers(&coordinator).await?
        };
        debug!(brokers = ?brokers, "discovered kafka brokers");

        let producer = KafkaProducer::new(&brokers, &config.topic)?;
        Ok(Self::with_producer(Arc::new(producer), config, ctx))
    }

    /// Start a writer on top of an already connected broker client and
    /// launch its health-reset and error-draining loops.
    pub fn with_producer(
        backend: Arc<dyn BrokerProducer>,
        config: &KafkaWriterConfig,
        ctx: &WriterContext,
    ) -> Self {
        let producer = AsyncProducer::spawn(backend, config.input_capacity, ctx.token());
        let (fail_tx, fail_rx) = mpsc::channel(config.fail_capacity.max(1));
        let health = Arc::new(HealthFlag::default());

        tokio::spawn(reset_health(
            Arc::clone(&health),
            config.health_reset_interval,
            ctx.clone(),
        ));
        tokio::spawn(drain_errors(
            producer.errors,
            fail_tx.clone(),
            Arc::clone(&health),
            ctx.clone(),
        ));

        Self {
            ctx: ctx.clone(),
            formatter: JsonFormatter::logstash(),
            key: config.key.clone(),
            input: producer.input,
            bounced: fail_tx,
            failures: Mutex::new(Some(fail_rx)),
            health,
        }
    }

    /// Put a record that never reached the producer onto the failure
    /// stream, so the dispatcher buffers it like a rejected delivery.
    async fn bounce(&self, record: LogRecord) {
        tokio::select! {
            _ = self.ctx.cancelled() => {}
            sent = self.bounced.send(record) => {
                if sent.is_err() {
                    debug!("failure stream has no consumer, record dropped");
                }
            }
        }
    }
}

async fn reset_health(health: Arc<HealthFlag>, interval: Duration, ctx: WriterContext) {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = sleep(interval) => health.reset(),
        }
    }
}

async fn drain_errors(
    mut errors: mpsc::Receiver<ProducerFailure>,
    failures: mpsc::Sender<LogRecord>,
    health: Arc<HealthFlag>,
    ctx: WriterContext,
) {
    loop {
        let failure = tokio::select! {
            _ = ctx.cancelled() => return,
            failure = errors.recv() => match failure {
                Some(failure) => failure,
                None => return,
            },
        };

        if health.mark_failed() {
            error!(error = %failure.error, "kafka delivery failed, writer marked unhealthy");
        }

        // Blocks while the failure stream is full; the dispatcher drains it.
        tokio::select! {
            _ = ctx.cancelled() => return,
            sent = failures.send(failure.message.metadata) => {
                if sent.is_err() {
                    debug!("failure stream has no consumer, record dropped");
                }
            }
        }
    }
}

#[async_trait]
impl Writer for RemoteWriter {
    async fn write(&self, record: LogRecord) {
        if self.ctx.is_cancelled() {
            return;
        }
        let payload = match self.formatter.format(&record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "cannot format record for kafka");
                self.bounce(record).await;
                return;
            }
        };
        let message = ProducerMessage {
            key: self.key.clone(),
            payload,
            metadata: record,
        };

        tokio::select! {
            _ = self.ctx.cancelled() => {}
            sent = self.input.send(message) => {
                if sent.is_err() {
                    debug!("producer input closed, record dropped");
                }
            }
        }
    }

    fn write_fail(&self) -> Result<mpsc::Receiver<LogRecord>, WriterError> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(WriterError::FailureStreamTaken)
    }

    fn status(&self) -> WriterStatus {
        self.health.status()
    }
}
