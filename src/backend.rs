use std::sync::Arc;
use std::time::Duration;

use crate::remote::RemoteError;
use crate::writer::{Writer, WriterContext};

/// Topic the logstash pipeline consumes from.
pub const DEFAULT_TOPIC: &str = "logstash";

/// Supported remote writer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    Kafka,
}

/// Settings for a Kafka writer whose brokers are discovered via ZooKeeper.
#[derive(Debug, Clone)]
pub struct KafkaWriterConfig {
    /// ZooKeeper ensemble, `host:port` each.
    pub zk_hosts: Vec<String>,
    pub topic: String,
    /// Routing key attached to every message.
    pub key: String,
    /// Producer input queue length; a full queue blocks `write`.
    pub input_capacity: usize,
    /// Failure stream length; a full stream blocks error draining.
    pub fail_capacity: usize,
    pub health_reset_interval: Duration,
    pub zk_timeout: Duration,
}

impl KafkaWriterConfig {
    pub fn new(zk_hosts: Vec<String>) -> Self {
        Self {
            zk_hosts,
            topic: DEFAULT_TOPIC.to_string(),
            key: "key".to_string(),
            input_capacity: 256,
            fail_capacity: 10,
            health_reset_interval: Duration::from_secs(10),
            zk_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration of one remote writer; the variant selects the implementation.
#[derive(Debug, Clone)]
pub enum WriterConfig {
    Kafka(KafkaWriterConfig),
}

impl WriterConfig {
    pub fn kind(&self) -> WriterKind {
        match self {
            WriterConfig::Kafka(_) => WriterKind::Kafka,
        }
    }
}

/// Parse a DSN naming the ZooKeeper ensemble that fronts a Kafka cluster.
///
/// Examples:
/// - "zookeeper://zk1:2181,zk2:2181"
/// - "zk://zk1:2181/app_logs" (explicit topic)
pub fn parse_dsn(dsn: &str) -> Result<WriterConfig, DsnError> {
    let lower = dsn.to_ascii_lowercase();
    let rest = if lower.starts_with("zookeeper://") {
        &dsn["zookeeper://".len()..]
    } else if lower.starts_with("zk://") {
        &dsn["zk://".len()..]
    } else {
        return Err(DsnError::UnknownScheme);
    };

    let (hosts, topic) = match rest.split_once('/') {
        Some((hosts, topic)) => (hosts, Some(topic.trim_matches('/'))),
        None => (rest, None),
    };
    let zk_hosts: Vec<String> = hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();
    if zk_hosts.is_empty() {
        return Err(DsnError::MissingHosts);
    }

    let mut config = KafkaWriterConfig::new(zk_hosts);
    if let Some(topic) = topic.filter(|t| !t.is_empty()) {
        config.topic = topic.to_string();
    }
    Ok(WriterConfig::Kafka(config))
}

/// Error type returned when parsing a DSN.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DsnError {
    #[error("unknown or unsupported DSN scheme")]
    UnknownScheme,

    #[error("DSN names no coordination hosts")]
    MissingHosts,
}

/// Error type returned when building a writer from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BackendBuildError {
    #[error("writer kind not compiled in: {0:?}")]
    Unimplemented(WriterKind),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Construct and start the writer matching `cfg`.
pub async fn make_writer_from_config(
    cfg: &WriterConfig,
    ctx: &WriterContext,
) -> Result<Arc<dyn Writer>, BackendBuildError> {
    match cfg {
        WriterConfig::Kafka(kafka) => {
            #[cfg(feature = "kafka")]
            {
                let writer = crate::remote::RemoteWriter::run(kafka, ctx).await?;
                Ok(Arc::new(writer) as Arc<dyn Writer>)
            }

            #[cfg(not(feature = "kafka"))]
            {
                let _ = (kafka, ctx);
                Err(BackendBuildError::Unimplemented(WriterKind::Kafka))
            }
        }
    }
}
