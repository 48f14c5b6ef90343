use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

/// Parent node under which every live broker registers itself.
pub const BROKER_IDS_PATH: &str = "/brokers/ids";

#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("cannot connect to coordination service {hosts}: {message}")]
    Connect { hosts: String, message: String },

    #[error("timed out connecting to coordination service {0}")]
    Timeout(String),

    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    #[error("no usable broker registrations under {0}")]
    NoBrokers(String),
}

/// Read-only view of a hierarchical coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn children(&self, path: &str) -> Result<Vec<String>, DiscoveryError>;

    async fn data(&self, path: &str) -> Result<Vec<u8>, DiscoveryError>;
}

#[derive(Deserialize)]
struct BrokerRegistration {
    #[serde(rename = "Host", alias = "host")]
    host: String,
    #[serde(rename = "Port", alias = "port")]
    port: u16,
}

/// Turn one registration node payload into a `host:port` address.
pub fn parse_broker_node(data: &[u8]) -> Result<String, serde_json::Error> {
    let broker: BrokerRegistration = serde_json::from_slice(data)?;
    Ok(format!("{}:{}", broker.host, broker.port))
}

/// List broker addresses registered under [`BROKER_IDS_PATH`].
///
/// Listing the parent node must succeed; individual nodes that cannot be
/// read or parsed are logged and skipped.
pub async fn discover_brokers(coordinator: &dyn Coordinator) -> Result<Vec<String>, DiscoveryError> {
    let mut children = coordinator.children(BROKER_IDS_PATH).await?;
    children.sort();

    let mut hosts = Vec::with_capacity(children.len());
    for child in children {
        let path = format!("{BROKER_IDS_PATH}/{child}");
        let data = match coordinator.data(&path).await {
            Ok(data) => data,
            Err(e) => {
                error!(path = %path, error = %e, "cannot read broker registration");
                continue;
            }
        };
        match parse_broker_node(&data) {
            Ok(host) => hosts.push(host),
            Err(e) => error!(path = %path, error = %e, "malformed broker registration"),
        }
    }

    if hosts.is_empty() {
        return Err(DiscoveryError::NoBrokers(BROKER_IDS_PATH.to_string()));
    }
    Ok(hosts)
}

#[cfg(feature = "kafka")]
pub use zk::ZkCoordinator;

#[cfg(feature = "kafka")]
mod zk {
    use super::{Coordinator, DiscoveryError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// [`Coordinator`] backed by a ZooKeeper session.
    pub struct ZkCoordinator {
        client: zookeeper_client::Client,
    }

    impl ZkCoordinator {
        /// Open a session against any of `hosts`, giving up after `timeout`.
        pub async fn connect(hosts: &[String], timeout: Duration) -> Result<Self, DiscoveryError> {
            let cluster = hosts.join(",");
            let client = tokio::time::timeout(timeout, zookeeper_client::Client::connect(&cluster))
                .await
                .map_err(|_| DiscoveryError::Timeout(cluster.clone()))?
                .map_err(|e| DiscoveryError::Connect {
                    hosts: cluster.clone(),
                    message: e.to_string(),
                })?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl Coordinator for ZkCoordinator {
        async fn children(&self, path: &str) -> Result<Vec<String>, DiscoveryError> {
            self.client
                .list_children(path)
                .await
                .map_err(|e| DiscoveryError::Read {
                    path: path.to_string(),
                    message: e.to_string(),
                })
        }

        async fn data(&self, path: &str) -> Result<Vec<u8>, DiscoveryError> {
            let (data, _stat) = self.client.get_data(path).await.map_err(|e| DiscoveryError::Read {
                path: path.to_string(),
                message: e.to_string(),
            })?;
            Ok(data)
        }
    }
}
