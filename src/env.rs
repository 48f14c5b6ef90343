//! Environment variable names used by this crate for convenient
//! configuration from services.
//!
//! These are purely helpers; the dispatcher and writers never read the
//! environment themselves.

use crate::backend::{KafkaWriterConfig, WriterConfig};
use crate::dispatcher::DispatcherConfig;
use tracing::warn;

/// Application identity; also names the buffer file.
pub const LOG_RELAY_APP_NAME_ENV: &str = "LOG_RELAY_APP_NAME";

/// Optional prefix joined in front of per-call module names.
pub const LOG_RELAY_MODULE_PREFIX_ENV: &str = "LOG_RELAY_MODULE_PREFIX";

/// Directory holding the buffer file.
pub const LOG_RELAY_BUFFER_DIR_ENV: &str = "LOG_RELAY_BUFFER_DIR";

/// Comma-separated ZooKeeper ensemble. Unset means buffer-only operation.
pub const LOG_RELAY_ZK_HOSTS_ENV: &str = "LOG_RELAY_ZK_HOSTS";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Build a [`DispatcherConfig`] from the environment.
pub fn dispatcher_config_from_env(default_app_name: &str) -> DispatcherConfig {
    let mut config = DispatcherConfig::new(env_or(LOG_RELAY_APP_NAME_ENV, default_app_name));
    if let Ok(prefix) = std::env::var(LOG_RELAY_MODULE_PREFIX_ENV) {
        if !prefix.is_empty() {
            config.module_prefix = Some(prefix);
        }
    }
    if let Ok(dir) = std::env::var(LOG_RELAY_BUFFER_DIR_ENV) {
        config.buffer_dir = dir.into();
    }
    config
}

/// Remote writer configurations derived from the environment.
pub fn writer_configs_from_env() -> Vec<WriterConfig> {
    parse_zk_hosts(&env_or(LOG_RELAY_ZK_HOSTS_ENV, ""))
        .map(|hosts| vec![WriterConfig::Kafka(KafkaWriterConfig::new(hosts))])
        .unwrap_or_default()
}

fn parse_zk_hosts(raw: &str) -> Option<Vec<String>> {
    let hosts: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();
    (!hosts.is_empty()).then_some(hosts)
}

/// Host name stamped on every record.
///
/// `HOSTNAME` wins when set, then the kernel host name, then `"unknown"`.
pub fn detect_hostname() -> String {
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(name) => {
            if let Some(name) = name.to_str().filter(|n| !n.is_empty()) {
                return name.to_string();
            }
        }
        Err(e) => warn!(error = %e, "cannot read system hostname"),
    }
    "unknown".to_string()
}
