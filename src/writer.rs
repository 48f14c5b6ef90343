use crate::record::LogRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Health of a writer as seen by the dispatcher's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    Ok,
    Fail,
}

#[derive(thiserror::Error, Debug)]
pub enum WriterError {
    #[error("writer does not produce a failure stream")]
    FailureStreamUnsupported,

    #[error("failure stream already taken")]
    FailureStreamTaken,
}

/// Destination for [`LogRecord`]s managed by the dispatcher.
///
/// Initialization happens in each implementation's constructor (`run` /
/// `open`); a value implementing this trait is always ready for `write`.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Submit one record for delivery.
    ///
    /// Never fails from the caller's point of view. Records that cannot be
    /// delivered are surfaced through [`Writer::write_fail`].
    async fn write(&self, record: LogRecord);

    /// Hand out the stream of records this writer could not deliver.
    ///
    /// The stream has exactly one consumer, so the receiver is returned
    /// once; later calls yield [`WriterError::FailureStreamTaken`].
    fn write_fail(&self) -> Result<mpsc::Receiver<LogRecord>, WriterError>;

    /// Current health; safe to call concurrently with `write`.
    fn status(&self) -> WriterStatus;
}

/// Process-wide identity and shutdown signal shared by every writer.
#[derive(Debug, Clone)]
pub struct WriterContext {
    app_name: Arc<str>,
    module_prefix: Option<Arc<str>>,
    token: CancellationToken,
}

impl WriterContext {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: Arc::from(app_name.into()),
            module_prefix: None,
            token: CancellationToken::new(),
        }
    }

    pub fn with_module_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.module_prefix = Some(Arc::from(prefix.into()));
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn module_prefix(&self) -> Option<&str> {
        self.module_prefix.as_deref()
    }

    /// Join the configured prefix with an optional per-call module using `.`.
    pub fn module_path(&self, module: Option<&str>) -> Option<String> {
        match (self.module_prefix(), module.filter(|m| !m.is_empty())) {
            (Some(prefix), Some(module)) => Some(format!("{prefix}.{module}")),
            (Some(prefix), None) => Some(prefix.to_string()),
            (None, Some(module)) => Some(module.to_string()),
            (None, None) => None,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Lock-free OK/FAIL flag owned by a single writer.
#[derive(Debug, Default)]
pub struct HealthFlag {
    failed: AtomicBool,
}

impl HealthFlag {
    pub fn status(&self) -> WriterStatus {
        if self.failed.load(Ordering::Acquire) {
            WriterStatus::Fail
        } else {
            WriterStatus::Ok
        }
    }

    /// Mark the writer failed. Returns `true` only on the OK→FAIL edge.
    pub fn mark_failed(&self) -> bool {
        !self.failed.swap(true, Ordering::AcqRel)
    }

    /// Optimistically re-assert health, whether or not anything succeeded.
    pub fn reset(&self) {
        self.failed.store(false, Ordering::Release);
    }
}
