use crate::backend::{make_writer_from_config, BackendBuildError, WriterConfig};
use crate::buffer::{BufferError, BufferWriter};
use crate::env::detect_hostname;
use crate::record::{LogRecord, FIELD_APP, FIELD_HOSTNAME, FIELD_MODULE};
use crate::writer::{Writer, WriterContext, WriterStatus};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Dispatcher settings.
///
/// **Fields**
/// - `app_name`: identity stamped on every record; also names the buffer file.
/// - `module_prefix`: joined in front of per-call module names with `.`.
/// - `buffer_dir`: directory holding `<app_name>.log`.
/// - `retry_interval`: how often buffered records are offered to healthy
///   writers.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub app_name: String,
    pub module_prefix: Option<String>,
    pub buffer_dir: PathBuf,
    pub retry_interval: Duration,
}

impl DispatcherConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            module_prefix: None,
            buffer_dir: PathBuf::from("."),
            retry_interval: Duration::from_secs(1),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DispatcherError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Backend(#[from] BackendBuildError),
}

/// Fans records out to every registered writer and keeps the local
/// buffer flowing back to them.
///
/// With no remote writers registered every record goes to the buffer
/// file. Once writers exist the buffer only receives what they reject,
/// and a retry loop replays it whenever at least one writer is healthy.
/// Writers are never removed.
///
/// Cloning is cheap; all clones share state and the cancellation context.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: WriterContext,
    hostname: String,
    retry_interval: Duration,
    buffer: Arc<BufferWriter>,
    writers: Mutex<Vec<Arc<dyn Writer>>>,
    retry_started: AtomicBool,
}

impl Dispatcher {
    /// Open the buffer file and build a dispatcher with no remote writers.
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatcherError> {
        let mut ctx = WriterContext::new(config.app_name);
        if let Some(prefix) = config.module_prefix {
            ctx = ctx.with_module_prefix(prefix);
        }
        let buffer = BufferWriter::open(&config.buffer_dir, &ctx)?;
        let retry_interval = config.retry_interval.max(Duration::from_millis(10));

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                hostname: detect_hostname(),
                retry_interval,
                buffer: Arc::new(buffer),
                writers: Mutex::new(Vec::new()),
                retry_started: AtomicBool::new(false),
            }),
        })
    }

    pub fn context(&self) -> &WriterContext {
        &self.inner.ctx
    }

    pub fn buffer(&self) -> &Arc<BufferWriter> {
        &self.inner.buffer
    }

    /// Stamp app, hostname and the joined module path onto `record`.
    pub fn enrich(&self, record: &mut LogRecord) {
        let ctx = &self.inner.ctx;
        record
            .fields
            .insert(FIELD_APP.to_string(), ctx.app_name().into());
        record
            .fields
            .insert(FIELD_HOSTNAME.to_string(), self.inner.hostname.clone().into());
        match ctx.module_path(record.module()) {
            Some(module) => {
                record.fields.insert(FIELD_MODULE.to_string(), module.into());
            }
            None => {
                record.fields.remove(FIELD_MODULE);
            }
        }
    }

    /// Enrich `record` and hand a copy to every registered writer, or to
    /// the buffer when none are registered.
    pub async fn log(&self, mut record: LogRecord) {
        self.enrich(&mut record);

        let writers = self.lock_writers().clone();
        if writers.is_empty() {
            self.inner.buffer.append(&record);
            return;
        }
        for writer in &writers {
            writer.write(record.clone()).await;
        }
    }

    /// Build, start and register a writer for each configuration.
    ///
    /// Fails on the first writer that cannot be initialized; the caller is
    /// expected to treat that as fatal.
    pub async fn add_writers(
        &self,
        configs: impl IntoIterator<Item = WriterConfig>,
    ) -> Result<(), DispatcherError> {
        for config in configs {
            let writer = make_writer_from_config(&config, &self.inner.ctx).await?;
            debug!(kind = ?config.kind(), "remote writer started");
            self.register(writer);
        }
        Ok(())
    }

    /// Register an already running writer.
    ///
    /// Starts draining its failure stream into the buffer and, on first
    /// registration, the shared retry loop. Must be called inside a Tokio
    /// runtime.
    pub fn register(&self, writer: Arc<dyn Writer>) {
        match writer.write_fail() {
            Ok(failures) => {
                tokio::spawn(drain_failures(
                    failures,
                    Arc::clone(&self.inner.buffer),
                    self.inner.ctx.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "writer registered without a failure stream"),
        }

        self.lock_writers().push(writer);

        if !self.inner.retry_started.swap(true, Ordering::AcqRel) {
            let this = self.clone();
            tokio::spawn(async move { this.retry_loop().await });
        }
    }

    pub fn writer_count(&self) -> usize {
        self.lock_writers().len()
    }

    /// Writers currently reporting [`WriterStatus::Ok`].
    pub fn ok_writers(&self) -> Vec<Arc<dyn Writer>> {
        self.lock_writers()
            .iter()
            .filter(|w| w.status() == WriterStatus::Ok)
            .cloned()
            .collect()
    }

    /// One retry tick: if any writer is healthy, drain the buffer and
    /// replay every record to each healthy writer. Returns the number of
    /// records drained.
    pub async fn retry_once(&self) -> usize {
        let writers = self.ok_writers();
        if writers.is_empty() {
            return 0;
        }

        // File I/O runs on the blocking pool so the async workers keep going.
        let buffer = Arc::clone(&self.inner.buffer);
        let records = match tokio::task::spawn_blocking(move || buffer.retry_write()).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "buffer replay task failed");
                return 0;
            }
        };
        if !records.is_empty() {
            debug!(count = records.len(), writers = writers.len(), "replaying buffered records");
        }
        for record in &records {
            for writer in &writers {
                writer.write(record.clone()).await;
            }
        }
        records.len()
    }

    /// Cancel the shared context, stopping every background loop.
    pub fn shutdown(&self) {
        self.inner.ctx.cancel();
    }

    async fn retry_loop(self) {
        let ctx = self.inner.ctx.clone();
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = sleep(self.inner.retry_interval) => {
                    self.retry_once().await;
                }
            }
        }
    }

    fn lock_writers(&self) -> MutexGuard<'_, Vec<Arc<dyn Writer>>> {
        self.inner.writers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn drain_failures(
    mut failures: mpsc::Receiver<LogRecord>,
    buffer: Arc<BufferWriter>,
    ctx: WriterContext,
) {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,
            record = failures.recv() => match record {
                Some(record) => buffer.append(&record),
                None => return,
            },
        }
    }
}
