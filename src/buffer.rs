use crate::format::JsonFormatter;
use crate::record::LogRecord;
use crate::writer::{Writer, WriterContext, WriterError, WriterStatus};
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    #[error("cannot open buffer file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Append-only local file that holds records no remote writer accepted.
///
/// The file is named `<app_name>.log` and contains one JSON object per
/// line. A single lock covers both appends and [`BufferWriter::retry_write`],
/// so a drain never loses or duplicates an entry appended concurrently.
pub struct BufferWriter {
    path: PathBuf,
    file: Mutex<File>,
    formatter: JsonFormatter,
}

impl BufferWriter {
    /// Open (or create) the buffer file for `ctx.app_name()` inside `dir`.
    ///
    /// A backlog left by a previous process is kept and will be replayed.
    pub fn open(dir: impl AsRef<Path>, ctx: &WriterContext) -> Result<Self, BufferError> {
        let dir = dir.as_ref();
        let path = dir.join(Self::file_name(ctx.app_name()));
        let open = || -> io::Result<File> {
            fs::create_dir_all(dir)?;
            OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(&path)
        };
        let file = open().map_err(|source| BufferError::Open {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            formatter: JsonFormatter::buffer(),
        })
    }

    pub fn file_name(app_name: &str) -> String {
        format!("{app_name}.log")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &LogRecord) {
        let mut line = match self.formatter.format(record) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "cannot format record for buffer");
                return;
            }
        };
        line.push(b'\n');

        let mut file = self.lock_file();
        if let Err(e) = file.write_all(&line) {
            error!(path = %self.path.display(), error = %e, "cannot append to buffer file");
        }
    }

    /// Read back every buffered record in append order and empty the file.
    ///
    /// Unparseable lines are logged and skipped. On a read error nothing is
    /// truncated and an empty sequence is returned.
    pub fn retry_write(&self) -> Vec<LogRecord> {
        let mut file = self.lock_file();

        let mut data = Vec::new();
        if let Err(e) = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut data))
        {
            error!(path = %self.path.display(), error = %e, "cannot read buffer file");
            return Vec::new();
        }

        let records: Vec<LogRecord> = data
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .filter_map(|line| match self.formatter.parse(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "skipping corrupt buffer line");
                    None
                }
            })
            .collect();

        if let Err(e) = file.set_len(0) {
            error!(path = %self.path.display(), error = %e, "cannot truncate buffer file");
        }
        if let Err(e) = file.seek(SeekFrom::End(0)) {
            error!(path = %self.path.display(), error = %e, "cannot reposition buffer file");
        }

        debug!(count = records.len(), "drained buffer file");
        records
    }

    fn lock_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Writer for BufferWriter {
    // Appends even after shutdown has been signalled: a local file write
    // cannot stall, and this is where records land when nothing else can
    // take them.
    async fn write(&self, record: LogRecord) {
        self.append(&record);
    }

    fn write_fail(&self) -> Result<mpsc::Receiver<LogRecord>, WriterError> {
        Err(WriterError::FailureStreamUnsupported)
    }

    fn status(&self) -> WriterStatus {
        WriterStatus::Ok
    }
}
