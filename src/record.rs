use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field carrying the application identity, injected by the dispatcher.
pub const FIELD_APP: &str = "app";
/// Field carrying the host name, injected by the dispatcher.
pub const FIELD_HOSTNAME: &str = "hostname";
/// Field carrying the dotted module path.
pub const FIELD_MODULE: &str = "module";
/// Field carrying a captured stack trace.
pub const FIELD_STACK: &str = "stack";

/// Severity of a [`LogRecord`], ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Panic => "panic",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("not a valid log level: {0:?}")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            "panic" => Ok(Level::Panic),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// One logical log event.
///
/// Records are cloned into every writer they are fanned out to; a writer
/// owns its copy and never hands a mutated record back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Create a record stamped with the current wall-clock time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the per-call module override. The dispatcher later joins it
    /// with the configured module prefix.
    pub fn with_module(self, module: impl Into<String>) -> Self {
        self.with_field(FIELD_MODULE, module.into())
    }

    /// Attach the current stack trace. Meant for the recovery path of a
    /// caught panic, where the trace still points at the failing frames.
    pub fn with_panic_stack(self) -> Self {
        let stack = std::backtrace::Backtrace::force_capture().to_string();
        self.with_field(FIELD_STACK, stack)
    }

    pub fn app(&self) -> Option<&str> {
        self.str_field(FIELD_APP)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.str_field(FIELD_HOSTNAME)
    }

    pub fn module(&self) -> Option<&str> {
        self.str_field(FIELD_MODULE)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}
