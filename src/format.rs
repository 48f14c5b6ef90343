use crate::record::{Level, LogRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Prefix applied to free-form fields whose name collides with a reserved
/// key, or already starts with this prefix. Parsing strips exactly one.
const CLASH_PREFIX: &str = "fields.";

/// On-wire names of the three reserved record attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKeys {
    pub time: &'static str,
    pub level: &'static str,
    pub message: &'static str,
}

impl FieldKeys {
    /// Keys used for lines in the local buffer file.
    pub const BUFFER: FieldKeys = FieldKeys {
        time: "time",
        level: "level",
        message: "msg",
    };

    /// Keys expected by the logstash pipeline behind the broker topic.
    pub const LOGSTASH: FieldKeys = FieldKeys {
        time: "@timestamp",
        level: "level",
        message: "message",
    };

    fn is_reserved(&self, key: &str) -> bool {
        key == self.time || key == self.level || key == self.message
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a json object")]
    NotAnObject,
}

/// Renders a [`LogRecord`] as a single JSON object and parses it back.
#[derive(Debug, Clone, Copy)]
pub struct JsonFormatter {
    keys: FieldKeys,
    precision: SecondsFormat,
}

impl JsonFormatter {
    pub fn new(keys: FieldKeys, precision: SecondsFormat) -> Self {
        Self { keys, precision }
    }

    /// Formatter for the buffer file; keeps full timestamp precision so
    /// replayed records carry their original time.
    pub fn buffer() -> Self {
        Self::new(FieldKeys::BUFFER, SecondsFormat::AutoSi)
    }

    pub fn logstash() -> Self {
        Self::new(FieldKeys::LOGSTASH, SecondsFormat::Millis)
    }

    pub fn keys(&self) -> FieldKeys {
        self.keys
    }

    /// Serialize `record` to JSON bytes, without a trailing newline.
    pub fn format(&self, record: &LogRecord) -> Result<Vec<u8>, FormatError> {
        let mut map = Map::new();
        for (key, value) in &record.fields {
            if self.keys.is_reserved(key) || key.starts_with(CLASH_PREFIX) {
                map.insert(format!("{CLASH_PREFIX}{key}"), value.clone());
            } else {
                map.insert(key.clone(), value.clone());
            }
        }
        map.insert(
            self.keys.time.to_string(),
            Value::String(record.timestamp.to_rfc3339_opts(self.precision, true)),
        );
        map.insert(self.keys.level.to_string(), Value::String(record.level.to_string()));
        map.insert(self.keys.message.to_string(), Value::String(record.message.clone()));

        Ok(serde_json::to_vec(&Value::Object(map))?)
    }

    /// Rebuild a record from one formatted line.
    ///
    /// Reserved keys are lifted out of the field mapping. An unreadable
    /// timestamp becomes the Unix epoch and an unknown level becomes `info`.
    pub fn parse(&self, line: &[u8]) -> Result<LogRecord, FormatError> {
        let mut map = match serde_json::from_slice::<Value>(line)? {
            Value::Object(map) => map,
            _ => return Err(FormatError::NotAnObject),
        };

        let timestamp = map
            .remove(self.keys.time)
            .and_then(|v| v.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();
        let level = map
            .remove(self.keys.level)
            .and_then(|v| v.as_str().and_then(|s| s.parse::<Level>().ok()))
            .unwrap_or(Level::Info);
        let message = match map.remove(self.keys.message) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let mut fields = BTreeMap::new();
        for (key, value) in map {
            match key.strip_prefix(CLASH_PREFIX) {
                Some(original) => {
                    fields.insert(original.to_string(), value);
                }
                None => {
                    fields.insert(key, value);
                }
            }
        }

        Ok(LogRecord {
            timestamp,
            level,
            message,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buffer_line_uses_fixed_keys() {
        let record = LogRecord::new(Level::Warn, "disk slow").with_field("foo", "bar");
        let bytes = JsonFormatter::buffer().format(&record).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["level"], json!("warn"));
        assert_eq!(value["msg"], json!("disk slow"));
        assert_eq!(value["foo"], json!("bar"));
        assert!(value["time"].is_string());
        assert!(!bytes.contains(&b'\n'));
    }

    #[test]
    fn parse_restores_record_identity() {
        let formatter = JsonFormatter::buffer();
        let record = LogRecord::new(Level::Info, "x").with_field("foo", "bar");
        let parsed = formatter.parse(&formatter.format(&record).unwrap()).unwrap();

        assert_eq!(parsed, record);
        assert!(!parsed.fields.contains_key("time"));
        assert!(!parsed.fields.contains_key("msg"));
        assert!(!parsed.fields.contains_key("level"));
    }

    #[test]
    fn clashing_field_names_are_prefixed_and_restored() {
        let formatter = JsonFormatter::buffer();
        let record = LogRecord::new(Level::Error, "boom").with_field("msg", "shadowed");
        let bytes = formatter.format(&record).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["msg"], json!("boom"));
        assert_eq!(value["fields.msg"], json!("shadowed"));

        let parsed = formatter.parse(&bytes).unwrap();
        assert_eq!(parsed.message, "boom");
        assert_eq!(parsed.fields["msg"], json!("shadowed"));
    }

    #[test]
    fn prefixed_field_names_keep_their_identity() {
        let formatter = JsonFormatter::buffer();
        let alone = LogRecord::new(Level::Info, "a").with_field("fields.msg", 1);
        let parsed = formatter.parse(&formatter.format(&alone).unwrap()).unwrap();
        assert_eq!(parsed.fields, alone.fields);

        let both = LogRecord::new(Level::Info, "b")
            .with_field("msg", "plain")
            .with_field("fields.msg", "prefixed")
            .with_field("fields.other", true);
        let bytes = formatter.format(&both).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["fields.msg"], json!("plain"));
        assert_eq!(value["fields.fields.msg"], json!("prefixed"));

        let parsed = formatter.parse(&bytes).unwrap();
        assert_eq!(parsed.fields, both.fields);
    }

    #[test]
    fn logstash_keys_and_millisecond_timestamp() {
        let record = LogRecord::new(Level::Debug, "hi");
        let bytes = JsonFormatter::logstash().format(&record).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        let ts = value["@timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.split('.').nth(1).map(|s| s.len()), Some(4));
        assert_eq!(value["message"], json!("hi"));
    }

    #[test]
    fn lenient_defaults_for_missing_reserved_keys() {
        let parsed = JsonFormatter::buffer()
            .parse(br#"{"level":"nonsense","code":7}"#)
            .unwrap();

        assert_eq!(parsed.level, Level::Info);
        assert_eq!(parsed.message, "");
        assert_eq!(parsed.timestamp, DateTime::<Utc>::default());
        assert_eq!(parsed.fields["code"], json!(7));
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            JsonFormatter::buffer().parse(b"[1,2]"),
            Err(FormatError::NotAnObject)
        ));
        assert!(matches!(
            JsonFormatter::buffer().parse(b"{truncated"),
            Err(FormatError::Json(_))
        ));
    }
}
