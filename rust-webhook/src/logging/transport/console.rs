//! Human-readable console output.

use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{Transport, TransportError};
use crate::logging::{Level, LogRecord};

/// Writes one formatted line per record.
///
/// Request records get a compact `level: status ip method url input` line;
/// anything else prints its message followed by its fields as JSON.
pub struct ConsoleTransport {
    level: Level,
    colorize: bool,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleTransport {
    /// Console transport writing to stdout.
    pub fn stdout(level: Level, colorize: bool) -> Self {
        Self::with_writer(level, colorize, Box::new(io::stdout()))
    }

    pub fn with_writer(level: Level, colorize: bool, writer: Box<dyn Write + Send>) -> Self {
        Self {
            level,
            colorize,
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    fn min_level(&self) -> Level {
        self.level
    }

    fn accepts(&self, record: &LogRecord) -> bool {
        record.level.passes(self.level)
    }

    async fn deliver(&self, record: &LogRecord) -> Result<(), TransportError> {
        let line = format_record(record, self.colorize);
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "console writer poisoned"))?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Render a record the way the console prints it.
pub fn format_record(record: &LogRecord, colorize: bool) -> String {
    let tag = level_tag(record.level, colorize);

    if let Some(http) = &record.http {
        let input = match record.fields.get("input") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let line = format!(
            "{}: {} {} {} {} {}",
            tag,
            http.status,
            http.ip.as_deref().unwrap_or("-"),
            http.method,
            http.url,
            input
        );
        return line.trim_end().to_string();
    }

    let mut line = format!("{}: {}", tag, record.message.as_deref().unwrap_or(""));

    let mut meta = record.metadata();
    if let Some(err) = &record.error {
        meta.insert(
            "error".to_string(),
            serde_json::json!({ "class": err.class, "message": err.message }),
        );
    }
    if !meta.is_empty() {
        if let Ok(json) = serde_json::to_string_pretty(&meta) {
            line.push(' ');
            line.push_str(&json);
        }
    }
    line
}

fn level_tag(level: Level, colorize: bool) -> String {
    if !colorize {
        return level.as_str().to_string();
    }
    let code = match level {
        Level::Error => 31,
        Level::Warn => 33,
        Level::Info => 32,
        Level::Verbose => 36,
        Level::Debug => 34,
        Level::Silly => 35,
    };
    format!("\x1b[{}m{}\x1b[39m", code, level.as_str())
}
