//! Logging backends for the loader
//!
//! `XSE_LOG_LEVEL` selects the level; a `json:` prefix switches to JSON lines.
//! `XSE_LOG_PATH` sends JSON output to a file instead of stderr.

use chrono::{Local, Utc};
use log::{LevelFilter, Log, Metadata, Record};
use serde_json::json;
use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Mutex;

/// Level used when nothing is configured
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Parsed form of a level string such as `"debug"` or `"json:trace"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub json: bool,
    pub filter: LevelFilter,
}

impl LogSettings {
    pub fn parse(level_str: &str) -> Self {
        let (json, level) = match level_str.strip_prefix("json:") {
            Some(stripped) => (true, stripped),
            None if level_str == "json" => (true, DEFAULT_LOG_LEVEL),
            None => (false, level_str),
        };

        let filter = match level.trim().to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" | "warning" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info,
        };

        Self { json, filter }
    }
}

/// JSON lines logger
#[derive(Debug)]
pub struct JsonLogger {
    filter: LevelFilter,
    target_file: Mutex<Option<File>>,
}

impl JsonLogger {
    pub fn new(filter: LevelFilter, log_path: Option<String>) -> Self {
        let target_file =
            log_path.and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

        JsonLogger {
            filter,
            target_file: Mutex::new(target_file),
        }
    }

    /// Install the global logger for `level_str`.
    ///
    /// Safe to call more than once; later calls are ignored by the `log`
    /// facade.
    pub fn init_with_level(level_str: &str) -> LogSettings {
        let settings = LogSettings::parse(level_str);

        if !settings.json {
            let _ = env_logger::Builder::new()
                .filter_level(settings.filter)
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "🧩 [{} {} {}] {}",
                        Local::now().format("%Y-%m-%dT%H:%M:%S"),
                        record.level(),
                        record.target(),
                        record.args()
                    )
                })
                .try_init();
            return settings;
        }

        let logger = Box::new(JsonLogger::new(settings.filter, env::var("XSE_LOG_PATH").ok()));
        if let Err(e) = log::set_boxed_logger(logger) {
            eprintln!("Failed to initialize JSON logger: {e}");
            return settings;
        }

        log::set_max_level(settings.filter);
        settings
    }

    /// Initialize from `XSE_LOG_LEVEL`
    pub fn init() -> LogSettings {
        let level = env::var("XSE_LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        Self::init_with_level(&level)
    }

    fn write_line(&self, line: &str) {
        match self.target_file.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(file) => {
                    let _ = file.write_all(line.as_bytes());
                    let _ = file.flush();
                }
                None => {
                    let _ = io::stderr().write_all(line.as_bytes());
                }
            },
            Err(_) => {
                let _ = io::stderr().write_all(line.as_bytes());
            }
        }
    }
}

/// Render one record as a JSON line
fn render(record: &Record<'_>) -> String {
    let entry = json!({
        "@timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        "@level": record.level().to_string().to_lowercase(),
        "@message": record.args().to_string(),
        "@module": record.target(),
        "@pid": std::process::id(),
        "@loader_version": crate::version::VERSION,
    });
    format!("{}\n", serde_json::to_string(&entry).unwrap_or_default())
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.write_line(&render(record));
        }
    }

    fn flush(&self) {
        if let Ok(mut guard) = self.target_file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
        let _ = io::stderr().flush();
    }
}

/// Helper to check if JSON logging is enabled
pub fn is_json_logging() -> bool {
    env::var("XSE_LOG_LEVEL")
        .map(|v| v.starts_with("json"))
        .unwrap_or(false)
}
