//! Unified logging module
//!
//! Console output plus a daily rolling log file, both filtered by one
//! `EnvFilter` (`RUST_LOG` when set).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Collection finished`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Global guard for keeping the file writer alive
static GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

/// Get log root directory
///
/// Priority: `SYNCSRV_LOG_DIR` env > default "logs". Test binaries default
/// to the system temp directory so runs do not litter the workspace.
pub fn get_log_root() -> PathBuf {
    std::env::var("SYNCSRV_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            if std::env::var("CARGO_TARGET_TMPDIR").is_ok() {
                std::env::temp_dir().join("syncsrv-test-logs")
            } else {
                PathBuf::from("logs")
            }
        })
}

// Daily rolling file writer with naming format: {YYYYMMDD}_{service}.log
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    current_date: Arc<Mutex<String>>,
    current_file: Arc<Mutex<Option<File>>>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&log_dir)?;

        let current_date = chrono::Local::now().format("%Y%m%d").to_string();
        let file = Self::open(&log_dir, &current_date, &service_name)?;

        Ok(Self {
            service_name,
            log_dir,
            current_date: Arc::new(Mutex::new(current_date)),
            current_file: Arc::new(Mutex::new(Some(file))),
        })
    }

    fn open(log_dir: &std::path::Path, date: &str, service: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(format!("{}_{}.log", date, service)))
    }

    fn roll_if_needed(&self) -> std::io::Result<()> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let mut current = self
            .current_date
            .lock()
            .map_err(|_| std::io::Error::other("log date lock poisoned"))?;
        if *current != today {
            let file = Self::open(&self.log_dir, &today, &self.service_name)?;
            if let Ok(mut slot) = self.current_file.lock() {
                *slot = Some(file);
            }
            *current = today;
        }
        Ok(())
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.roll_if_needed()?;
        let mut guard = self
            .current_file
            .lock()
            .map_err(|_| std::io::Error::other("log file lock poisoned"))?;
        match guard.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut guard = self
            .current_file
            .lock()
            .map_err(|_| std::io::Error::other("log file lock poisoned"))?;
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the file suffix and default debug target
    pub service_name: String,
    /// Base directory for logs
    pub log_dir: PathBuf,
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Enable JSON format for the file output
    pub enable_json: bool,
    /// Write a log file at all (console only when false)
    pub enable_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "syncsrv".to_string(),
            log_dir: get_log_root(),
            level: Level::INFO,
            enable_json: false,
            enable_file: true,
        }
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!(
            "{},sqlx=warn,{}={}",
            config.level.as_str().to_lowercase(),
            config.service_name,
            config.level.as_str().to_lowercase()
        )
    });
    let env_filter = EnvFilter::try_new(&filter_str)?;

    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_file {
        let writer = DailyRollingWriter::new(config.service_name.clone(), config.log_dir.clone())?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);

        let slot = GUARD.get_or_init(|| Mutex::new(None));
        match slot.lock() {
            Ok(mut slot) => *slot = Some(guard),
            Err(poisoned) => *poisoned.into_inner() = Some(guard),
        }

        let layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_level(true)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    Ok(())
}
