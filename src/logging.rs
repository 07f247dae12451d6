//! Tracing/logging setup for mcp402
//!
//! - Terminal verbosity: default WARN, `-v` INFO, `-d` DEBUG, `-q` ERROR, `-s` off
//! - Pretty, JSON or compact output on stderr
//! - Optional log file that always records DEBUG (INFO in release builds)
//! - `RUST_LOG` is honoured only when no verbosity flag was given

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format
#[derive(Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Colored human-readable output
    #[default]
    Pretty,
    /// Structured JSON output (one JSON object per line)
    Json,
    /// Compact single-line format
    Compact,
}

/// Tracing configuration built from CLI args / config file
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    pub silent: bool,
    pub format: LogFormat,
    /// Writes DEBUG+ regardless of the terminal level
    pub log_file: Option<PathBuf>,
}

impl TracingConfig {
    /// Terminal level, `None` when silent
    fn terminal_level(&self) -> Option<Level> {
        if self.silent {
            None
        } else if self.quiet {
            Some(Level::ERROR)
        } else if self.debug {
            // DEBUG is compiled out in release builds
            Some(if cfg!(debug_assertions) { Level::DEBUG } else { Level::INFO })
        } else if self.verbose {
            Some(Level::INFO)
        } else {
            Some(Level::WARN)
        }
    }

    fn level_flag_given(&self) -> bool {
        self.verbose || self.debug || self.quiet || self.silent
    }
}

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn directive(level: Level) -> String {
    format!("{}={},warn", env!("CARGO_CRATE_NAME"), level.as_str().to_lowercase())
}

fn terminal_filter(level: Level, flag_given: bool) -> EnvFilter {
    if flag_given {
        EnvFilter::new(directive(level))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)))
    }
}

fn terminal_layer(format: &LogFormat, filter: EnvFilter) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(file: std::fs::File) -> BoxedLayer {
    let level = if cfg!(debug_assertions) { Level::DEBUG } else { Level::INFO };
    fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(file)
        .with_filter(EnvFilter::new(directive(level)))
        .boxed()
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(config: TracingConfig) {
    if TRACING_INITIALIZED.set(()).is_err() {
        return;
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_error = None;

    if let Some(path) = &config.log_file {
        match std::fs::File::create(path) {
            Ok(file) => layers.push(file_layer(file)),
            Err(e) => file_error = Some((path.clone(), e)),
        }
    }

    if let Some(level) = config.terminal_level() {
        let filter = terminal_filter(level, config.level_flag_given());
        layers.push(terminal_layer(&config.format, filter));
    }

    if layers.is_empty() {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
    } else {
        let _ = tracing_subscriber::registry().with(layers).try_init();
    }

    if let Some((path, e)) = file_error {
        tracing::warn!(path = %path.display(), error = %e, "Failed to create log file, logging to terminal only");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_default() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn test_terminal_level() {
        let mut config = TracingConfig::default();
        assert_eq!(config.terminal_level(), Some(Level::WARN));
        assert!(!config.level_flag_given());

        config.verbose = true;
        assert_eq!(config.terminal_level(), Some(Level::INFO));

        config.quiet = true;
        assert_eq!(config.terminal_level(), Some(Level::ERROR));

        config.silent = true;
        assert_eq!(config.terminal_level(), None);
        assert!(config.level_flag_given());
    }

    #[test]
    fn test_directive_targets_this_crate() {
        assert_eq!(directive(Level::INFO), "mcp402=info,warn");
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
