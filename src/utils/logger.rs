use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;
use std::path::{Path, PathBuf};

use crate::telemetry::SLOW_TARGET;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION: u32 = 7;

/// Initializes the logging system from `log4rs.yaml` in the working directory.
/// A missing or invalid file leaves logging unconfigured.
pub fn init() -> Result<(), Box<dyn Error>> {
    let _ = log4rs::init_file("log4rs.yaml", log4rs::config::Deserializers::default());
    Ok(())
}

/// Initializes the logging system from a specific config file.
///
/// # Errors
/// Returns an error if the file cannot be read or a logger is already installed.
pub fn init_path(path: &Path) -> Result<(), Box<dyn Error>> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())?;
    Ok(())
}

/// Parses `error|warn|info|debug|trace|off`; anything else is `info`.
#[must_use]
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, name: &str, keep: u32) -> Result<RollingFileAppender, Box<dyn Error>> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{name}.{{}}.log")).display()), keep)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{name}.log")), Box::new(policy))?;
    Ok(appender)
}

/// Builds the logging configuration: everything goes to `app.log`, slow-operation events
/// go to `slow.log` only. Both roll at 10 MiB.
///
/// # Errors
/// Returns an error if the log files cannot be created.
pub fn build_config(dir: &Path, level: LevelFilter, retention: Option<usize>) -> Result<Config, Box<dyn Error>> {
    std::fs::create_dir_all(dir)?;
    let keep = retention.and_then(|r| u32::try_from(r).ok()).unwrap_or(DEFAULT_RETENTION).max(1);
    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(dir, "app", keep)?)))
        .appender(Appender::builder().build("slow", Box::new(rolling(dir, "slow", keep)?)))
        .logger(Logger::builder().appender("slow").additive(false).build(SLOW_TARGET, LevelFilter::Warn))
        .build(Root::builder().appender("app").build(level))?;
    Ok(config)
}

/// Configures logging for the process.
/// - dir: base directory for logs; if None, current directory.
/// - level: error|warn|info|debug|trace
/// - retention: number of rolled files to keep (default 7)
///
/// # Errors
/// Returns an error if the log files cannot be created or a logger is already installed.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let base = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let config = build_config(&base, parse_level(level), retention)?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Configures logging from environment variables if present:
/// - DOCBRIDGE_LOG_DIR
/// - DOCBRIDGE_LOG_LEVEL
/// - DOCBRIDGE_LOG_RETENTION
///
/// # Errors
/// See [`configure_logging`].
pub fn configure_from_env() -> Result<(), Box<dyn Error>> {
    let dir = std::env::var("DOCBRIDGE_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("DOCBRIDGE_LOG_LEVEL").ok();
    let retention = std::env::var("DOCBRIDGE_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    configure_logging(dir.as_deref(), level.as_deref(), retention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level(Some("DEBUG")), LevelFilter::Debug);
        assert_eq!(parse_level(Some("nonsense")), LevelFilter::Info);
        assert_eq!(parse_level(None), LevelFilter::Info);
    }

    #[test]
    fn config_creates_app_and_slow_logs() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_config(dir.path(), LevelFilter::Info, Some(3)).unwrap();
        assert_eq!(config.appenders().len(), 2);
        assert!(config.loggers().iter().any(|l| l.name() == SLOW_TARGET));
        assert!(dir.path().join("app.log").exists());
        assert!(dir.path().join("slow.log").exists());
    }
}
