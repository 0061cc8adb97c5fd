use std::{net::IpAddr, path::PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

macro_rules! arg_env {
    ($v:literal) => {
        concat!("TUBEPIPE_", $v)
    };
}

/// HTTP service resolving web videos with `yt-dlp`, muxing them with `ffmpeg`
/// and streaming the resulting file back to the client.
///
/// Every option left unset falls back to the configuration file,
/// then to the `TUBEPIPE__*` environment variables, then to the built-in defaults.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env=arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// The address to listen on
    #[arg(long, env=arg_env!("HOST"))]
    pub host: Option<IpAddr>,

    /// The port to listen on
    #[arg(long, env=arg_env!("PORT"))]
    pub port: Option<u16>,

    /// The directory where in-flight downloads are stored.
    /// Stale files matching the download naming scheme are deleted at startup
    #[arg(long, env=arg_env!("TEMP_DIR"))]
    pub temp_dir: Option<PathBuf>,

    /// The only browser origin allowed to call the API
    #[arg(long, env=arg_env!("ALLOWED_ORIGIN"))]
    pub allowed_origin: Option<String>,

    /// A directory of static files (the web UI) served for non-API paths
    #[arg(long, env=arg_env!("STATIC_DIR"))]
    pub static_dir: Option<PathBuf>,

    /// The path to the SQLite file keeping the download history.
    /// History is disabled when unset
    #[arg(long, env=arg_env!("HISTORY_DB"))]
    pub history_db: Option<PathBuf>,

    /// The maximum level of the logged messages
    #[arg(long, value_enum, env=arg_env!("LOG_LEVEL"))]
    pub log_level: Option<LogLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "tubepipe",
            "--port",
            "4000",
            "--temp-dir",
            "/var/tmp/tubepipe",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.port, Some(4000));
        assert_eq!(args.temp_dir, Some(PathBuf::from("/var/tmp/tubepipe")));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert_eq!(args.history_db, None);
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(Args::try_parse_from(["tubepipe", "--port", "99999"]).is_err());
    }
}
