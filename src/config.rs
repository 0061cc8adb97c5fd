use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use miette::{Context, IntoDiagnostic, Result};
use serde::Deserialize;

use crate::cli::{Args, LogLevel};

/// Retrieval policy applied to every stream download
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    pub retries: u32,
    /// Bandwidth ceiling, in the resolver's rate syntax (e.g. "1.4M")
    pub limit_rate: String,
    pub concurrent_fragments: u32,
    pub buffer_size: String,
    pub timeout_secs: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            limit_rate: "1.4M".to_owned(),
            concurrent_fragments: 1,
            buffer_size: "1M".to_owned(),
            timeout_secs: 30 * 60,
        }
    }
}

impl FetchPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Encoder limits applied when muxing separate streams
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MuxPolicy {
    pub audio_bitrate: String,
    pub preset: String,
    pub bufsize: String,
    pub maxrate: String,
    pub threads: u32,
    pub timeout_secs: u64,
}

impl Default for MuxPolicy {
    fn default() -> Self {
        Self {
            audio_bitrate: "256k".to_owned(),
            preset: "ultrafast".to_owned(),
            bufsize: "32M".to_owned(),
            maxrate: "32M".to_owned(),
            threads: 4,
            timeout_secs: 10 * 60,
        }
    }
}

impl MuxPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How the resolver program is invoked
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Explicit program to use instead of detecting `yt-dlp` or `youtube-dl`
    pub program: Option<String>,
    pub cookies: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            program: None,
            cookies: None,
            user_agent: None,
            timeout_secs: 60,
        }
    }
}

impl ResolverSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: IpAddr,
    pub port: u16,
    pub temp_dir: PathBuf,
    pub allowed_origin: Option<String>,
    pub static_dir: Option<PathBuf>,
    pub history_db: Option<PathBuf>,
    pub log_level: LogLevel,
    pub resolver: ResolverSettings,
    pub fetch: FetchPolicy,
    pub mux: MuxPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3001,
            temp_dir: std::env::temp_dir().join("tubepipe-downloads"),
            allowed_origin: Some("http://localhost:8080".to_owned()),
            static_dir: None,
            history_db: None,
            log_level: LogLevel::Info,
            resolver: ResolverSettings::default(),
            fetch: FetchPolicy::default(),
            mux: MuxPolicy::default(),
        }
    }
}

impl Settings {
    /// Layer the configuration sources, lowest priority first:
    /// defaults, the configuration file, `TUBEPIPE__*` variables, the CLI.
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = &args.config {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        let path_str = |p: &Option<PathBuf>| p.as_ref().map(|p| p.to_string_lossy().into_owned());

        builder = builder
            .add_source(
                Environment::with_prefix("TUBEPIPE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("host", args.host.map(|h| h.to_string()))
            .and_then(|b| b.set_override_option("port", args.port.map(u64::from)))
            .and_then(|b| b.set_override_option("temp_dir", path_str(&args.temp_dir)))
            .and_then(|b| b.set_override_option("allowed_origin", args.allowed_origin.clone()))
            .and_then(|b| b.set_override_option("static_dir", path_str(&args.static_dir)))
            .and_then(|b| b.set_override_option("history_db", path_str(&args.history_db)))
            .and_then(|b| b.set_override_option("log_level", args.log_level.map(LogLevel::as_str)))
            .into_diagnostic()
            .wrap_err("Invalid command line override")?;

        let settings: Settings = builder
            .build()
            .into_diagnostic()
            .wrap_err("Could not read the configuration")?
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid configuration")?;

        Ok(settings.normalized())
    }

    /// An empty origin disables the allow-list
    fn normalized(mut self) -> Self {
        if self
            .allowed_origin
            .as_deref()
            .is_some_and(|o| o.trim().is_empty())
        {
            self.allowed_origin = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        let settings = Settings::load(&Args::default()).unwrap();

        assert_eq!(settings.port, 3001);
        assert_eq!(settings.fetch.retries, 10);
        assert_eq!(settings.fetch.limit_rate, "1.4M");
        assert_eq!(settings.mux.threads, 4);
        assert_eq!(settings.resolver.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn file_then_cli_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tubepipe.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                port = 4000
                allowed_origin = ""
                temp_dir = "/srv/downloads"

                [fetch]
                retries = 3

                [resolver]
                user_agent = "Mozilla/5.0"
            "#},
        )
        .unwrap();

        let args = Args {
            config: Some(path),
            port: Some(5000),
            ..Default::default()
        };
        let settings = Settings::load(&args).unwrap();

        assert_eq!(settings.port, 5000);
        assert_eq!(settings.temp_dir, PathBuf::from("/srv/downloads"));
        assert_eq!(settings.allowed_origin, None);
        assert_eq!(settings.fetch.retries, 3);
        assert_eq!(settings.fetch.limit_rate, "1.4M");
        assert_eq!(settings.resolver.user_agent.as_deref(), Some("Mozilla/5.0"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let args = Args {
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };

        assert!(Settings::load(&args).is_err());
    }
}
