use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, trace};

use super::{
    command::{
        assert_success_command, into_success, run_command, Capture, CommandOutput, PROBE_TIMEOUT,
        YT_DL, YT_DLP,
    },
    ProgressFn,
};
use crate::{
    config::{FetchPolicy, ResolverSettings},
    my_regex::parse_download_progress,
    result::{FetchError, ResolveError, ToolError},
    types::{select_variants, FormatDescriptor, RawFormat, ResolvedVideo, VideoMetadata},
};

/// Format expression favoring MP4 video with M4A audio,
/// falling back to any best combined stream.
const PREFERRED_FORMAT: &str = "bv*[ext=mp4]+ba[ext=m4a]/b[ext=mp4] / bv*+ba/b";

/// Exit code of yt-dlp once `--max-downloads` is reached, the download did happen
const MAX_DOWNLOADS_REACHED: i32 = 101;

/// Which stream of a video to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// An exact format identifier, as listed by the resolver
    Format(String),
    /// The best stream carrying both video and audio
    BestCombined,
    /// The best audio-only stream
    BestAudio,
}

impl FetchTarget {
    pub fn selector(&self) -> &str {
        match self {
            FetchTarget::Format(id) => id,
            FetchTarget::BestCombined => "best[ext=mp4]/best",
            FetchTarget::BestAudio => "bestaudio[ext=m4a]/bestaudio",
        }
    }
}

/// Interface for resolving and downloading streams
#[async_trait]
pub trait StreamDownloader: Send + Sync {
    /// Get the video metadata along with its downloadable variants.
    /// Nothing is downloaded.
    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError>;

    /// Download one stream of the video to `path`.
    ///
    /// On error, whatever was written at `path` must be considered unusable.
    async fn download(
        &self,
        url: &str,
        target: &FetchTarget,
        path: &Path,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), FetchError>;
}

/// Interface for the [youtube-dl](https://github.com/ytdl-org/youtube-dl) program
/// and its [yt-dlp](https://github.com/yt-dlp/yt-dlp) fork
#[derive(Debug)]
pub struct Ytdl {
    program: String,
    settings: ResolverSettings,
    policy: FetchPolicy,
}

impl Ytdl {
    /// Verify that the configured program, or else `yt-dlp` or `youtube-dl`, is reachable
    pub async fn new(settings: ResolverSettings, policy: FetchPolicy) -> Result<Self, ToolError> {
        let candidates = match &settings.program {
            Some(program) => vec![program.clone()],
            None => vec![YT_DLP.to_owned(), YT_DL.to_owned()],
        };

        let mut last_err = None;
        for program in candidates {
            match assert_success_command(&program, |cmd| cmd.arg("--version"), PROBE_TIMEOUT).await
            {
                Ok(res) => {
                    info!("Found {program} {}", res.stdout.trim());
                    return Ok(Self::with_program(program, settings, policy));
                }
                Err(err) => {
                    debug!("{program} is not usable: {err}");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ToolError::Spawn {
            program: YT_DLP.to_owned(),
            source: std::io::ErrorKind::NotFound.into(),
        }))
    }

    /// Use the program without checking it
    pub fn with_program(program: String, settings: ResolverSettings, policy: FetchPolicy) -> Self {
        Self {
            program,
            settings,
            policy,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The original youtube-dl lacks the yt-dlp only options
    fn is_youtube_dl(&self) -> bool {
        Path::new(&self.program)
            .file_stem()
            .is_some_and(|name| name == YT_DL)
    }

    /// Options shared by every invocation
    fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--no-warnings".into(), "--no-check-certificates".into()];

        if let Some(cookies) = &self.settings.cookies {
            args.push("--cookies".into());
            args.push(cookies.into());
        }
        if let Some(user_agent) = &self.settings.user_agent {
            args.push("--user-agent".into());
            args.push(user_agent.into());
        }
        args
    }

    fn resolve_args(&self, url: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--dump-single-json".into(),
            "--no-playlist".into(),
            "-f".into(),
            PREFERRED_FORMAT.into(),
        ];
        args.extend(self.common_args());
        args.push("--".into());
        args.push(url.into());
        args
    }

    fn download_args(&self, url: &str, target: &FetchTarget, path: &Path) -> Vec<OsString> {
        let policy = &self.policy;
        let mut args: Vec<OsString> = vec![
            "--newline".into(),
            "--no-playlist".into(),
            // Or else fails when file already exists, even an empty one
            "--no-continue".into(),
            "-f".into(),
            target.selector().into(),
            "-o".into(),
            path.into(),
            "--retries".into(),
            policy.retries.to_string().into(),
            "--limit-rate".into(),
            (&policy.limit_rate).into(),
            "--buffer-size".into(),
            (&policy.buffer_size).into(),
            "--max-downloads".into(),
            "1".into(),
        ];
        if !self.is_youtube_dl() {
            args.push("--concurrent-fragments".into());
            args.push(policy.concurrent_fragments.to_string().into());
        }
        args.extend(self.common_args());
        args.push("--".into());
        args.push(url.into());
        args
    }

    /// Run the program and check if it failed saying the stream is unavailable.
    /// In that case, return [`ResolveError::Unavailable`].
    ///
    /// In other cases, return the output handle.
    async fn run_check_availability(
        &self,
        args: Vec<OsString>,
        timeout: Duration,
    ) -> Result<CommandOutput, ResolveError> {
        let res = run_command(
            &self.program,
            |cmd| cmd.args(args),
            Capture::STDOUT | Capture::STDERR,
            timeout,
            |_| {},
        )
        .await
        .map_err(ResolveError::Process)?;

        if !res.success() && is_unavailable(&res.stderr) {
            return Err(ResolveError::Unavailable { stderr: res.stderr });
        }

        into_success(&self.program, res).map_err(ResolveError::Process)
    }
}

#[async_trait]
impl StreamDownloader for Ytdl {
    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError> {
        let res = self
            .run_check_availability(self.resolve_args(url), self.settings.timeout())
            .await?;

        let resolved = parse_resolved(&res.stdout)?;
        debug!(
            "Resolved '{}' ({}) with {} variant(s)",
            resolved.metadata.title,
            resolved.metadata.id,
            resolved.variants.len()
        );
        for variant in &resolved.variants {
            trace!(
                "Variant {} ({}): format {}, ~{} bytes",
                variant.quality,
                variant.ext,
                variant.format_id,
                variant.approx_size_bytes
            );
        }
        Ok(resolved)
    }

    async fn download(
        &self,
        url: &str,
        target: &FetchTarget,
        path: &Path,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), FetchError> {
        info!("Downloading format '{}' of {url}", target.selector());

        let res = run_command(
            &self.program,
            |cmd| cmd.args(self.download_args(url, target, path)),
            Capture::STDERR,
            self.policy.timeout(),
            |line| {
                if let Some(percent) = parse_download_progress(line) {
                    on_progress(percent);
                }
            },
        )
        .await
        .map_err(FetchError::Process)?;
        if res.status.code() != Some(MAX_DOWNLOADS_REACHED) {
            into_success(&self.program, res).map_err(FetchError::Process)?;
        }

        if !path.is_file() {
            return Err(FetchError::MissingOutput {
                path: PathBuf::from(path),
            });
        }
        Ok(())
    }
}

/// The parts of the resolver JSON dump we care about
#[derive(Debug, Deserialize)]
struct RawInfo {
    id: String,
    title: String,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

/// Parse the output of a `--dump-single-json` invocation
fn parse_resolved(stdout: &str) -> Result<ResolvedVideo, ResolveError> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Err(ResolveError::NoOutput);
    }

    let raw: RawInfo = serde_json::from_str(stdout).map_err(ResolveError::Unparsable)?;

    Ok(ResolvedVideo {
        variants: select_variants(&raw.formats),
        formats: raw.formats.iter().map(FormatDescriptor::from_raw).collect(),
        metadata: VideoMetadata {
            id: raw.id,
            title: raw.title,
            uploader: raw.uploader.or(raw.channel).unwrap_or_default(),
            duration: raw.duration,
            thumbnail: raw.thumbnail,
        },
    })
}

fn is_unavailable(stderr: &str) -> bool {
    stderr
        .lines()
        .any(|line| line.starts_with("ERROR:") && line.to_lowercase().contains("unavailable"))
}
