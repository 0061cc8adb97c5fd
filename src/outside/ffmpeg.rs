use std::{
    ffi::OsString,
    fmt::Debug,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    command::{
        assert_success_command, into_success, run_command, Capture, FFMPEG, FFXXX_DEFAULT_ARGS,
        PROBE_TIMEOUT,
    },
    ProgressFn,
};
use crate::{
    config::MuxPolicy,
    my_regex::parse_mux_progress,
    result::{AssembleError, ToolError},
};

#[async_trait]
pub trait StreamTransformer: Send + Sync + Debug {
    /// Combine a video-only and an audio-only file into a single MP4 container.
    ///
    /// The video stream must be copied as-is, only the audio may be re-encoded.
    /// `duration`, in seconds, is used to report the progress when known.
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        duration: Option<f64>,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), AssembleError>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) program
#[derive(Debug)]
pub struct Ffmpeg {
    policy: MuxPolicy,
}

impl Ffmpeg {
    /// Verify that the `ffmpeg` binary is reachable
    pub async fn new(policy: MuxPolicy) -> Result<Self, ToolError> {
        let res = assert_success_command(FFMPEG, |cmd| cmd.arg("-version"), PROBE_TIMEOUT).await?;
        info!(
            "Found {}",
            res.stdout.lines().next().unwrap_or(FFMPEG).trim()
        );

        Ok(Self { policy })
    }

    fn merge_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let policy = &self.policy;
        let mut args: Vec<OsString> = FFXXX_DEFAULT_ARGS.iter().map(OsString::from).collect();
        let merge: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            video.into(),
            "-i".into(),
            audio.into(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            (&policy.audio_bitrate).into(),
            "-preset".into(),
            (&policy.preset).into(),
            // moov atom first, for progressive playback
            "-movflags".into(),
            "+faststart".into(),
            "-bufsize".into(),
            (&policy.bufsize).into(),
            "-maxrate".into(),
            (&policy.maxrate).into(),
            "-threads".into(),
            policy.threads.to_string().into(),
            "-progress".into(),
            "pipe:1".into(),
            "-nostats".into(),
            output.into(),
        ];
        args.extend(merge);
        args
    }
}

#[async_trait]
impl StreamTransformer for Ffmpeg {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        duration: Option<f64>,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), AssembleError> {
        debug!("Merging {} and {}", video.display(), audio.display());

        let res = run_command(
            FFMPEG,
            |cmd| cmd.args(self.merge_args(video, audio, output)),
            Capture::STDERR,
            self.policy.timeout(),
            |line| {
                if let (Some(position), Some(duration)) = (parse_mux_progress(line), duration) {
                    if duration > 0.0 {
                        on_progress(position / duration * 100.0);
                    }
                }
            },
        )
        .await
        .map_err(AssembleError::Process)?;
        into_success(FFMPEG, res).map_err(AssembleError::Process)?;

        if !output.is_file() {
            return Err(AssembleError::MissingOutput {
                path: PathBuf::from(output),
            });
        }
        on_progress(100.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_copies_video_and_encodes_audio() {
        let ffmpeg = Ffmpeg {
            policy: MuxPolicy::default(),
        };
        let args: Vec<String> = ffmpeg
            .merge_args(
                Path::new("/tmp/x.mp4.video"),
                Path::new("/tmp/x.mp4.audio"),
                Path::new("/tmp/x.mp4"),
            )
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();

        for pair in [
            ["-c:v", "copy"],
            ["-c:a", "aac"],
            ["-b:a", "256k"],
            ["-movflags", "+faststart"],
            ["-threads", "4"],
            ["-maxrate", "32M"],
        ] {
            assert!(args.windows(2).any(|w| w == pair), "missing {pair:?}");
        }
        assert_eq!(&args[..3], FFXXX_DEFAULT_ARGS);
        assert_eq!(args.last().unwrap(), "/tmp/x.mp4");
    }
}
