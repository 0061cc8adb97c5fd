//! The download-and-assemble pipeline: resolve a video, fetch its streams,
//! merge them when they come separately, and hand a finished file over.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use tracing::{debug, info};

use crate::{
    job::{DownloadJob, JobState, ProgressHandle, ProgressRegistry},
    outside::{FetchTarget, StreamDownloader, StreamTransformer},
    result::PipelineError,
    types::{Extension, ResolvedVideo, VideoMetadata},
};

/// Job progress reached once every combined stream is fetched
const COMBINED_FETCH_END: u8 = 95;
/// Job progress reached once both separate streams are fetched
const SEPARATE_FETCH_END: u8 = 85;
/// Job progress reached once the streams are merged
const ASSEMBLE_END: u8 = 99;

/// How the streams of a request are obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// A single stream already carrying video and audio
    Combined(FetchTarget),
    /// A video-only stream to merge with the best audio
    Separate { video: FetchTarget },
}

impl FetchPlan {
    /// Without a requested format, use the best combined stream.
    /// A format not known to carry audio gets the best audio merged in.
    pub fn for_request(resolved: &ResolvedVideo, format_id: Option<&str>) -> Self {
        match format_id {
            None => FetchPlan::Combined(FetchTarget::BestCombined),
            Some(id) if resolved.format(id).is_some_and(|f| f.is_combined()) => {
                FetchPlan::Combined(FetchTarget::Format(id.to_owned()))
            }
            Some(id) => FetchPlan::Separate {
                video: FetchTarget::Format(id.to_owned()),
            },
        }
    }
}

/// A finished file, ready to be streamed
#[derive(Debug)]
pub struct Prepared {
    pub metadata: VideoMetadata,
    pub path: PathBuf,
}

pub struct Pipeline {
    downloader: Arc<dyn StreamDownloader>,
    transformer: Arc<dyn StreamTransformer>,
    progress: ProgressRegistry,
}

impl Pipeline {
    pub fn new(
        downloader: Arc<dyn StreamDownloader>,
        transformer: Arc<dyn StreamTransformer>,
        progress: ProgressRegistry,
    ) -> Self {
        Self {
            downloader,
            transformer,
            progress,
        }
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    /// Resolve the metadata of a video without downloading anything
    pub async fn resolve(&self, url: &str) -> Result<ResolvedVideo, PipelineError> {
        Ok(self.downloader.resolve(url).await?)
    }

    /// Run the job until a single finished file exists on disk.
    ///
    /// On error the job is failed. Its temporary files are deleted when the
    /// job is dropped, which also happens if this future is dropped midway.
    pub async fn prepare(&self, job: &mut DownloadJob) -> Result<Prepared, PipelineError> {
        match self.run_stages(job).await {
            Ok(prepared) => Ok(prepared),
            Err(err) => {
                job.fail(&err);
                Err(err)
            }
        }
    }

    async fn run_stages(&self, job: &mut DownloadJob) -> Result<Prepared, PipelineError> {
        job.advance(JobState::Resolving);
        let resolved = self.downloader.resolve(job.url()).await?;
        let metadata = resolved.metadata.clone();
        info!(
            "Job {}: preparing '{}' ({})",
            job.token(),
            metadata.title,
            metadata.id
        );
        job.attach_progress(self.progress.register(&metadata.id));

        let plan = FetchPlan::for_request(&resolved, job.format_id());
        debug!("Job {}: {plan:?}", job.token());

        job.advance(JobState::Fetching);
        let path = match plan {
            FetchPlan::Combined(target) => self.fetch_combined(job, &target).await?,
            FetchPlan::Separate { video } => {
                let (video, audio) = self.fetch_separate(job, &video).await?;
                job.advance(JobState::Assembling);
                self.assemble(job, &video, &audio, metadata.duration).await?
            }
        };

        if let Some(progress) = job.progress() {
            progress.set(100);
        }

        Ok(Prepared { metadata, path })
    }

    async fn fetch_combined(
        &self,
        job: &mut DownloadJob,
        target: &FetchTarget,
    ) -> Result<PathBuf, PipelineError> {
        let output = job.files_mut().reserve(Extension::Mp4);
        let progress = job.progress();
        let on_progress = |pct: f64| {
            if let Some(progress) = progress {
                progress.set_scaled(pct, 0, COMBINED_FETCH_END);
            }
        };

        self.downloader
            .download(job.url(), target, &output, &on_progress)
            .await?;
        Ok(output)
    }

    /// Fetch the video and the best audio concurrently.
    /// Both must succeed, the first failure cancels the other download.
    async fn fetch_separate(
        &self,
        job: &mut DownloadJob,
        video: &FetchTarget,
    ) -> Result<(PathBuf, PathBuf), PipelineError> {
        let video_path = job.files_mut().reserve(Extension::Video);
        let audio_path = job.files_mut().reserve(Extension::Audio);

        let tracker = SeparateProgress::new(job.progress());
        let on_video = |pct: f64| tracker.video(pct);
        let on_audio = |pct: f64| tracker.audio(pct);

        tokio::try_join!(
            self.downloader
                .download(job.url(), video, &video_path, &on_video),
            self.downloader
                .download(job.url(), &FetchTarget::BestAudio, &audio_path, &on_audio),
        )?;

        Ok((video_path, audio_path))
    }

    /// Merge the separate streams, deleting them right after in every case
    async fn assemble(
        &self,
        job: &mut DownloadJob,
        video: &Path,
        audio: &Path,
        duration: Option<f64>,
    ) -> Result<PathBuf, PipelineError> {
        let output = job.files_mut().reserve(Extension::Mp4);
        let progress = job.progress();
        let on_progress = |pct: f64| {
            if let Some(progress) = progress {
                progress.set_scaled(pct, SEPARATE_FETCH_END, ASSEMBLE_END);
            }
        };

        let res = self
            .transformer
            .merge(video, audio, &output, duration, &on_progress)
            .await;

        job.files_mut().release(video);
        job.files_mut().release(audio);

        res?;
        Ok(output)
    }
}

/// Combined progress of two concurrent downloads, the video weighing
/// three times as much as the audio.
struct SeparateProgress<'a> {
    handle: Option<&'a ProgressHandle>,
    video: AtomicU8,
    audio: AtomicU8,
}

impl<'a> SeparateProgress<'a> {
    fn new(handle: Option<&'a ProgressHandle>) -> Self {
        Self {
            handle,
            video: AtomicU8::new(0),
            audio: AtomicU8::new(0),
        }
    }

    fn video(&self, pct: f64) {
        self.video.fetch_max(clamp_percent(pct), Ordering::Relaxed);
        self.publish();
    }

    fn audio(&self, pct: f64) {
        self.audio.fetch_max(clamp_percent(pct), Ordering::Relaxed);
        self.publish();
    }

    fn publish(&self) {
        if let Some(handle) = self.handle {
            let video = f64::from(self.video.load(Ordering::Relaxed));
            let audio = f64::from(self.audio.load(Ordering::Relaxed));
            handle.set_scaled((video * 3.0 + audio) / 4.0, 0, SEPARATE_FETCH_END);
        }
    }
}

fn clamp_percent(pct: f64) -> u8 {
    pct.clamp(0.0, 100.0) as u8
}
