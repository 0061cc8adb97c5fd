use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, Sse},
        Response,
    },
    Json,
};
use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use url::Url;

use super::{error::ApiError, AppState};
use crate::{
    database::{HistoryLog, HistoryRecord, NewHistoryEntry, HISTORY_LIMIT},
    delivery,
    job::DownloadJob,
    pipeline::Prepared,
    result::PipelineError,
    types::{StreamVariant, VideoMetadata},
};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct UrlParams {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadParams {
    pub url: Option<String>,
    pub format_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub author: String,
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatInfo {
    pub quality: String,
    pub format_id: String,
    /// Padded size in MiB
    pub filesize: f64,
    /// Same as `format_id`, kept for older clients
    pub itag: String,
}

impl From<&StreamVariant> for FormatInfo {
    fn from(variant: &StreamVariant) -> Self {
        Self {
            quality: variant.quality.clone(),
            format_id: variant.format_id.clone(),
            filesize: variant.filesize_mb,
            itag: variant.format_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleInfo {
    pub channel: String,
    pub title: String,
    pub video_id: String,
}

/// Accept only absolute `http` and `https` URLs
pub fn validate_url(url: Option<&str>) -> ApiResult<String> {
    let url = url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing URL"))?;

    let parsed = Url::parse(url)
        .map_err(|err| ApiError::bad_request("Invalid URL").with_details(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::bad_request("Invalid URL")
            .with_details(format!("Unsupported scheme '{}'", parsed.scheme())));
    }

    Ok(url.to_owned())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn video_info(
    State(state): State<AppState>,
    Query(params): Query<UrlParams>,
) -> ApiResult<Json<VideoInfo>> {
    let url = validate_url(params.url.as_deref())?;
    let resolved = state.pipeline.resolve(&url).await?;
    info!("Video info fetched: {}", resolved.metadata.title);

    let VideoMetadata {
        id,
        title,
        uploader,
        duration,
        thumbnail,
    } = resolved.metadata;

    Ok(Json(VideoInfo {
        id,
        title,
        thumbnail,
        duration,
        author: uploader,
        formats: resolved.variants.iter().map(FormatInfo::from).collect(),
    }))
}

pub async fn get_title(
    State(state): State<AppState>,
    Json(params): Json<UrlParams>,
) -> ApiResult<Json<TitleInfo>> {
    let url = validate_url(params.url.as_deref())?;
    let metadata = state.pipeline.resolve(&url).await?.metadata;

    Ok(Json(TitleInfo {
        channel: metadata.uploader,
        title: metadata.title,
        video_id: metadata.id,
    }))
}

pub async fn download_get(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    download(&state, params).await
}

pub async fn download_post(
    State(state): State<AppState>,
    Json(params): Json<DownloadParams>,
) -> ApiResult<Response> {
    download(&state, params).await
}

/// Run the whole pipeline, then stream the result.
///
/// The job is dropped with this future if the client goes away first,
/// killing the running tools and deleting the temporary files.
async fn download(state: &AppState, params: DownloadParams) -> ApiResult<Response> {
    let url = validate_url(params.url.as_deref())?;
    let format_id = params.format_id.filter(|id| !id.trim().is_empty());

    let mut job = DownloadJob::new(&state.settings.temp_dir, url, format_id);
    let prepared = state.pipeline.prepare(&mut job).await?;
    record_history(state, &job, &prepared).await;

    delivery::into_response(job, &prepared)
        .await
        .map_err(|err| ApiError::from(PipelineError::from(err)))
}

async fn record_history(state: &AppState, job: &DownloadJob, prepared: &Prepared) {
    let Some(history) = state.history.clone() else {
        return;
    };

    let entry = NewHistoryEntry {
        url: job.url().to_owned(),
        video_id: prepared.metadata.id.clone(),
        title: prepared.metadata.title.clone(),
        author: prepared.metadata.uploader.clone(),
        format_id: job.format_id().map(str::to_owned),
    };

    match tokio::task::spawn_blocking(move || history.append(&entry)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!("Could not record the download in the history: {err:?}"),
        Err(err) => warn!("History task failed: {err}"),
    }
}

pub async fn history(State(state): State<AppState>) -> ApiResult<Json<Vec<HistoryRecord>>> {
    let Some(history) = state.history.clone() else {
        return Ok(Json(Vec::new()));
    };

    recent_history(history)
        .await
        .map(Json)
        .map_err(|err| {
            warn!("Could not read the history: {err}");
            ApiError::internal("History fetch failed")
        })
}

async fn recent_history(history: Arc<dyn HistoryLog>) -> miette::Result<Vec<HistoryRecord>> {
    tokio::task::spawn_blocking(move || history.recent(HISTORY_LIMIT))
        .await
        .map_err(|err| miette::miette!("History task failed: {err}"))?
}

/// Push the last known progress of the video at every tick, until the client leaves
pub async fn progress(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let watch = state.pipeline.progress().watch(&video_id);
    let mut ticker = tokio::time::interval(state.progress_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let events = stream::unfold((watch, ticker), |(watch, mut ticker)| async move {
        ticker.tick().await;
        let event = Event::default().data(watch.current().to_string());
        Some((Ok(event), (watch, ticker)))
    });

    Sse::new(events)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use futures::StreamExt;

    use super::*;
    use crate::{
        config::Settings,
        database::Sqlite,
        job::ProgressRegistry,
        pipeline::{
            tests::{fake_resolved, FakeDownloader, FakeTransformer},
            Pipeline,
        },
        types::{select_variants, RawFormat},
    };

    const MIB: f64 = 1024.0 * 1024.0;

    fn state(dir: &std::path::Path, downloader: FakeDownloader) -> AppState {
        shared_state(dir, Arc::new(downloader))
    }

    fn shared_state(dir: &std::path::Path, downloader: Arc<FakeDownloader>) -> AppState {
        let settings = Settings {
            temp_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let pipeline = Pipeline::new(
            downloader,
            Arc::new(FakeTransformer::default()),
            ProgressRegistry::new(),
        );
        AppState::new(pipeline, settings, Some(Arc::new(Sqlite::in_memory().unwrap())))
            .with_progress_interval(Duration::from_millis(10))
    }

    fn download_params(format_id: Option<&str>) -> DownloadParams {
        DownloadParams {
            url: Some("https://example.com/watch?v=abc123".to_owned()),
            format_id: format_id.map(str::to_owned),
        }
    }

    async fn error_json(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn is_empty(dir: &std::path::Path) -> bool {
        dir.read_dir().unwrap().next().is_none()
    }

    #[test]
    fn only_web_urls_are_accepted() {
        assert!(validate_url(Some(" https://example.com/v ")).is_ok());
        assert!(validate_url(Some("http://example.com")).is_ok());

        for url in [None, Some(""), Some("not a url"), Some("file:///etc/passwd")] {
            let err = validate_url(url).unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{url:?}");
        }
    }

    #[tokio::test]
    async fn video_info_lists_one_format_per_quality() {
        let dir = tempfile::tempdir().unwrap();
        let raw = |id: &str, height, mb: f64| RawFormat {
            format_id: id.to_owned(),
            ext: Some("mp4".to_owned()),
            height: Some(height),
            filesize_approx: Some(mb * MIB),
            ..Default::default()
        };
        let formats = [raw("136", 720, 50.0), raw("247", 720, 48.0), raw("135", 480, 20.0)];
        let mut resolved = fake_resolved();
        resolved.variants = select_variants(&formats);
        let downloader = FakeDownloader {
            resolved: Some(resolved),
            ..Default::default()
        };

        let Json(info) = video_info(
            State(state(dir.path(), downloader)),
            Query(UrlParams {
                url: Some("https://example.com/watch?v=abc123".to_owned()),
            }),
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "abc123");
        assert_eq!(json["author"], "Someone");
        let formats = json["formats"].as_array().unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0]["quality"], "720p");
        assert_eq!(formats[0]["formatId"], "136");
        assert_eq!(formats[0]["itag"], "136");
        assert_eq!(formats[0]["filesize"], 52.0);
        assert_eq!(formats[1]["quality"], "480p");
        assert_eq!(formats[1]["filesize"], 22.0);
        assert!(is_empty(dir.path()));
    }

    #[tokio::test]
    async fn failed_resolve_is_a_json_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FakeDownloader {
            fail_resolve: true,
            ..Default::default()
        };

        let err = video_info(
            State(state(dir.path(), downloader)),
            Query(UrlParams {
                url: Some("https://example.com/watch?v=abc123".to_owned()),
            }),
        )
        .await
        .unwrap_err();

        let (status, json) = error_json(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Video fetch failed");
        assert_eq!(json["details"], "ERROR: yt-dlp broke");
        assert!(is_empty(dir.path()));
    }

    #[tokio::test]
    async fn get_title_returns_channel_and_id() {
        let dir = tempfile::tempdir().unwrap();

        let Json(title) = get_title(
            State(state(dir.path(), FakeDownloader::default())),
            Json(UrlParams {
                url: Some("https://example.com/watch?v=abc123".to_owned()),
            }),
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&title).unwrap();
        assert_eq!(json["channel"], "Someone");
        assert_eq!(json["title"], "A video: part 1/2");
        assert_eq!(json["videoId"], "abc123");
    }

    #[tokio::test]
    async fn separate_streams_are_merged_streamed_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), FakeDownloader::default());

        let response = download_get(State(state.clone()), Query(download_params(Some("136"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "video/mp4");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"136bestaudio[ext=m4a]/bestaudio");
        assert!(is_empty(dir.path()));

        let Json(history) = history(State(state)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].video_id, "abc123");
        assert_eq!(history[0].format_id.as_deref(), Some("136"));
    }

    #[tokio::test]
    async fn failed_download_is_never_a_partial_stream() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FakeDownloader {
            failing: HashSet::from(["136".to_owned()]),
            ..Default::default()
        };
        let state = state(dir.path(), downloader);

        let err = download_post(State(state.clone()), Json(download_params(Some("136"))))
            .await
            .unwrap_err();

        let (status, json) = error_json(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Download failed");
        assert!(is_empty(dir.path()));

        let Json(history) = history(State(state)).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn disconnect_before_streaming_deletes_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FakeDownloader {
            hanging: HashSet::from(["best[ext=mp4]/best".to_owned()]),
            ..Default::default()
        };
        let state = state(dir.path(), downloader);

        let mut request = Box::pin(download_get(
            State(state.clone()),
            Query(download_params(None)),
        ));
        assert!(futures::poll!(&mut request).is_pending());
        assert_eq!(dir.path().read_dir().unwrap().count(), 1);

        drop(request);
        assert!(is_empty(dir.path()));
        assert_eq!(state.pipeline.progress().current("abc123"), 0);

        let Json(history) = history(State(state)).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn invalid_url_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::default());
        let state = shared_state(dir.path(), downloader.clone());

        let err = download_get(
            State(state),
            Query(DownloadParams {
                url: Some("ftp://example.com/v".to_owned()),
                format_id: None,
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(downloader.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_empty_without_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state(dir.path(), FakeDownloader::default());
        state.history = None;

        let Json(history) = history(State(state)).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn progress_stream_ticks_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), FakeDownloader::default());
        let registry = state.pipeline.progress().clone();
        let handle = registry.register("abc123");
        handle.set(42);

        let sse = progress(State(state), Path("abc123".to_owned())).await;
        let mut body = sse.into_response().into_body().into_data_stream();
        assert_eq!(registry.watchers(), 1);

        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"data: 42\n\n");
        drop(handle);
        let second = body.next().await.unwrap().unwrap();
        assert_eq!(&second[..], b"data: 0\n\n");

        drop(body);
        assert_eq!(registry.watchers(), 0);
    }
}
