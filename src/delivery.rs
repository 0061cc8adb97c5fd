//! Streaming of a finished file back to the client.

use std::{
    io,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::{
    job::{DownloadJob, JobState},
    pipeline::Prepared,
    result::DeliveryError,
};

/// Size of the chunks read from the finished file
const READ_BUFFER: usize = 2 * 1024 * 1024;

/// Open the finished file of the job and build the response streaming it.
///
/// The job moves into the body, so its files live exactly as long as the
/// response body. Headers are only built once the file is known to exist.
pub async fn into_response(
    mut job: DownloadJob,
    prepared: &Prepared,
) -> Result<Response, DeliveryError> {
    let (file, size) = match open(&prepared.path).await {
        Ok(opened) => opened,
        Err(err) => {
            job.fail(&err);
            return Err(err);
        }
    };

    job.advance(JobState::Streaming);
    info!(
        "Job {}: streaming {size} bytes of '{}'",
        job.token(),
        prepared.metadata.title
    );

    let stream = JobStream {
        inner: ReaderStream::with_capacity(file, READ_BUFFER),
        job: Some(job),
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&prepared.metadata.title)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Ok(response)
}

async fn open(path: &Path) -> Result<(File, u64), DeliveryError> {
    let missing = |source| DeliveryError::MissingFile {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).await.map_err(missing)?;
    let size = file.metadata().await.map_err(missing)?.len();
    Ok((file, size))
}

/// `attachment` disposition, the title percent-encoded as a file name
fn content_disposition(title: &str) -> String {
    format!(
        "attachment; filename=\"{}.mp4\"",
        urlencoding::encode(title)
    )
}

/// Body stream owning the job until the last byte is sent
struct JobStream {
    inner: ReaderStream<File>,
    job: Option<DownloadJob>,
}

impl Stream for JobStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);

        match &polled {
            Poll::Ready(None) => {
                if let Some(mut job) = this.job.take() {
                    job.advance(JobState::Done);
                    info!("Job {}: delivered", job.token());
                }
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some(mut job) = this.job.take() {
                    warn!("Job {}: could not read the finished file", job.token());
                    job.fail(err);
                }
            }
            _ => {}
        }
        polled
    }
}

impl Drop for JobStream {
    fn drop(&mut self) {
        if let Some(job) = self.job.as_mut() {
            job.fail(&DeliveryError::Disconnected);
        }
    }
}
