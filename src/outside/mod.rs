mod command;
mod ffmpeg;
mod ytdl;

pub use ffmpeg::{Ffmpeg, StreamTransformer};
pub use ytdl::{FetchTarget, StreamDownloader, Ytdl};

/// Callback receiving the completion percentage (0 to 100) of a running tool
pub type ProgressFn<'a> = dyn Fn(f64) + Send + Sync + 'a;
