use super::{FormatDescriptor, StreamVariant};

/// What the resolver knows about a remote video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub uploader: String,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
}

/// Everything a single resolver call returns
#[derive(Debug, Clone)]
pub struct ResolvedVideo {
    pub metadata: VideoMetadata,

    /// Deduplicated by quality label, sorted by descending height
    pub variants: Vec<StreamVariant>,

    /// Every raw format, used to know which tracks a format id carries
    pub formats: Vec<FormatDescriptor>,
}

impl ResolvedVideo {
    pub fn format(&self, format_id: &str) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| f.format_id == format_id)
    }
}
