/// Suffixes of the temporary files a download job can create.
///
/// The merged (or directly fetched) file uses the `.mp4` extension,
/// the separately fetched streams append `.video` or `.audio` to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Mp4,
    Video,
    Audio,
}

impl Extension {
    /// Return the extension with the leading dot.
    /// e.g. ".ext"
    pub fn with_dot(self) -> &'static str {
        match self {
            Extension::Mp4 => ".mp4",
            Extension::Video => ".video",
            Extension::Audio => ".audio",
        }
    }
}

/// Files the resolver may leave next to an interrupted download
pub const RESOLVER_LEFTOVERS: [&str; 2] = [".part", ".ytdl"];
