mod extension;
mod metadata;
mod variant;

pub use extension::{Extension, RESOLVER_LEFTOVERS};
pub use metadata::{ResolvedVideo, VideoMetadata};
pub use variant::{select_variants, FormatDescriptor, RawFormat, StreamVariant};
