use std::collections::HashSet;

use serde::Deserialize;

/// Padding added to every reported size, in MiB.
/// Accounts for the container and muxing overhead of the final file.
pub const SIZE_PADDING_MB: f64 = 2.0;

/// Legacy format token of the 360p combined MP4 stream
pub const LEGACY_COMBINED_FORMAT: &str = "18";

const MIB: f64 = 1024.0 * 1024.0;

/// A format entry as dumped by the resolver
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

impl RawFormat {
    /// Missing and zero heights or sizes both count as unknown
    fn is_listed(&self) -> bool {
        let is_mp4 = self.ext.as_deref() == Some("mp4");
        let known = |size: Option<f64>| size.is_some_and(|s| s > 0.0);

        (is_mp4 && self.height.is_some_and(|h| h > 0) && known(self.filesize_approx))
            || (self.format_id == LEGACY_COMBINED_FORMAT && known(self.filesize))
    }

    fn raw_size(&self) -> f64 {
        self.filesize.or(self.filesize_approx).unwrap_or(0.0)
    }
}

/// An encoded quality a client can ask for
#[derive(Debug, Clone, PartialEq)]
pub struct StreamVariant {
    pub quality: String,
    pub height: u32,
    pub format_id: String,
    pub ext: String,
    pub approx_size_bytes: u64,
    /// Padded size in MiB, rounded to two decimals
    pub filesize_mb: f64,
}

impl StreamVariant {
    fn from_raw(raw: &RawFormat) -> Option<Self> {
        let height = raw.height?;
        let size = raw.raw_size();

        Some(Self {
            quality: format!("{height}p"),
            height,
            format_id: raw.format_id.clone(),
            ext: raw.ext.clone().unwrap_or_else(|| "mp4".to_owned()),
            approx_size_bytes: size.max(0.0) as u64,
            filesize_mb: padded_size_mb(size),
        })
    }
}

/// Which tracks a format carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub has_video: bool,
    pub has_audio: bool,
}

impl FormatDescriptor {
    /// A codec of "none" means the track is absent.
    /// An unreported audio codec is considered absent so the audio gets fetched separately.
    pub fn from_raw(raw: &RawFormat) -> Self {
        let present = |codec: &Option<String>| codec.as_deref().map(|c| c != "none");

        Self {
            format_id: raw.format_id.clone(),
            has_video: present(&raw.vcodec).unwrap_or(raw.height.is_some()),
            has_audio: present(&raw.acodec).unwrap_or(false),
        }
    }

    pub fn is_combined(&self) -> bool {
        self.has_video && self.has_audio
    }
}

/// Size in MiB plus the fixed padding, rounded to two decimals
pub fn padded_size_mb(bytes: f64) -> f64 {
    let mb = bytes / MIB + SIZE_PADDING_MB;
    (mb * 100.0).round() / 100.0
}

/// Keep the listable formats, one per quality label, highest quality first.
///
/// The sort is stable so when several formats share a label,
/// the first one reported by the resolver is kept.
pub fn select_variants(formats: &[RawFormat]) -> Vec<StreamVariant> {
    let mut variants: Vec<StreamVariant> = formats
        .iter()
        .filter(|f| f.is_listed())
        .filter_map(StreamVariant::from_raw)
        .collect();

    variants.sort_by(|a, b| b.height.cmp(&a.height));

    let mut seen = HashSet::new();
    variants.retain(|v| seen.insert(v.quality.clone()));
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4(id: &str, height: u32, approx_mb: f64) -> RawFormat {
        RawFormat {
            format_id: id.to_owned(),
            ext: Some("mp4".to_owned()),
            height: Some(height),
            filesize_approx: Some(approx_mb * MIB),
            vcodec: Some("avc1".to_owned()),
            acodec: Some("none".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn one_variant_per_quality_first_match_wins() {
        let formats = [
            mp4("136", 720, 50.0),
            mp4("398", 720, 48.0),
            mp4("135", 480, 20.0),
        ];

        let variants = select_variants(&formats);

        let labels: Vec<_> = variants.iter().map(|v| v.quality.as_str()).collect();
        assert_eq!(labels, ["720p", "480p"]);
        assert_eq!(variants[0].format_id, "136");
        assert_eq!(variants[0].filesize_mb, 52.0);
        assert_eq!(variants[1].filesize_mb, 22.0);
    }

    #[test]
    fn variants_are_sorted_by_descending_height() {
        let formats = [
            mp4("160", 144, 1.0),
            mp4("137", 1080, 90.0),
            mp4("135", 480, 20.0),
            mp4("136", 720, 50.0),
        ];

        let heights: Vec<_> = select_variants(&formats).iter().map(|v| v.height).collect();
        assert_eq!(heights, [1080, 720, 480, 144]);
    }

    #[test]
    fn unlisted_formats_are_filtered_out() {
        let webm = RawFormat {
            ext: Some("webm".to_owned()),
            ..mp4("248", 1080, 80.0)
        };
        let no_size = RawFormat {
            filesize_approx: None,
            ..mp4("137", 1080, 0.0)
        };
        let legacy = RawFormat {
            format_id: "18".to_owned(),
            ext: Some("mp4".to_owned()),
            height: Some(360),
            filesize: Some(10.0 * MIB),
            ..Default::default()
        };

        let variants = select_variants(&[webm, no_size, legacy]);

        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].format_id, "18");
        assert_eq!(variants[0].filesize_mb, 12.0);
    }

    #[test]
    fn zero_heights_and_sizes_are_unknown() {
        let zero_size = mp4("136", 720, 0.0);
        let zero_height = mp4("135", 0, 20.0);
        let legacy_zero = RawFormat {
            format_id: "18".to_owned(),
            height: Some(360),
            filesize: Some(0.0),
            ..Default::default()
        };

        assert!(select_variants(&[zero_size, zero_height, legacy_zero]).is_empty());
    }

    #[test]
    fn sizes_are_padded_and_rounded() {
        assert_eq!(padded_size_mb(0.0), 2.0);
        assert_eq!(padded_size_mb(1_234_567.0), 3.18);
    }

    #[test]
    fn combined_formats_carry_both_tracks() {
        let video_only = FormatDescriptor::from_raw(&mp4("136", 720, 1.0));
        assert!(!video_only.is_combined());

        let combined = FormatDescriptor::from_raw(&RawFormat {
            acodec: Some("mp4a.40.2".to_owned()),
            ..mp4("18", 360, 1.0)
        });
        assert!(combined.is_combined());

        let unknown = FormatDescriptor::from_raw(&RawFormat {
            format_id: "x".to_owned(),
            ..Default::default()
        });
        assert!(!unknown.has_video && !unknown.has_audio);
    }
}
