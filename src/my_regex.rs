use std::sync::OnceLock;

use regex::Regex;

/// Download progress printed by the resolver with `--newline`.
/// Example: "[download]  42.3% of ~ 12.34MiB at  1.21MiB/s ETA 00:08"
const DOWNLOAD_PROGRESS: &str = r#"^\[download\]\s+(?P<percent>\d+(?:\.\d+)?)%"#;

/// Muxer progress printed with `-progress pipe:1`, in microseconds.
/// Example: "out_time_us=12345678"
const MUX_PROGRESS: &str = r#"^out_time_(?:us|ms)=(?P<us>\d+)$"#;

/// Temporary files created by download jobs: a 32 hex digits token,
/// the ".mp4" extension, an optional stream suffix and resolver leftovers.
const TEMP_FILE_NAME: &str = r#"^[0-9a-f]{32}\.mp4(?:\.video|\.audio)?(?:\.part|\.ytdl)?$"#;

static DOWNLOAD_PROGRESS_RE: OnceLock<Regex> = OnceLock::new();
static MUX_PROGRESS_RE: OnceLock<Regex> = OnceLock::new();
static TEMP_FILE_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn get(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hardcoded regex is valid"))
}

/// Extract the percentage of a resolver download progress line
pub fn parse_download_progress(line: &str) -> Option<f64> {
    get(&DOWNLOAD_PROGRESS_RE, DOWNLOAD_PROGRESS)
        .captures(line.trim())?
        .name("percent")?
        .as_str()
        .parse()
        .ok()
}

/// Extract the encoded position, in seconds, of a muxer progress line
pub fn parse_mux_progress(line: &str) -> Option<f64> {
    let us: u64 = get(&MUX_PROGRESS_RE, MUX_PROGRESS)
        .captures(line.trim())?
        .name("us")?
        .as_str()
        .parse()
        .ok()?;
    Some(us as f64 / 1_000_000.0)
}

/// Whether a file name looks like a download job temporary file
pub fn is_temp_file_name(name: &str) -> bool {
    get(&TEMP_FILE_NAME_RE, TEMP_FILE_NAME).is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_progress_lines() {
        assert_eq!(
            parse_download_progress("[download]  42.3% of ~ 12.34MiB at  1.21MiB/s ETA 00:08"),
            Some(42.3)
        );
        assert_eq!(
            parse_download_progress("[download] 100% of 3.00MiB in 00:02"),
            Some(100.0)
        );
        assert_eq!(
            parse_download_progress("[download] Destination: /tmp/a.mp4"),
            None
        );
        assert_eq!(parse_download_progress("[youtube] abc: Downloading"), None);
    }

    #[test]
    fn mux_progress_lines() {
        assert_eq!(parse_mux_progress("out_time_us=2500000"), Some(2.5));
        assert_eq!(parse_mux_progress("out_time=00:00:02.500000"), None);
        assert_eq!(parse_mux_progress("progress=continue"), None);
    }

    #[test]
    fn temp_file_names() {
        let token = "0123456789abcdef0123456789abcdef";
        assert!(is_temp_file_name(&format!("{token}.mp4")));
        assert!(is_temp_file_name(&format!("{token}.mp4.video")));
        assert!(is_temp_file_name(&format!("{token}.mp4.audio.part")));
        assert!(!is_temp_file_name(&format!("{token}.mkv")));
        assert!(!is_temp_file_name("my holiday video.mp4"));
        assert!(!is_temp_file_name(&format!("{token}.mp4.video.bak")));
    }
}
