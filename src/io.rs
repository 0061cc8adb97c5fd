use std::{io::ErrorKind, path::Path};

use tracing::{debug, warn};

use crate::my_regex::is_temp_file_name;

/// Number of random bytes in a download token
const TOKEN_BYTES: usize = 16;

/// Random hexadecimal token used to name the temporary files of a job
pub fn random_token() -> String {
    let mut token = String::with_capacity(TOKEN_BYTES * 2);
    for _ in 0..TOKEN_BYTES {
        token.push_str(&format!("{:02x}", fastrand::u8(..)));
    }
    token
}

/// Delete a file, ignoring it if it does not exist.
///
/// Return whether a file was actually deleted.
/// Other errors are logged and swallowed, cleanup must never fail a request.
pub fn remove_if_exists(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted temporary file {}", path.display());
            true
        }
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            warn!("Could not delete temporary file {}: {err}", path.display());
            false
        }
    }
}

/// Delete the job temporary files left in the directory by a previous run.
///
/// Only files whose name matches the job naming scheme are touched.
/// Return the number of deleted files.
pub fn sweep_stale_files(dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in dir.read_dir()? {
        let entry = entry?;
        let is_stale = entry.file_type()?.is_file()
            && entry.file_name().to_str().is_some_and(is_temp_file_name);

        if is_stale && remove_if_exists(&entry.path()) {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_random_hex() {
        let a = random_token();
        let b = random_token();

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn removing_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");

        assert!(!remove_if_exists(&path));

        std::fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path));
        assert!(!path.exists());
    }

    #[test]
    fn sweep_only_touches_job_files() {
        let dir = tempfile::tempdir().unwrap();
        let token = random_token();
        let stale = [
            format!("{token}.mp4"),
            format!("{token}.mp4.video.part"),
            format!("{token}.mp4.audio"),
        ];
        for name in &stale {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(dir.path().join("keep.mp4"), b"x").unwrap();

        assert_eq!(sweep_stale_files(dir.path()).unwrap(), 3);
        assert!(dir.path().join("keep.mp4").exists());
        assert_eq!(dir.path().read_dir().unwrap().count(), 1);
    }
}
