use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::{
    io::remove_if_exists,
    types::{Extension, RESOLVER_LEFTOVERS},
};

/// Scoped owner of the temporary files of a download job.
///
/// Every reserved path, along with the leftovers the resolver may create next
/// to it, is deleted when the guard is dropped. Files are never created here,
/// the external tools create them at the reserved paths.
#[derive(Debug)]
pub struct TempFiles {
    base: PathBuf,
    reserved: Vec<PathBuf>,
}

impl TempFiles {
    /// The base path is `<dir>/<token>.mp4`
    pub fn new(dir: &Path, token: &str) -> Self {
        Self {
            base: dir.join(format!("{token}{}", Extension::Mp4.with_dot())),
            reserved: Vec::new(),
        }
    }

    /// Return the path of the file with the given extension,
    /// registering it for deletion.
    pub fn reserve(&mut self, ext: Extension) -> PathBuf {
        let path = match ext {
            Extension::Mp4 => self.base.clone(),
            ext => with_suffix(&self.base, ext.with_dot()),
        };

        if !self.reserved.contains(&path) {
            self.reserved.push(path.clone());
        }
        path
    }

    /// Delete a reserved file now instead of waiting for the guard to drop
    pub fn release(&mut self, path: &Path) {
        remove_with_leftovers(path);
        self.reserved.retain(|p| p != path);
    }

    /// The paths currently owned by the guard
    pub fn reserved(&self) -> &[PathBuf] {
        &self.reserved
    }

    fn cleanup(&mut self) {
        for path in self.reserved.drain(..) {
            remove_with_leftovers(&path);
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_with_leftovers(path: &Path) {
    remove_if_exists(path);
    for leftover in RESOLVER_LEFTOVERS {
        remove_if_exists(&with_suffix(path, leftover));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_paths_follow_the_naming_scheme() {
        let mut files = TempFiles::new(Path::new("/tmp/dl"), "abc");

        assert_eq!(files.reserve(Extension::Mp4), PathBuf::from("/tmp/dl/abc.mp4"));
        assert_eq!(
            files.reserve(Extension::Video),
            PathBuf::from("/tmp/dl/abc.mp4.video")
        );
        assert_eq!(
            files.reserve(Extension::Audio),
            PathBuf::from("/tmp/dl/abc.mp4.audio")
        );
        files.reserve(Extension::Audio);
        assert_eq!(files.reserved().len(), 3);

        // Nothing exists on disk, dropping must not complain
        drop(files);
    }

    #[test]
    fn drop_deletes_files_and_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = TempFiles::new(dir.path(), "0123");

        let video = files.reserve(Extension::Video);
        let output = files.reserve(Extension::Mp4);
        std::fs::write(&video, b"v").unwrap();
        std::fs::write(with_suffix(&output, ".part"), b"partial").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

        drop(files);

        let left: Vec<_> = dir
            .path()
            .read_dir()
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, [OsString::from("unrelated.txt")]);
    }

    #[test]
    fn release_deletes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = TempFiles::new(dir.path(), "0123");

        let audio = files.reserve(Extension::Audio);
        let output = files.reserve(Extension::Mp4);
        std::fs::write(&audio, b"a").unwrap();
        std::fs::write(&output, b"o").unwrap();

        files.release(&audio);

        assert!(!audio.exists());
        assert!(output.exists());
        assert_eq!(files.reserved(), [output.clone()]);

        drop(files);
        assert!(!output.exists());
    }
}
