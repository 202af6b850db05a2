use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use getset::Getters;
use log::warn;

use crate::errors::SystemError;

/// Numbered-suffix retries before giving up on a colliding prefix.
const MAX_ATTEMPTS: u32 = 10_000;

/// A working directory that removes itself on drop. On collision the name
/// gets a numbered suffix (`<prefix>-N`); creation failures classify to the
/// system-error taxonomy.
#[derive(Debug, Getters)]
pub struct ScopedTempDir {
    #[getset(get = "pub")]
    path: PathBuf,
    keep_on_drop: bool,
}

impl ScopedTempDir {
    pub fn new(parent: &Path, prefix: &str) -> Result<Self, SystemError> {
        let mut last_error: Option<io::Error> = None;
        for attempt in 0..MAX_ATTEMPTS {
            let name = if attempt == 0 {
                prefix.to_owned()
            } else {
                format!("{}-{}", prefix, attempt)
            };
            let path = parent.join(name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    return Ok(ScopedTempDir {
                        path,
                        keep_on_drop: false,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(classify(e, parent)),
            }
        }
        Err(SystemError::TempDirExhausted {
            parent: parent.to_owned(),
            attempts: MAX_ATTEMPTS,
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "exhausted")),
        })
    }

    /// Preserve the directory when dropped, e.g. for post-mortem debugging.
    pub fn keep(&mut self) {
        self.keep_on_drop = true;
    }
}

impl Drop for ScopedTempDir {
    fn drop(&mut self) {
        if self.keep_on_drop {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(
                "could not remove temporary directory {:?}: {}",
                self.path, e
            );
        }
    }
}

fn classify(error: io::Error, parent: &Path) -> SystemError {
    // EROFS, ENOMEM and ENAMETOOLONG have no stable ErrorKind mapping yet
    const EROFS: i32 = 30;
    const ENOMEM: i32 = 12;
    const ENAMETOOLONG: i32 = 36;
    match (error.kind(), error.raw_os_error()) {
        (io::ErrorKind::PermissionDenied, _) => SystemError::TempDirPermissionDenied {
            parent: parent.to_owned(),
        },
        (_, Some(EROFS)) => SystemError::TempDirReadOnlyFileSystem {
            parent: parent.to_owned(),
        },
        (_, Some(ENOMEM)) => SystemError::TempDirNotEnoughMemory {
            parent: parent.to_owned(),
        },
        (_, Some(ENAMETOOLONG)) => SystemError::TempDirFilenameTooLong {
            parent: parent.to_owned(),
        },
        _ => SystemError::Io {
            path: parent.to_owned(),
            source: error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_removes() {
        let parent = tempfile::tempdir().unwrap();
        let path;
        {
            let dir = ScopedTempDir::new(parent.path(), "octopus").unwrap();
            path = dir.path().to_owned();
            assert!(path.is_dir());
        }
        assert!(!path.exists());
    }

    #[test]
    fn collisions_get_numbered_suffixes() {
        let parent = tempfile::tempdir().unwrap();
        let first = ScopedTempDir::new(parent.path(), "octopus").unwrap();
        let second = ScopedTempDir::new(parent.path(), "octopus").unwrap();
        assert_ne!(first.path(), second.path());
        assert!(second
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-1"));
    }

    #[test]
    fn keep_preserves_the_directory() {
        let parent = tempfile::tempdir().unwrap();
        let path;
        {
            let mut dir = ScopedTempDir::new(parent.path(), "octopus").unwrap();
            dir.keep();
            path = dir.path().to_owned();
        }
        assert!(path.exists());
    }
}
