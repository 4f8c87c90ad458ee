//! Working copies handed to the external formatter.
//!
//! Each attempt writes the buffer content to a file whose name is derived from
//! the resource path, the process id and the attempt's token version, so two
//! in-flight attempts on the same resource never touch each other's copy, even
//! when they come from separate savefmt processes with their own registries. The copy is owned by a
//! [`StagedFile`] guard and removed when the guard drops, whichever way the
//! attempt ends.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Marker embedded in every staged file name.
const STAGING_MARKER: &str = ".savefmt-";

/// Errors while creating or reading a staged copy.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to stage {resource} at {path}: {source}")]
    Write {
        resource: String,
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to read formatted output from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

/// Where staged copies are placed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StagingArea {
    /// Next to the original file, as a hidden sibling. Formatters that look for
    /// project-local configuration (`rustfmt.toml`, `.prettierrc`, ...) then find it.
    #[default]
    Adjacent,
    /// Inside a dedicated directory, named by a hash of the resource.
    Directory(PathBuf),
}

impl StagingArea {
    /// Staging location for `resource` at `version` in this process.
    ///
    /// The original extension is kept so formatters that dispatch on it still work.
    pub fn staged_path(&self, resource: &str, version: u64) -> PathBuf {
        let original = Path::new(resource);
        let tag = format!("{STAGING_MARKER}{}-{version}", std::process::id());
        let extension = original
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        match self {
            Self::Adjacent => {
                let file_name = original
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "untitled".to_string());
                let parent = original.parent().unwrap_or_else(|| Path::new(""));
                parent.join(format!(".{file_name}{tag}{extension}"))
            }
            Self::Directory(dir) => {
                let hash = blake3::hash(resource.as_bytes()).to_hex();
                dir.join(format!("{}{tag}{extension}", &hash.as_str()[..16]))
            }
        }
    }

    /// Write `content` to the staging location for `(resource, version)`.
    pub fn stage(&self, resource: &str, version: u64, content: &str) -> Result<StagedFile, StagingError> {
        // Formatters get an absolute path regardless of how the resource was named
        let path = self.staged_path(resource, version);
        let path = std::path::absolute(&path).unwrap_or(path);

        if let Self::Directory(dir) = self
            && let Err(source) = fs::create_dir_all(dir)
        {
            return Err(StagingError::Write {
                resource: resource.to_string(),
                path,
                source,
            });
        }

        // Own the path before writing so a partially written file is still cleaned up
        let staged = StagedFile { path };
        fs::write(&staged.path, content).map_err(|source| StagingError::Write {
            resource: resource.to_string(),
            path: staged.path.clone(),
            source,
        })?;

        log::trace!("staged {resource} at {}", staged.path.display());
        Ok(staged)
    }
}

/// Whether `path` looks like a staging artifact produced by [`StagingArea`].
pub fn is_staged_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name.split_once(STAGING_MARKER).is_some_and(|(_, rest)| {
                let tag = rest.split('.').next().unwrap_or_default();
                tag.split_once('-')
                    .is_some_and(|(pid, version)| is_number(pid) && is_number(version))
            })
        })
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// A staged working copy, removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the (presumably formatted) contents back.
    pub fn read(&self) -> Result<String, StagingError> {
        fs::read_to_string(&self.path).map_err(|source| StagingError::Read {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::trace!("removed staged file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove staged file {}: {e}", self.path.display()),
        }
    }
}
