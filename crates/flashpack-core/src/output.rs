//! Atomic publication of output containers
//!
//! Containers are written to a temporary file next to the destination and
//! moved into place only once the whole build has succeeded. A failed or
//! cancelled build drops the temporary file, so nothing appears at the
//! destination path.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Whether publishing may replace an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// Replace any existing file
    Replace,
    /// Fail if the destination exists
    NoClobber,
}

/// A container being written
pub struct OutputFile {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl OutputFile {
    /// Create a temporary file in the destination's directory
    pub fn create(destination: &Path) -> Result<Self> {
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.is_dir() {
            return Err(Error::Precondition(format!(
                "output directory does not exist: {}",
                dir.display()
            )));
        }

        let temp = tempfile::Builder::new()
            .prefix(".flashpack-")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        tracing::debug!(
            "Writing {} via temporary file {:?}",
            destination.display(),
            temp.path()
        );

        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    /// File to write the container into
    pub fn file_mut(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }

    /// Final location
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Flush, sync and move the file into place
    pub fn publish(mut self, mode: Publish) -> Result<PathBuf> {
        let file = self.temp.as_file_mut();
        file.flush()?;
        file.sync_all()?;
        file.seek(SeekFrom::Start(0))?;

        match mode {
            Publish::Replace => {
                self.temp
                    .persist(&self.destination)
                    .map_err(|e| Error::Io(e.error))?;
            }
            Publish::NoClobber => {
                self.temp
                    .persist_noclobber(&self.destination)
                    .map_err(|e| {
                        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                            Error::Precondition(format!(
                                "destination already exists: {}",
                                self.destination.display()
                            ))
                        } else {
                            Error::Io(e.error)
                        }
                    })?;
            }
        }

        tracing::debug!("Published {}", self.destination.display());
        Ok(self.destination)
    }
}
