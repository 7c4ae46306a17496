//! File-backed medium using positioned I/O

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

use super::Medium;
use crate::config::OpenMode;
use crate::error::{BlockFileError, MediumReadError};

/// Medium stored in a regular file
///
/// Reads and writes are positioned (`pread`/`pwrite` on unix), so concurrent
/// readers never fight over a shared seek position.
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    file: File,
}

impl FileMedium {
    /// Create or open the file at `path`
    ///
    /// `OpenMode::Truncate` discards any existing contents;
    /// `OpenMode::Resume` keeps them. Missing parent directories are created.
    pub fn open(path: impl Into<PathBuf>, mode: OpenMode) -> Result<Self, BlockFileError> {
        let path = path.into();
        let file = Self::open_file(&path, mode).map_err(|source| {
            BlockFileError::StorageCreation {
                path: path.clone(),
                source,
            }
        })?;
        tracing::debug!(path = %path.display(), ?mode, "opened block file medium");
        Ok(Self { path, file })
    }

    fn open_file(path: &Path, mode: OpenMode) -> io::Result<File> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(mode == OpenMode::Truncate)
            .open(path)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => {
                buf = &mut std::mem::take(&mut buf)[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    while !data.is_empty() {
        match file.seek_write(data, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                data = &data[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Medium for FileMedium {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), MediumReadError> {
        match read_exact_at(&self.file, buf, offset) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(MediumReadError::InsufficientData)
            }
            Err(e) => Err(MediumReadError::Io(e)),
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        write_all_at(&self.file, data, offset)
    }

    fn extent(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn close(self) -> io::Result<()> {
        // Write-back errors must be reported before the handle drops
        self.file.sync_all()?;
        tracing::debug!(path = %self.path.display(), "released block file medium");
        Ok(())
    }
}
