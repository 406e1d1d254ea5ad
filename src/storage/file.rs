//! # Positional File Access
//!
//! [`DatabaseFile`] wraps the backing file with chunk-sized positional reads
//! and writes. The database never maps the file: every chunk is copied into
//! its own buffer on first touch and written back explicitly on flush.
//!
//! ## Short Reads
//!
//! A chunk that lies past the end of the file reads as zeroes. New chunks are
//! created in memory and only reach the file when flushed, so the file may
//! temporarily be shorter than the chunk table.
//!
//! ## Retries
//!
//! An operation failing with `ErrorKind::Interrupted` is retried after the
//! file handle has been reopened, up to [`MAX_IO_RETRIES`] times. Every other
//! error is propagated immediately with the path and offset attached.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{bail, Result, WrapErr};
use parking_lot::Mutex;
use tracing::warn;

use crate::config::MAX_IO_RETRIES;

#[derive(Debug)]
pub struct DatabaseFile {
    path: PathBuf,
    read_only: bool,
    file: Mutex<File>,
}

fn open_file(path: &Path, read_only: bool) -> std::io::Result<File> {
    if read_only {
        OpenOptions::new().read(true).open(path)
    } else {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }
}

impl DatabaseFile {
    /// Opens `path`, creating it when writable and absent.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = open_file(path, read_only)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            read_only,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len(&self) -> Result<u64> {
        self.with_retry("stat", |file| file.metadata().map(|m| m.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fills `buf` from `offset`; bytes beyond the end of the file read as 0.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let filled = self
            .with_retry("read", |file| {
                file.seek(SeekFrom::Start(offset))?;
                let mut filled = 0;
                while filled < buf.len() {
                    match file.read(&mut buf[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) => return Err(e),
                    }
                }
                Ok(filled)
            })
            .wrap_err_with(|| format!("failed to read {} bytes at offset {}", buf.len(), offset))?;
        buf[filled..].fill(0);
        Ok(())
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            bail!(crate::DbError::ReadOnly);
        }
        self.with_retry("write", |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)
        })
        .wrap_err_with(|| format!("failed to write {} bytes at offset {}", buf.len(), offset))
    }

    pub fn sync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.with_retry("sync", |file| file.sync_all())
            .wrap_err("failed to sync database file")
    }

    pub fn set_len(&self, len: u64) -> Result<()> {
        self.with_retry("truncate", |file| file.set_len(len))
            .wrap_err_with(|| format!("failed to resize database file to {} bytes", len))
    }

    /// Copies the first `len` bytes of the file into `out`.
    pub fn copy_to(&self, len: u64, out: &mut dyn Write) -> Result<u64> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))
            .wrap_err("failed to rewind database file")?;
        let copied = std::io::copy(&mut (&mut *file).take(len), out)
            .wrap_err_with(|| format!("failed to copy '{}'", self.path.display()))?;
        Ok(copied)
    }

    fn with_retry<R>(
        &self,
        op: &'static str,
        mut f: impl FnMut(&mut File) -> std::io::Result<R>,
    ) -> Result<R> {
        let mut file = self.file.lock();
        let mut attempts = 0;
        loop {
            match f(&mut file) {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == ErrorKind::Interrupted && attempts < MAX_IO_RETRIES => {
                    attempts += 1;
                    warn!(
                        target: "pdom::io",
                        op,
                        attempt = attempts,
                        path = %self.path.display(),
                        "interrupted file access, reopening"
                    );
                    *file = open_file(&self.path, self.read_only).wrap_err_with(|| {
                        format!("failed to reopen database file '{}'", self.path.display())
                    })?;
                }
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("{} failed on '{}'", op, self.path.display())
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_past_end_is_zero_filled() {
        let dir = tempdir().unwrap();
        let file = DatabaseFile::open(dir.path().join("f.pdom"), false).unwrap();
        file.write_at(0, &[1, 2, 3]).unwrap();

        let mut buf = [0xffu8; 8];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 0, 0, 0, 0, 0]);

        let mut buf = [0xffu8; 4];
        file.read_at(100, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn write_at_offset_extends_file() {
        let dir = tempdir().unwrap();
        let file = DatabaseFile::open(dir.path().join("f.pdom"), false).unwrap();
        file.write_at(4096, &[7; 4096]).unwrap();
        assert_eq!(file.len().unwrap(), 8192);
    }

    #[test]
    fn read_only_file_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.pdom");
        DatabaseFile::open(&path, false).unwrap();

        let file = DatabaseFile::open(&path, true).unwrap();
        let err = file.write_at(0, &[1]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<crate::DbError>(),
            Some(&crate::DbError::ReadOnly)
        );
    }

    #[test]
    fn interrupted_access_is_retried_after_reopen() {
        let dir = tempdir().unwrap();
        let file = DatabaseFile::open(dir.path().join("f.pdom"), false).unwrap();

        let mut calls = 0;
        let value = file
            .with_retry("read", |_| {
                calls += 1;
                if calls <= 2 {
                    Err(std::io::Error::from(ErrorKind::Interrupted))
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn persistent_interruption_gives_up_after_retry_limit() {
        let dir = tempdir().unwrap();
        let file = DatabaseFile::open(dir.path().join("f.pdom"), false).unwrap();

        let mut calls = 0;
        let result: Result<()> = file.with_retry("write", |_| {
            calls += 1;
            Err(std::io::Error::from(ErrorKind::Interrupted))
        });
        let err = result.unwrap_err();
        assert_eq!(calls, MAX_IO_RETRIES + 1);
        assert_eq!(
            err.downcast_ref::<std::io::Error>().map(|e| e.kind()),
            Some(ErrorKind::Interrupted)
        );
    }

    #[test]
    fn other_errors_fail_without_retry() {
        let dir = tempdir().unwrap();
        let file = DatabaseFile::open(dir.path().join("f.pdom"), false).unwrap();

        let mut calls = 0;
        let result: Result<()> = file.with_retry("sync", |_| {
            calls += 1;
            Err(std::io::Error::from(ErrorKind::PermissionDenied))
        });
        let err = result.unwrap_err();
        assert_eq!(calls, 1);
        assert!(format!("{:#}", err).contains("sync failed"));
    }

    #[test]
    fn open_read_only_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(DatabaseFile::open(dir.path().join("missing.pdom"), true).is_err());
    }
}
