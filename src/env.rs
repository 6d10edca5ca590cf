//! Environment abstraction: the file system and clock surface consumed by
//! the table cache and the map builder. Only the handful of calls the
//! subsystem needs are modelled; everything else belongs to the embedding
//! engine.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Advisory I/O priority hint for writable files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoPriority {
    Low,
    High,
}

pub trait RandomAccessFile: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn set_io_priority(&mut self, _pri: IoPriority) {}
}

pub trait Env: Send + Sync {
    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>>;

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    fn delete_file(&self, path: &Path) -> Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Seconds since the epoch.
    fn current_time(&self) -> Result<u64>;
}

/// Table file name: `<dir>/<nnnnnn>.sst`, the directory chosen from the
/// configured path set by `path_id`. An out-of-range `path_id` falls back
/// to the first path.
pub fn table_file_name(paths: &[PathBuf], file_number: u64, path_id: u32) -> PathBuf {
    let dir = paths
        .get(path_id as usize)
        .unwrap_or_else(|| &paths[0]);
    dir.join(format!("{file_number:06}.sst"))
}

/// The standard-library file system environment.
pub struct FsEnv;

impl Env for FsEnv {
    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        Ok(Box::new(FsRandomAccessFile { file }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(FsWritableFile { file }))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn current_time(&self) -> Result<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| Error::Io(e.to_string()))
    }
}

struct FsRandomAccessFile {
    file: File,
}

impl RandomAccessFile for FsRandomAccessFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.file.try_clone()?;
        reader.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            let n = reader.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

struct FsWritableFile {
    file: File,
}

impl WritableFile for FsWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Shared byte budget for files written by build jobs. Charged once per
/// finished output file; exceeding the budget fails the charging build.
pub struct SpaceQuota {
    max_bytes: u64,
    used: AtomicU64,
}

impl SpaceQuota {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            used: AtomicU64::new(0),
        }
    }

    pub fn charge(&self, bytes: u64) -> Result<()> {
        let used = self.used.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if used > self.max_bytes {
            self.used.fetch_sub(bytes, Ordering::SeqCst);
            return Err(Error::SpaceLimit(format!(
                "max allowed space {} reached",
                self.max_bytes
            )));
        }
        Ok(())
    }

    pub fn release(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_file_name() {
        let paths = vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")];
        assert_eq!(
            table_file_name(&paths, 42, 0),
            PathBuf::from("/data/a/000042.sst")
        );
        assert_eq!(
            table_file_name(&paths, 1234567, 1),
            PathBuf::from("/data/b/1234567.sst")
        );
        // out-of-range path_id falls back to the first path
        assert_eq!(
            table_file_name(&paths, 7, 9),
            PathBuf::from("/data/a/000007.sst")
        );
    }

    #[test]
    fn test_fs_env_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = FsEnv;
        let path = dir.path().join("000001.sst");

        let mut wf = env.new_writable_file(&path).unwrap();
        wf.append(b"hello ").unwrap();
        wf.append(b"world").unwrap();
        wf.sync().unwrap();
        wf.close().unwrap();

        let rf = env.new_random_access_file(&path).unwrap();
        assert_eq!(rf.len().unwrap(), 11);
        let mut buf = [0u8; 5];
        assert_eq!(rf.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");

        env.delete_file(&path).unwrap();
        assert!(!env.file_exists(&path));
    }

    #[test]
    fn test_space_quota() {
        let quota = SpaceQuota::new(100);
        quota.charge(60).unwrap();
        assert!(matches!(quota.charge(50), Err(Error::SpaceLimit(_))));
        // the failed charge is rolled back
        assert_eq!(quota.used(), 60);
        quota.charge(40).unwrap();
        quota.release(100);
        assert_eq!(quota.used(), 0);
    }
}
