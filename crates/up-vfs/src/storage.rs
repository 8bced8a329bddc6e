//! Storage collaborator
//!
//! Paths are relative to the storage root (the device the extracted content
//! is installed to, or the directory a package is read from). Absolute paths
//! and `..` components are rejected, so nothing outside the root is touched.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// File access used by the extraction pipelines
pub trait Storage {
    /// Random-access reader for package files
    type Reader: Read + Seek;
    /// Seekable writer; CSO output rewrites its block table in place
    type Writer: Write + Seek;

    /// Open an existing file for reading
    fn open(&self, path: &Path) -> io::Result<Self::Reader>;

    /// Create (or truncate) a file for writing
    fn create(&self, path: &Path) -> io::Result<Self::Writer>;

    /// Create a directory and all of its parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a file
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Size of a file in bytes
    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Whether a file or directory exists
    fn exists(&self, path: &Path) -> bool;
}

/// Storage backed by the host file system under a root directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage path to a host path below the root
    pub fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let inside = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !inside {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path {:?} leaves the storage root", path),
            ));
        }
        Ok(self.root.join(path))
    }
}

impl Storage for LocalStorage {
    type Reader = BufReader<File>;
    type Writer = BufWriter<File>;

    fn open(&self, path: &Path) -> io::Result<Self::Reader> {
        let host = self.resolve(path)?;
        debug!("open {:?}", host);
        Ok(BufReader::new(File::open(host)?))
    }

    fn create(&self, path: &Path) -> io::Result<Self::Writer> {
        let host = self.resolve(path)?;
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!("create {:?}", host);
        Ok(BufWriter::new(File::create(host)?))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)?)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let host = self.resolve(path)?;
        debug!("remove {:?}", host);
        fs::remove_file(host)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(self.resolve(path)?)?.len())
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_ok_and(|host| host.exists())
    }
}
