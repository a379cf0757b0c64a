//! Cover image storage.

use exn::ResultExt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::path;

/// A readable cover, with its size in bytes.
pub type CoverReader = (u64, Box<dyn Read + Send>);

/// Where cover images live.
///
/// Covers are addressed by file name only; implementations must refuse
/// names that would escape their storage root.
pub trait CoverStorage: Send + Sync {
    /// Directory covers are stored in, for display and logging.
    fn root(&self) -> &Path;

    fn exists(&self, name: &str) -> Result<bool>;

    /// Open a cover for reading.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) when there is
    /// no cover by that name.
    fn open(&self, name: &str) -> Result<CoverReader>;

    /// Store `data` under `name`, replacing any existing cover.
    fn write(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Last modification time of a stored cover.
    fn modified(&self, name: &str) -> Result<Option<UtcDateTime>>;
}

/// Covers stored as plain files in a local directory.
#[derive(Debug, Clone)]
pub struct LocalCoverStorage {
    root: PathBuf,
}

impl LocalCoverStorage {
    /// Use `root` as the cover directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).or_raise(|| ErrorKind::Io)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(path::validate(name)?))
    }

    fn map_io_error(err: &io::Error, name: &str) -> ErrorKind {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound(name.to_string()),
            _ => ErrorKind::Io,
        }
    }
}

impl CoverStorage for LocalCoverStorage {
    fn root(&self) -> &Path {
        &self.root
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.path(name)?.try_exists().or_raise(|| ErrorKind::Io)
    }

    fn open(&self, name: &str) -> Result<CoverReader> {
        let path = self.path(name)?;
        let file = File::open(&path).map_err(|err| exn::Exn::from(Self::map_io_error(&err, name)))?;
        let size = file.metadata().or_raise(|| ErrorKind::Io)?.len();
        Ok((size, Box::new(file)))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        // Write to a sibling first so a failed write never leaves half a cover behind.
        let partial = path.with_extension("partial");
        let mut file = File::create(&partial).or_raise(|| ErrorKind::Io)?;
        file.write_all(data).or_raise(|| ErrorKind::Io)?;
        file.sync_all().or_raise(|| ErrorKind::Io)?;
        fs::rename(&partial, &path).or_raise(|| ErrorKind::Io)
    }

    fn modified(&self, name: &str) -> Result<Option<UtcDateTime>> {
        let path = self.path(name)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.modified().ok().map(UtcDateTime::from)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).or_raise(|| ErrorKind::Io),
        }
    }
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    //! In-memory cover storage for tests.

    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Mutex, PoisonError};

    #[derive(Debug, Default)]
    pub struct MockCoverStorage {
        root: PathBuf,
        covers: Mutex<BTreeMap<String, (Vec<u8>, UtcDateTime)>>,
    }

    impl MockCoverStorage {
        pub fn new() -> Self {
            Self { root: PathBuf::from("/mock/covers"), ..Default::default() }
        }

        /// Store a cover with an explicit modification time.
        pub fn insert(&self, name: &str, data: &[u8], modified: UtcDateTime) {
            self.covers().insert(name.to_string(), (data.to_vec(), modified));
        }

        pub fn get(&self, name: &str) -> Option<Vec<u8>> {
            self.covers().get(name).map(|(data, _)| data.clone())
        }

        pub fn names(&self) -> Vec<String> {
            self.covers().keys().cloned().collect()
        }

        fn covers(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, (Vec<u8>, UtcDateTime)>> {
            self.covers.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl CoverStorage for MockCoverStorage {
        fn root(&self) -> &Path {
            &self.root
        }

        fn exists(&self, name: &str) -> Result<bool> {
            path::validate(name)?;
            Ok(self.covers().contains_key(name))
        }

        fn open(&self, name: &str) -> Result<CoverReader> {
            let data = self.get(name).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(name.to_string())))?;
            Ok((data.len() as u64, Box::new(io::Cursor::new(data))))
        }

        fn write(&self, name: &str, data: &[u8]) -> Result<()> {
            path::validate(name)?;
            self.insert(name, data, UtcDateTime::now());
            Ok(())
        }

        fn modified(&self, name: &str) -> Result<Option<UtcDateTime>> {
            Ok(self.covers().get(name).map(|(_, modified)| *modified))
        }
    }
}
