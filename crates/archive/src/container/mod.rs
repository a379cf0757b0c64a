//! Archive containers: where records are physically stored.
//!
//! Sources hand out [`ArchiveReaderRecord`]s through a visitor because an
//! entry usually borrows from the container's stream.

#[cfg(any(test, feature = "mock"))]
pub mod memory;
mod tar;

pub use self::tar::{TarArchiveSink, TarArchiveSource};

use exn::ResultExt;
use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::Path;
use time::UtcDateTime;

use crate::error::{ErrorKind, Result};
use crate::record::{ArchiveReaderRecord, RecordType};

/// Visitor handed each entry of a pass over a source.
pub type Visitor<'v> = dyn FnMut(&mut ArchiveReaderRecord<'_>) -> Result<ControlFlow<()>> + 'v;

/// A readable archive container.
pub trait ArchiveSource {
    /// Visit entries in physical order until the visitor breaks or the
    /// entries run out.
    ///
    /// Every call starts a new pass from the first entry.
    fn for_each(&mut self, visit: &mut Visitor<'_>) -> Result<()>;

    /// Release whatever the last pass left open. The next pass starts from
    /// a pristine stream either way.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Visit the first entry of `record_type`. Returns `false` if there is none.
    fn seek(
        &mut self,
        record_type: RecordType,
        visit: &mut dyn FnMut(&mut ArchiveReaderRecord<'_>) -> Result<()>,
    ) -> Result<bool> {
        let mut found = false;
        self.for_each(&mut |record| {
            if record.record_type() != Some(record_type) {
                return Ok(ControlFlow::Continue(()));
            }
            found = true;
            visit(record)?;
            Ok(ControlFlow::Break(()))
        })?;
        Ok(found)
    }
}

/// A writable archive container.
pub trait ArchiveSink {
    /// Append an entry. `compress` is a hint; containers compressed as a
    /// whole ignore it.
    fn put_reader(
        &mut self,
        name: &str,
        size: u64,
        modified: Option<UtcDateTime>,
        reader: &mut dyn Read,
        compress: bool,
    ) -> Result<()>;

    fn put_bytes(&mut self, name: &str, bytes: &[u8], compress: bool) -> Result<()> {
        self.put_reader(name, bytes.len() as u64, None, &mut &bytes[..], compress)
    }

    fn put_file(&mut self, name: &str, path: &Path, compress: bool) -> Result<()> {
        let mut file = File::open(path).or_raise(|| ErrorKind::Io)?;
        let meta = file.metadata().or_raise(|| ErrorKind::Io)?;
        let modified = meta.modified().ok().map(UtcDateTime::from);
        self.put_reader(name, meta.len(), modified, &mut file, compress)
    }

    /// Whether cover images can be stored alongside the records.
    fn supports_covers(&self) -> bool {
        false
    }

    /// Flush and close the container.
    fn finish(self) -> Result<()>
    where
        Self: Sized;
}
