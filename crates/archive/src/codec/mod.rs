//! Per-encoding record readers and writers.

mod base;
mod cover;
mod csv;
pub(crate) mod date;
mod json;
mod xml;

pub use self::base::import_book_with_uuid;
pub use self::cover::CoverRecordReader;
pub use self::csv::{CsvRecordReader, CsvRecordWriter};
pub use self::json::{JsonRecordReader, JsonRecordWriter};
pub use self::xml::{XmlRecordReader, XmlRecordWriter};

use exn::ResultExt;
use folio_store::{Book, Catalogue, CoverStorage};
use std::collections::BTreeSet;
use std::io::Write;
use time::UtcDateTime;

use crate::error::{ErrorKind, Result};
use crate::helper::ImportHelper;
use crate::metadata::ArchiveMetaData;
use crate::progress::ProgressListener;
use crate::record::{ArchiveReaderRecord, RecordType};
use crate::results::{ExportResults, ImportResults};

/// Everything a [`RecordReader`] needs besides the record itself.
#[derive(Clone, Copy)]
pub struct ReadContext<'a> {
    pub catalogue: &'a Catalogue,
    pub covers: &'a dyn CoverStorage,
    pub helper: &'a ImportHelper,
    pub progress: &'a dyn ProgressListener,
}

/// Everything a [`RecordWriter`] needs besides its output.
#[derive(Clone, Copy)]
pub struct WriteContext<'a> {
    pub catalogue: &'a Catalogue,
    pub covers: &'a dyn CoverStorage,
    pub progress: &'a dyn ProgressListener,
    /// Only export books changed after this.
    pub since: Option<UtcDateTime>,
}

/// Reads one kind of record from an archive entry into the catalogue.
pub trait RecordReader {
    /// Parse an archive header. `Ok(None)` when the record holds no header.
    fn read_metadata(&mut self, record: &mut ArchiveReaderRecord<'_>) -> Result<Option<ArchiveMetaData>>;

    /// Import the record.
    fn read(&mut self, ctx: &ReadContext<'_>, record: &mut ArchiveReaderRecord<'_>) -> Result<ImportResults>;
}

/// Writes one kind of record from the catalogue.
pub trait RecordWriter {
    fn write_metadata(&mut self, out: &mut dyn Write, metadata: &ArchiveMetaData) -> Result<()>;

    /// Write the requested record types this writer handles. When `types`
    /// contains [`RecordType::Cover`], the books' cover file names are
    /// collected in the results.
    fn write(
        &mut self,
        ctx: &WriteContext<'_>,
        out: &mut dyn Write,
        types: &BTreeSet<RecordType>,
    ) -> Result<ExportResults>;
}

/// Record the covers of `book` that exist in cover storage.
pub(crate) fn collect_covers(ctx: &WriteContext<'_>, book: &Book, results: &mut ExportResults) -> Result<()> {
    for name in book.cover_filenames() {
        if ctx.covers.exists(&name).or_raise(|| ErrorKind::Storage)? {
            results.add_cover(name);
        }
    }
    Ok(())
}
