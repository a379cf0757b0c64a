//! Versioned, multi-record backup archives for the folio catalogue.
//!
//! An archive is a tar container holding one entry per record: a header
//! (`metadata.json`), the catalogue's styles, preferences, certificates,
//! bookshelves, Calibre libraries and custom fields, the books, and finally
//! the cover images under their own file names.
//!
//! # Architecture
//! - **Record model** ([`RecordType`], [`RecordEncoding`]): which records
//!   exist and which encodings can carry them. Readers and writers for a
//!   `(type, encoding)` pair come from [`RecordEncoding::create_reader`] and
//!   [`RecordEncoding::create_writer`].
//! - **Codecs** ([`codec`]): JSON for everything current, XML and CSV for
//!   the archive versions 1 and 2.
//! - **Containers** ([`container`]): where entries physically live.
//! - **Orchestrators** ([`ArchiveReader`], [`ArchiveWriter`]): walk the
//!   container in the right order, report progress and honour cancellation.
//!
//! Archive versions 1 to 5 can be read; version 5 is written.

pub mod codec;
mod compression;
pub mod container;
pub mod error;
mod helper;
mod metadata;
mod progress;
mod reader;
mod record;
mod results;
mod writer;

pub use crate::compression::{Compression, Encoder};
pub use crate::container::{ArchiveSink, ArchiveSource, TarArchiveSink, TarArchiveSource};
pub use crate::helper::{ExportHelper, ImportHelper, LAST_FULL_EXPORT, UpdatePolicy};
pub use crate::metadata::{ArchiveMetaData, MIN_VERSION, VERSION};
pub use crate::progress::{ProgressListener, TracingProgress};
pub use crate::reader::ArchiveReader;
pub use crate::record::{ArchiveReaderRecord, RecordEncoding, RecordType};
pub use crate::results::{ExportResults, ImportResults, Outcome};
pub use crate::writer::ArchiveWriter;
