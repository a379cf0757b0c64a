//! Export orchestration.

use exn::{OptionExt, ResultExt};
use folio_store::{Catalogue, CoverStorage, dates};
use std::collections::BTreeSet;
use std::io::{BufWriter, Write};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::codec::{RecordWriter, WriteContext};
use crate::container::ArchiveSink;
use crate::error::{ErrorKind, Result};
use crate::helper::ExportHelper;
use crate::metadata::{ArchiveMetaData, VERSION};
use crate::progress::{ProgressListener, Throttle};
use crate::record::RecordType;
use crate::results::{ExportResults, Outcome};

/// Steps reserved for the records around the books and covers.
const EXTRA_STEPS: usize = 10;

/// Records written between the header and the books. Importers rely on
/// styles and preferences coming first.
const RECORD_ORDER: [RecordType; 6] = [
    RecordType::Styles,
    RecordType::Preferences,
    RecordType::Certificates,
    RecordType::Bookshelves,
    RecordType::CalibreLibraries,
    RecordType::CalibreCustomFields,
];

/// Writes the catalogue into an archive.
///
/// Entries are written in a fixed order: the header, styles, preferences,
/// certificates, bookshelves, Calibre libraries and custom fields, the books,
/// and finally the covers.
pub struct ArchiveWriter<'a, K> {
    sink: Option<K>,
    catalogue: &'a Catalogue,
    covers: &'a dyn CoverStorage,
    helper: ExportHelper,
    results: ExportResults,
}

impl<'a, K: ArchiveSink> ArchiveWriter<'a, K> {
    pub fn new(sink: K, catalogue: &'a Catalogue, covers: &'a dyn CoverStorage, helper: ExportHelper) -> Self {
        Self { sink: Some(sink), catalogue, covers, helper, results: ExportResults::default() }
    }

    /// What the export wrote so far. Still valid after a failed or cancelled write.
    pub fn results(&self) -> &ExportResults {
        &self.results
    }

    /// Export the catalogue and close the container.
    ///
    /// # Panics
    ///
    /// If called a second time.
    #[instrument(skip_all, fields(incremental = self.helper.incremental))]
    pub fn write(&mut self, progress: &dyn ProgressListener) -> Result<Outcome> {
        let Some(mut sink) = self.sink.take() else {
            panic!("ArchiveWriter::write called twice");
        };
        self.catalogue.maintenance().purge().or_raise(|| ErrorKind::Storage)?;

        let result = self.write_entries(&mut sink, progress);

        // Closing a large container takes a while.
        progress.set_indeterminate(Some(true));
        progress.advance(0, Some("please wait"));
        let finished = sink.finish();
        progress.set_indeterminate(None);

        let outcome = result?;
        finished?;
        if outcome == Outcome::Completed && self.helper.set_last_done(self.catalogue, dates::now())? {
            debug!("recorded full export");
        }
        info!(?outcome, books = self.results.books, covers = self.results.covers, "export finished");
        Ok(outcome)
    }

    fn write_entries(&mut self, sink: &mut K, progress: &dyn ProgressListener) -> Result<Outcome> {
        let types = self.helper.effective_types();
        let since = self.helper.since();
        let book_count = self.catalogue.books().count_for_export(since).or_raise(|| ErrorKind::Storage)?;
        if book_count == 0 {
            info!(?since, "no books to export");
            return Ok(Outcome::Completed);
        }
        info!(books = book_count, ?since, "exporting catalogue");

        let with_covers = types.contains(&RecordType::Cover) && sink.supports_covers();
        let book_steps = match with_covers {
            true => book_count * 2,
            false => book_count,
        };
        progress.set_max_steps(book_steps + EXTRA_STEPS);

        let ctx = WriteContext { catalogue: self.catalogue, covers: self.covers, progress, since };

        // The header carries the book and cover counts, so the books go
        // to a temporary file first.
        let books = match types.contains(&RecordType::Books) {
            true => {
                let mut book_types = types.clone();
                if !with_covers {
                    book_types.remove(&RecordType::Cover);
                }
                Some(self.stage_books(&ctx, &book_types)?)
            },
            false => None,
        };
        if progress.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let cover_steps = match with_covers {
            true => self.results.covers,
            false => 0,
        };
        progress.set_max_steps(self.results.books + cover_steps + EXTRA_STEPS);

        let encoding = self.helper.encoding(RecordType::MetaData);
        let mut writer = encoding
            .create_writer(RecordType::MetaData)
            .ok_or_raise(|| ErrorKind::Unsupported(format!("{} as {encoding}", RecordType::MetaData)))?;
        let mut header = Vec::new();
        writer.write_metadata(&mut header, &ArchiveMetaData::create(VERSION, &self.results))?;
        sink.put_bytes(&RecordType::MetaData.entry_name(encoding), &header, true)?;

        for record_type in RECORD_ORDER {
            if !types.contains(&record_type) {
                continue;
            }
            if progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let encoding = self.helper.encoding(record_type);
            let mut writer = encoding
                .create_writer(record_type)
                .ok_or_raise(|| ErrorKind::Unsupported(format!("{record_type} as {encoding}")))?;
            let mut buffer = Vec::new();
            let written = writer.write(&ctx, &mut buffer, &types)?;
            if written.has(record_type) {
                debug!(record = %record_type, size = buffer.len(), "writing record");
                sink.put_bytes(&record_type.entry_name(encoding), &buffer, true)?;
            }
            self.results += written;
            progress.advance(1, Some(record_type.name()));
        }

        if let Some(staged) = books {
            let name = RecordType::Books.entry_name(self.helper.encoding(RecordType::Books));
            sink.put_file(&name, staged.path(), true)?;
            // The temporary file is removed when `staged` drops, copied or not.
        }

        if with_covers && !self.results.cover_filenames.is_empty() {
            return self.write_covers(sink, progress);
        }
        Ok(Outcome::Completed)
    }

    fn stage_books(&mut self, ctx: &WriteContext<'_>, types: &BTreeSet<RecordType>) -> Result<NamedTempFile> {
        let encoding = self.helper.encoding(RecordType::Books);
        let mut writer = encoding
            .create_writer(RecordType::Books)
            .ok_or_raise(|| ErrorKind::Unsupported(format!("{} as {encoding}", RecordType::Books)))?;
        let mut staged = NamedTempFile::new().or_raise(|| ErrorKind::Io)?;
        let mut out = BufWriter::new(staged.as_file_mut());
        self.results += writer.write(ctx, &mut out, types)?;
        out.flush().or_raise(|| ErrorKind::Io)?;
        drop(out);
        debug!(path = %staged.path().display(), books = self.results.books, "staged books");
        Ok(staged)
    }

    /// Covers are stored as they are; images don't compress any further.
    fn write_covers(&mut self, sink: &mut K, progress: &dyn ProgressListener) -> Result<Outcome> {
        let mut throttle = Throttle::default();
        let mut written = 0;
        let mut outcome = Outcome::Completed;
        for name in &self.results.cover_filenames {
            if progress.is_cancelled() {
                outcome = Outcome::Cancelled;
                break;
            }
            let (size, mut reader) = self.covers.open(name).or_raise(|| ErrorKind::Storage)?;
            let modified = self.covers.modified(name).or_raise(|| ErrorKind::Storage)?;
            sink.put_reader(name, size, modified, &mut reader, false)?;
            written += 1;
            throttle.tick(progress, || format!("covers: {written} exported"));
        }
        throttle.finish(progress, || format!("covers: {written} exported"));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::container::memory::MemorySink;
    use crate::container::{TarArchiveSink, TarArchiveSource};
    use crate::helper::{ImportHelper, LAST_FULL_EXPORT, UpdatePolicy};
    use crate::progress::TracingProgress;
    use crate::progress::testing::CancelAfterBooks;
    use crate::reader::ArchiveReader;
    use crate::record::RecordEncoding;
    use folio_store::models::{CalibreCustomField, CalibreLibrary, Certificate, Style};
    use folio_store::{Book, MockCoverStorage, WriteFlags};
    use rstest::rstest;
    use serde_json::json;
    use time::macros::utc_datetime;

    struct Fixture {
        catalogue: Catalogue,
        covers: MockCoverStorage,
    }

    impl Fixture {
        fn new() -> Self {
            Self { catalogue: Catalogue::open_in_memory().unwrap(), covers: MockCoverStorage::new() }
        }

        /// A small catalogue: one style, one preference, `books` books on
        /// a shelf, and a front cover for the first book.
        fn populated(books: usize) -> Self {
            let fixture = Self::new();
            fixture.catalogue.styles().upsert(&Style::new("style-1", "Compact")).unwrap();
            fixture.catalogue.preferences().set("theme", &json!("dark")).unwrap();
            for n in 1..=books {
                let book = Book {
                    uuid: format!("3f8e2d1c-0000-4000-8000-{n:012}"),
                    authors: vec!["Ann Leckie".to_string()],
                    bookshelves: vec!["To read".to_string()],
                    last_updated: Some(utc_datetime!(2024-05-06 07:08:09)),
                    ..Book::new(format!("Book {n}"))
                };
                let flags = WriteFlags { use_update_date_if_present: true, ..Default::default() };
                fixture.catalogue.books().insert(&book, flags).unwrap();
                if n == 1 {
                    let [front, _] = book.cover_filenames();
                    fixture.covers.insert(&front, b"\xff\xd8 front cover", utc_datetime!(2024-05-06 07:08:09));
                }
            }
            fixture
        }

        fn write(&self, sink: &mut MemorySink, helper: ExportHelper) -> (Outcome, ExportResults) {
            let mut writer = ArchiveWriter::new(sink, &self.catalogue, &self.covers, helper);
            let outcome = writer.write(&TracingProgress::default()).unwrap();
            (outcome, writer.results().clone())
        }

        fn uuids(&self) -> Vec<String> {
            let mut uuids: Vec<_> =
                self.catalogue.books().for_export(None).unwrap().map(|book| book.unwrap().uuid).collect();
            uuids.sort();
            uuids
        }
    }

    #[test]
    fn test_entry_order() {
        let fixture = Fixture::populated(2);
        let mut sink = MemorySink::default();
        let (outcome, results) = fixture.write(&mut sink, ExportHelper::default());
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(results.books, 2);
        assert_eq!(results.covers, 1);

        let front = Book { uuid: "3f8e2d1c-0000-4000-8000-000000000001".to_string(), ..Book::default() }
            .cover_filenames()[0]
            .clone();
        assert_eq!(
            sink.names(),
            ["metadata.json", "styles.json", "preferences.json", "bookshelves.json", "books.json", front.as_str()]
        );
        assert!(!sink.get(&front).unwrap().compress);
        assert!(sink.get("books.json").unwrap().compress);
    }

    #[test]
    fn test_entry_order_with_every_record() {
        let fixture = Fixture::populated(1);
        let catalogue = &fixture.catalogue;
        catalogue
            .certificates()
            .upsert(&Certificate { name: "calibre.example.org".to_string(), der: vec![0x30, 0x82, 0x01] })
            .unwrap();
        let library = CalibreLibrary {
            library_string_id: "Calibre_Library".to_string(),
            uuid: "5a1c7e42-9d3b-4f60-8e21-c4b7a9d0f315".to_string(),
            name: "Calibre Library".to_string(),
            bookshelf: Some("To read".to_string()),
            ..CalibreLibrary::default()
        };
        catalogue.calibre().insert_library(&library).unwrap();
        catalogue
            .calibre()
            .upsert_custom_field(&CalibreCustomField {
                calibre_key: "#read".to_string(),
                kind: "bool".to_string(),
                db_key: "read".to_string(),
            })
            .unwrap();

        let mut sink = MemorySink::default();
        let (outcome, results) = fixture.write(&mut sink, ExportHelper::default());
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(
            (results.certificates, results.calibre_libraries, results.calibre_custom_fields),
            (1, 1, 1)
        );

        let front = Book { uuid: "3f8e2d1c-0000-4000-8000-000000000001".to_string(), ..Book::default() }
            .cover_filenames()[0]
            .clone();
        assert_eq!(
            sink.names(),
            [
                "metadata.json",
                "styles.json",
                "preferences.json",
                "certificates.json",
                "bookshelves.json",
                "calibreLibraries.json",
                "calibreCustomFields.json",
                "books.json",
                front.as_str(),
            ]
        );
    }

    #[test]
    fn test_header_carries_counts() {
        let fixture = Fixture::populated(3);
        let mut sink = MemorySink::default();
        fixture.write(&mut sink, ExportHelper::default());
        let header: serde_json::Value = serde_json::from_slice(&sink.get("metadata.json").unwrap().data).unwrap();
        assert_eq!(header["metadata"]["version"], json!(VERSION));
        assert_eq!(header["metadata"]["books"], json!(3));
        assert_eq!(header["metadata"]["covers"], json!(1));
    }

    #[test]
    fn test_empty_export_writes_nothing() {
        let fixture = Fixture::new();
        let mut sink = MemorySink::default();
        let (outcome, results) = fixture.write(&mut sink, ExportHelper::default());
        assert_eq!(outcome, Outcome::Completed);
        assert!(sink.entries().is_empty());
        assert_eq!((results.books, results.covers, results.styles), (0, 0, 0));
    }

    #[test]
    fn test_covers_skipped_without_container_support() {
        let fixture = Fixture::populated(1);
        let mut sink = MemorySink::new(false);
        let (_, results) = fixture.write(&mut sink, ExportHelper::default());
        assert_eq!(results.covers, 0);
        assert_eq!(sink.names().last(), Some(&"books.json"));
    }

    #[test]
    fn test_books_as_csv() {
        let fixture = Fixture::populated(2);
        let mut sink = MemorySink::default();
        let mut helper = ExportHelper::new([RecordType::Books]);
        helper.books_encoding = RecordEncoding::Csv;
        fixture.write(&mut sink, helper);
        let csv = String::from_utf8(sink.get("books.csv").unwrap().data.clone()).unwrap();
        assert!(csv.starts_with("_id,book_uuid,title"));
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_books_as_xml_are_unsupported() {
        let fixture = Fixture::populated(1);
        let mut sink = MemorySink::default();
        let mut helper = ExportHelper::new([RecordType::Books]);
        helper.books_encoding = RecordEncoding::Xml;
        let mut writer = ArchiveWriter::new(&mut sink, &fixture.catalogue, &fixture.covers, helper);
        let err = writer.write(&TracingProgress::default()).unwrap_err();
        assert!(matches!(*err, ErrorKind::Unsupported(_)));
    }

    #[test]
    fn test_cancel_during_books() {
        let fixture = Fixture::populated(20);
        let mut sink = MemorySink::default();
        let mut writer = ArchiveWriter::new(&mut sink, &fixture.catalogue, &fixture.covers, ExportHelper::default());
        let outcome = writer.write(&CancelAfterBooks::new(7)).unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(writer.results().books, 7);
        assert_eq!(fixture.catalogue.sync_dates().get(LAST_FULL_EXPORT).unwrap(), None);
    }

    #[test]
    fn test_last_full_export_drives_incremental_export() {
        let fixture = Fixture::populated(2);
        fixture.write(&mut MemorySink::default(), ExportHelper::default());
        let mut helper = ExportHelper::default();
        helper.load_last_full_export(&fixture.catalogue).unwrap();
        assert!(helper.last_full_export.is_some());

        // Nothing changed since, so an incremental export is empty.
        helper.incremental = true;
        let mut sink = MemorySink::default();
        let (_, results) = fixture.write(&mut sink, helper);
        assert_eq!(results.books, 0);
        assert!(sink.entries().is_empty());
    }

    #[rstest]
    #[case::plain("backup.tar", Compression::None)]
    #[case::gzip("backup.tar.gz", Compression::Gzip)]
    #[case::bzip2("backup.tar.bz2", Compression::Bzip2)]
    fn test_tar_round_trip(#[case] file_name: &str, #[case] compression: Compression) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(file_name);
        let source = Fixture::populated(3);

        let sink = TarArchiveSink::create(&path, compression).unwrap();
        let mut writer = ArchiveWriter::new(sink, &source.catalogue, &source.covers, ExportHelper::default());
        assert_eq!(writer.write(&TracingProgress::default()).unwrap(), Outcome::Completed);

        let target = Fixture::new();
        let archive = TarArchiveSource::open(&path).unwrap();
        let helper = ImportHelper::new(RecordType::ALL, UpdatePolicy::Overwrite);
        let mut reader = ArchiveReader::new(archive, &target.catalogue, &target.covers, helper);
        reader.validate().unwrap();
        assert_eq!(reader.read(&TracingProgress::default()).unwrap(), Outcome::Completed);

        let results = reader.results();
        assert_eq!(results.books_created, 3);
        assert_eq!(results.covers_created, 1);
        assert_eq!(results.styles, 1);
        assert_eq!(target.uuids(), source.uuids());
        assert_eq!(target.catalogue.preferences().get("theme").unwrap(), Some(json!("dark")));
        assert_eq!(target.covers.names(), source.covers.names());
        for name in source.covers.names() {
            assert_eq!(target.covers.get(&name), source.covers.get(&name));
        }
    }

    #[test]
    fn test_import_into_same_catalogue_skips_unchanged_books() {
        let fixture = Fixture::populated(4);
        let mut sink = MemorySink::default();
        fixture.write(&mut sink, ExportHelper::default());

        let mut reader =
            ArchiveReader::new(sink.clone().into_source(), &fixture.catalogue, &fixture.covers, ImportHelper::default());
        reader.validate().unwrap();
        reader.read(&TracingProgress::default()).unwrap();
        let results = reader.results();
        assert_eq!(results.books_skipped, 4);
        assert_eq!(results.covers_skipped, 1);
        assert_eq!(fixture.catalogue.books().count().unwrap(), 4);
    }
}
