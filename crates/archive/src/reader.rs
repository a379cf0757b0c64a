//! Import orchestration.

use exn::{OptionExt, ResultExt};
use folio_store::{Catalogue, CoverStorage};
use std::ops::ControlFlow;
use tracing::{debug, info, instrument, warn};

use crate::codec::{CoverRecordReader, ReadContext, RecordReader};
use crate::container::ArchiveSource;
use crate::error::{ErrorKind, Result};
use crate::helper::ImportHelper;
use crate::metadata::{ArchiveMetaData, MIN_VERSION, VERSION};
use crate::progress::{ProgressListener, Throttle};
use crate::record::{ArchiveReaderRecord, RecordType};
use crate::results::{ImportResults, Outcome};

/// Steps reserved for the records around the books and covers.
const EXTRA_STEPS: usize = 10;

/// Records read ahead of everything else, in this order.
const PRELOADED: [RecordType; 2] = [RecordType::Styles, RecordType::Preferences];

/// Reads an archive into the catalogue.
///
/// ```no_run
/// use folio_archive::{ArchiveReader, ImportHelper, TarArchiveSource, TracingProgress};
/// use folio_store::{Catalogue, LocalCoverStorage, OpenOptions};
///
/// let catalogue = Catalogue::open("catalogue.db", &OpenOptions::default()).unwrap();
/// let covers = LocalCoverStorage::new("covers").unwrap();
/// let source = TarArchiveSource::open("backup.tar.gz").unwrap();
///
/// let mut reader = ArchiveReader::new(source, &catalogue, &covers, ImportHelper::default());
/// reader.validate().unwrap();
/// reader.read(&TracingProgress::default()).unwrap();
/// println!("{:?}", reader.results());
/// ```
pub struct ArchiveReader<'a, S> {
    source: S,
    catalogue: &'a Catalogue,
    covers: &'a dyn CoverStorage,
    helper: ImportHelper,
    metadata: Option<ArchiveMetaData>,
    validated: bool,
    results: ImportResults,
}

impl<'a, S: ArchiveSource> ArchiveReader<'a, S> {
    pub fn new(source: S, catalogue: &'a Catalogue, covers: &'a dyn CoverStorage, helper: ImportHelper) -> Self {
        Self {
            source,
            catalogue,
            covers,
            helper,
            metadata: None,
            validated: false,
            results: ImportResults::default(),
        }
    }

    /// The archive header, read on first use and cached afterwards.
    ///
    /// The source is reset whether or not the header could be read.
    pub fn read_metadata(&mut self) -> Result<&ArchiveMetaData> {
        let metadata = match self.metadata.take() {
            Some(metadata) => metadata,
            None => {
                let loaded = self.load_metadata();
                let reset = self.source.reset();
                let metadata = loaded?;
                reset?;
                debug!(version = metadata.version, "read archive header");
                metadata
            },
        };
        Ok(self.metadata.insert(metadata))
    }

    fn load_metadata(&mut self) -> Result<ArchiveMetaData> {
        let mut parsed = None;
        let found = self.source.seek(RecordType::MetaData, &mut |record| {
            let encoding = record
                .encoding()
                .ok_or_raise(|| ErrorKind::format(format!("archive header {}", record.name())))?;
            let mut reader = encoding
                .create_reader(RecordType::MetaData)
                .ok_or_raise(|| ErrorKind::format(format!("archive header {}", record.name())))?;
            parsed = reader.read_metadata(record)?;
            Ok(())
        })?;
        if !found {
            exn::bail!(ErrorKind::format("no archive header"));
        }
        parsed.ok_or_raise(|| ErrorKind::format("empty archive header"))
    }

    /// Read and check the archive header. Must succeed before [`read`](Self::read).
    pub fn validate(&mut self) -> Result<()> {
        self.read_metadata()?.validate()?;
        self.validated = true;
        Ok(())
    }

    /// What the import did so far. Still valid after a failed or cancelled read.
    pub fn results(&self) -> &ImportResults {
        &self.results
    }

    /// Import the archive.
    ///
    /// # Panics
    ///
    /// If [`validate`](Self::validate) did not succeed first.
    #[instrument(skip_all, fields(version))]
    pub fn read(&mut self, progress: &dyn ProgressListener) -> Result<Outcome> {
        let metadata = match (&self.metadata, self.validated) {
            (Some(metadata), true) => metadata.clone(),
            _ => panic!("ArchiveReader::read called before a successful validate"),
        };
        tracing::Span::current().record("version", metadata.version);
        if !(MIN_VERSION..=VERSION).contains(&metadata.version) {
            exn::bail!(ErrorKind::UnsupportedVersion(metadata.version));
        }
        info!(books = ?metadata.book_count, covers = ?metadata.cover_count, "importing archive");

        let result = self.read_records(&metadata, progress);

        // Best-effort cleanup; the import result wins.
        if let Err(err) = self.source.reset() {
            warn!(error = %err, "failed to close archive");
        }
        if let Err(err) = self.catalogue.maintenance().purge() {
            warn!(error = %err, "maintenance after import failed");
        }

        let outcome = result?;
        info!(
            ?outcome,
            created = self.results.books_created,
            updated = self.results.books_updated,
            skipped = self.results.books_skipped,
            failed = self.results.books_failed,
            covers = self.results.cover_count(),
            "import finished"
        );
        Ok(outcome)
    }

    fn read_records(&mut self, metadata: &ArchiveMetaData, progress: &dyn ProgressListener) -> Result<Outcome> {
        let mut types = self.helper.effective_types();
        if metadata.version == 1 {
            // Nothing usable was ever stored in these.
            for record_type in PRELOADED {
                types.remove(&record_type);
            }
        }

        let books = metadata.book_count.unwrap_or_default();
        let cover_steps = match types.contains(&RecordType::Cover) {
            true => metadata.cover_count.unwrap_or(books),
            false => 0,
        };
        progress.set_max_steps(books + cover_steps + EXTRA_STEPS);

        let Self { source, catalogue, covers, helper, results, .. } = self;
        let ctx = ReadContext { catalogue: *catalogue, covers: *covers, helper, progress };

        for record_type in PRELOADED {
            if !types.contains(&record_type) || progress.is_cancelled() {
                continue;
            }
            let found = source.seek(record_type, &mut |record| {
                *results += read_record(&ctx, record)?;
                Ok(())
            });
            source.reset()?;
            if found? {
                progress.advance(1, Some(record_type.name()));
            }
        }

        let mut cover_reader = CoverRecordReader::new();
        let mut cover_throttle = Throttle::default();
        let mut outcome = Outcome::Completed;
        source.for_each(&mut |record| {
            if progress.is_cancelled() {
                outcome = Outcome::Cancelled;
                return Ok(ControlFlow::Break(()));
            }
            match record.record_type() {
                Some(RecordType::MetaData) => {},
                Some(record_type) if PRELOADED.contains(&record_type) && types.contains(&record_type) => {},
                Some(RecordType::Cover) if types.contains(&RecordType::Cover) => {
                    let read = cover_reader.read(&ctx, record)?;
                    *results += read;
                    let count = results.cover_count();
                    cover_throttle.tick(progress, || format!("covers: {count} imported"));
                },
                Some(record_type) if types.contains(&record_type) && record.encoding().is_some() => {
                    debug!(record = record.name(), "reading record");
                    *results += read_record(&ctx, record)?;
                    progress.advance(1, Some(record_type.name()));
                },
                _ => {
                    debug!(record = record.name(), "skipping record");
                    results.records_skipped += 1;
                },
            }
            Ok(ControlFlow::Continue(()))
        })?;
        let count = results.cover_count();
        cover_throttle.finish(progress, || format!("covers: {count} imported"));

        if progress.is_cancelled() {
            outcome = Outcome::Cancelled;
        }
        Ok(outcome)
    }
}

/// Read one record with a reader made for its type and encoding.
fn read_record(ctx: &ReadContext<'_>, record: &mut ArchiveReaderRecord<'_>) -> Result<ImportResults> {
    let (Some(record_type), Some(encoding)) = (record.record_type(), record.encoding()) else {
        exn::bail!(ErrorKind::format(format!("unreadable record {}", record.name())));
    };
    let mut reader = encoding
        .create_reader(record_type)
        .ok_or_raise(|| ErrorKind::Unsupported(format!("{record_type} as {encoding}")))?;
    reader.read(ctx, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::memory::{MemoryEntry, MemorySource};
    use crate::helper::UpdatePolicy;
    use crate::progress::TracingProgress;
    use crate::progress::testing::CancelAfterBooks;
    use folio_store::MockCoverStorage;
    use serde_json::json;

    fn entry(name: &str, data: impl Into<Vec<u8>>) -> MemoryEntry {
        MemoryEntry { name: name.to_string(), data: data.into(), modified: None, compress: true }
    }

    fn header(version: u32) -> MemoryEntry {
        entry("metadata.json", json!({ "metadata": { "version": version } }).to_string())
    }

    fn books_json(count: usize) -> MemoryEntry {
        let books: Vec<_> = (1..=count)
            .map(|n| json!({ "book_uuid": format!("00000000-0000-4000-8000-{n:012}"), "title": format!("Book {n}") }))
            .collect();
        entry("books.json", json!({ "books": books }).to_string())
    }

    struct Fixture {
        catalogue: Catalogue,
        covers: MockCoverStorage,
    }

    impl Fixture {
        fn new() -> Self {
            Self { catalogue: Catalogue::open_in_memory().unwrap(), covers: MockCoverStorage::new() }
        }

        fn reader(&self, entries: Vec<MemoryEntry>) -> ArchiveReader<'_, MemorySource> {
            ArchiveReader::new(MemorySource::new(entries), &self.catalogue, &self.covers, ImportHelper::default())
        }
    }

    #[test]
    fn test_metadata_is_read_once_and_source_reset() {
        let fixture = Fixture::new();
        let mut reader = fixture.reader(vec![books_json(1), header(5)]);
        assert_eq!(reader.read_metadata().unwrap().version, 5);
        assert_eq!(reader.read_metadata().unwrap().version, 5);
        reader.validate().unwrap();
        assert_eq!(reader.source.passes(), 1);
        assert_eq!(reader.source.resets(), 1);
    }

    #[test]
    fn test_missing_header_is_not_cached() {
        let fixture = Fixture::new();
        let mut reader = fixture.reader(vec![books_json(1)]);
        let err = reader.validate().unwrap_err();
        assert!(matches!(*err, ErrorKind::Format(_)));
        assert!(reader.metadata.is_none());
        assert_eq!(reader.source.resets(), 1);

        assert!(reader.read_metadata().is_err());
        assert_eq!(reader.source.resets(), 2);
    }

    #[test]
    fn test_unsupported_version() {
        let fixture = Fixture::new();
        let mut reader = fixture.reader(vec![header(6)]);
        let err = reader.validate().unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedVersion(6));
    }

    #[test]
    #[should_panic(expected = "before a successful validate")]
    fn test_read_requires_validate() {
        let fixture = Fixture::new();
        let mut reader = fixture.reader(vec![header(5)]);
        let _ = reader.read(&TracingProgress::default());
    }

    #[test]
    fn test_styles_and_preferences_are_read_first() {
        let fixture = Fixture::new();
        // The bookshelf refers to a style that only appears later in the archive.
        let entries = vec![
            header(5),
            entry("bookshelves.json", json!({ "bookshelves": [{ "name": "Favourites", "style": "s-1" }] }).to_string()),
            entry("preferences.json", json!({ "preferences": { "theme": "dark" } }).to_string()),
            entry(
                "styles.json",
                json!({ "styles": [{ "uuid": "s-1", "name": "Compact" }] }).to_string(),
            ),
        ];
        let mut reader = fixture.reader(entries);
        reader.validate().unwrap();
        assert_eq!(reader.read(&TracingProgress::default()).unwrap(), Outcome::Completed);

        let results = reader.results();
        assert_eq!((results.styles, results.preferences, results.bookshelves), (1, 1, 1));
        assert_eq!(results.records_skipped, 0);
        // header pass, one seek pass each for styles and preferences, then the main pass
        assert_eq!(reader.source.passes(), 4);
        let shelf = fixture.catalogue.bookshelves().find_by_name("Favourites").unwrap().unwrap();
        assert_eq!(shelf.style_uuid.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_unknown_and_unrequested_records_are_skipped() {
        let fixture = Fixture::new();
        let entries = vec![header(5), entry("notes.txt", "hello"), books_json(2), entry("cover.bin", "x")];
        let helper = ImportHelper::new([RecordType::Styles], UpdatePolicy::Overwrite);
        let mut reader =
            ArchiveReader::new(MemorySource::new(entries), &fixture.catalogue, &fixture.covers, helper);
        reader.validate().unwrap();
        reader.read(&TracingProgress::default()).unwrap();
        assert_eq!(reader.results().records_skipped, 3);
        assert_eq!(fixture.catalogue.books().count().unwrap(), 0);
    }

    #[test]
    fn test_cancel_keeps_partial_results() {
        let fixture = Fixture::new();
        let mut reader = fixture.reader(vec![header(5), books_json(25)]);
        reader.validate().unwrap();
        let outcome = reader.read(&CancelAfterBooks::new(12)).unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(reader.results().books_created, 12);
        assert_eq!(fixture.catalogue.books().count().unwrap(), 12);
    }

    #[test]
    fn test_read_version_2_xml_and_csv() {
        let fixture = Fixture::new();
        let entries = vec![
            entry("INFO.xml", r#"<metadata><int name="version" value="2"/><int name="books" value="1"/></metadata>"#),
            entry("preferences.xml", r#"<preferences><boolean name="compact" value="true"/></preferences>"#),
            entry(
                "export.csv",
                "_id,uuid,title,author_details\n5,5a1d2c3b-0000-4000-8000-000000000001,Solaris,Stanisław Lem\n",
            ),
        ];
        let mut reader = fixture.reader(entries);
        reader.validate().unwrap();
        reader.read(&TracingProgress::default()).unwrap();
        assert_eq!(reader.results().books_created, 1);
        assert_eq!(reader.results().preferences, 1);
        assert_eq!(fixture.catalogue.books().get(5).unwrap().unwrap().title, "Solaris");
        assert_eq!(fixture.catalogue.preferences().get("compact").unwrap(), Some(json!(true)));
    }

    #[test]
    fn test_version_1_ignores_preferences() {
        let fixture = Fixture::new();
        let entries = vec![
            entry("INFO.xml", r#"<info-list><info version="1"><string name="creator" value="Book Catalogue"/></info></info-list>"#),
            entry("preferences.xml", r#"<preferences><boolean name="compact" value="true"/></preferences>"#),
        ];
        let mut reader = fixture.reader(entries);
        assert_eq!(reader.read_metadata().unwrap().version, 1);
        reader.validate().unwrap();
        reader.read(&TracingProgress::default()).unwrap();
        assert_eq!(reader.results().preferences, 0);
        assert_eq!(reader.results().records_skipped, 1);
        assert_eq!(fixture.catalogue.preferences().get("compact").unwrap(), None);
    }

    #[test]
    fn test_books_as_xml_are_unsupported() {
        let fixture = Fixture::new();
        let mut reader = fixture.reader(vec![header(5), entry("books.xml", "<books/>")]);
        reader.validate().unwrap();
        let err = reader.read(&TracingProgress::default()).unwrap_err();
        assert!(matches!(*err, ErrorKind::Unsupported(_)));
    }
}
