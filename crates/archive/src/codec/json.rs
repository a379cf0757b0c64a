//! JSON records: one root object keyed by the record type name.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use exn::ResultExt;
use folio_store::models::{Bookshelf, CalibreCustomField, CalibreLibrary, Certificate, Style};
use folio_store::{Book, Catalogue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use time::UtcDateTime;
use tracing::{debug, instrument};

use super::{ReadContext, RecordReader, RecordWriter, WriteContext, base};
use crate::error::{ErrorKind, Result};
use crate::helper::UpdatePolicy;
use crate::metadata::ArchiveMetaData;
use crate::progress::Throttle;
use crate::record::{ArchiveReaderRecord, RecordType};
use crate::results::{ExportResults, ImportResults};

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StyleJson {
    uuid: String,
    name: String,
    #[serde(default)]
    preferred: bool,
    #[serde(default)]
    menu_position: i64,
    #[serde(default)]
    settings: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CertificateJson {
    der: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BookshelfJson {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    style: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CalibreLibraryJson {
    library_string_id: String,
    uuid: String,
    name: String,
    #[serde(default, with = "super::date", skip_serializing_if = "Option::is_none")]
    last_sync_date: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bookshelf: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CalibreCustomFieldJson {
    calibre_key: String,
    #[serde(rename = "type")]
    kind: String,
    db_key: String,
}

/// Version 3 archives embed whole objects where later versions only name them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reference<T> {
    Name(String),
    Embedded(T),
}

#[derive(Debug, Serialize, Deserialize)]
struct BookJson<S, L> {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    book_uuid: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "Vec::new", skip_serializing_if = "Vec::is_empty")]
    bookshelves: Vec<S>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    calibre_library: Option<L>,
    #[serde(default, with = "super::date", skip_serializing_if = "Option::is_none")]
    date_added: Option<UtcDateTime>,
    #[serde(default, with = "super::date", skip_serializing_if = "Option::is_none")]
    last_updated: Option<UtcDateTime>,
}

type BookIn = BookJson<Reference<BookshelfJson>, Reference<CalibreLibraryJson>>;
type BookOut<'a> = BookJson<&'a str, &'a str>;

impl From<Style> for StyleJson {
    fn from(style: Style) -> Self {
        Self {
            uuid: style.uuid,
            name: style.name,
            preferred: style.preferred,
            menu_position: style.menu_position,
            settings: style.settings,
        }
    }
}

impl From<StyleJson> for Style {
    fn from(json: StyleJson) -> Self {
        Self {
            uuid: json.uuid,
            name: json.name,
            preferred: json.preferred,
            menu_position: json.menu_position,
            settings: json.settings,
        }
    }
}

impl From<BookshelfJson> for Bookshelf {
    fn from(json: BookshelfJson) -> Self {
        Self { id: None, name: json.name, style_uuid: json.style }
    }
}

impl From<CalibreLibraryJson> for CalibreLibrary {
    fn from(json: CalibreLibraryJson) -> Self {
        Self {
            id: None,
            library_string_id: json.library_string_id,
            uuid: json.uuid,
            name: json.name,
            last_sync: json.last_sync_date,
            bookshelf: json.bookshelf,
        }
    }
}

impl<'a> From<&'a Book> for BookOut<'a> {
    fn from(book: &'a Book) -> Self {
        Self {
            id: book.id,
            book_uuid: book.uuid.clone(),
            title: book.title.clone(),
            isbn: book.isbn.clone(),
            authors: book.authors.clone(),
            series: book.series.clone(),
            publisher: book.publisher.clone(),
            date_published: book.date_published.clone(),
            description: book.description.clone(),
            bookshelves: book.bookshelves.iter().map(String::as_str).collect(),
            calibre_library: book.calibre_library.as_deref(),
            date_added: book.date_added,
            last_updated: book.last_updated,
        }
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Reads one record type from a JSON entry.
#[derive(Debug)]
pub struct JsonRecordReader {
    record_type: RecordType,
}

impl JsonRecordReader {
    pub fn new(record_type: RecordType) -> Self {
        Self { record_type }
    }
}

fn parse_root(record: &mut ArchiveReaderRecord<'_>) -> Result<Map<String, Value>> {
    let name = record.name().to_string();
    serde_json::from_reader(record).or_raise(|| ErrorKind::format(format!("invalid JSON in {name}")))
}

fn take<T: DeserializeOwned>(root: &mut Map<String, Value>, record_type: RecordType) -> Result<Option<T>> {
    match root.remove(record_type.name()) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .or_raise(|| ErrorKind::format(format!("malformed {record_type} record"))),
    }
}

impl RecordReader for JsonRecordReader {
    fn read_metadata(&mut self, record: &mut ArchiveReaderRecord<'_>) -> Result<Option<ArchiveMetaData>> {
        let mut root = parse_root(record)?;
        take(&mut root, RecordType::MetaData)
    }

    #[instrument(skip_all, fields(record = record.name()))]
    fn read(&mut self, ctx: &ReadContext<'_>, record: &mut ArchiveReaderRecord<'_>) -> Result<ImportResults> {
        let mut root = parse_root(record)?;
        let mut results = ImportResults::default();
        let catalogue = ctx.catalogue;
        let policy = ctx.helper.update_policy;

        match self.record_type {
            RecordType::Styles => {
                let Some(styles) = take::<Vec<StyleJson>>(&mut root, RecordType::Styles)? else {
                    return Ok(results);
                };
                let count = styles.len();
                catalogue
                    .write_transaction(|| {
                        for style in styles {
                            catalogue.styles().upsert(&Style::from(style))?;
                        }
                        Ok(())
                    })
                    .or_raise(|| ErrorKind::Storage)?;
                results.styles = count;
            },
            RecordType::Preferences => {
                let Some(values) = take::<BTreeMap<String, Value>>(&mut root, RecordType::Preferences)? else {
                    return Ok(results);
                };
                catalogue.preferences().set_all(&values).or_raise(|| ErrorKind::Storage)?;
                results.preferences = 1;
            },
            RecordType::Certificates => {
                let Some(certificates) = take::<BTreeMap<String, CertificateJson>>(&mut root, RecordType::Certificates)?
                else {
                    return Ok(results);
                };
                for (name, json) in certificates {
                    let der = BASE64
                        .decode(json.der.as_bytes())
                        .or_raise(|| ErrorKind::format(format!("certificate {name} is not base64")))?;
                    catalogue.certificates().upsert(&Certificate { name, der }).or_raise(|| ErrorKind::Storage)?;
                    results.certificates += 1;
                }
            },
            RecordType::Bookshelves => {
                let Some(shelves) = take::<Vec<BookshelfJson>>(&mut root, RecordType::Bookshelves)? else {
                    return Ok(results);
                };
                let count = shelves.len();
                catalogue
                    .write_transaction(|| {
                        for shelf in shelves {
                            import_bookshelf(catalogue, Bookshelf::from(shelf), policy)?;
                        }
                        Ok(())
                    })
                    .or_raise(|| ErrorKind::Storage)?;
                results.bookshelves = count;
            },
            RecordType::CalibreLibraries => {
                let Some(libraries) = take::<Vec<CalibreLibraryJson>>(&mut root, RecordType::CalibreLibraries)? else {
                    return Ok(results);
                };
                let count = libraries.len();
                catalogue
                    .write_transaction(|| {
                        for library in libraries {
                            import_library(catalogue, CalibreLibrary::from(library), policy)?;
                        }
                        Ok(())
                    })
                    .or_raise(|| ErrorKind::Storage)?;
                results.calibre_libraries = count;
            },
            RecordType::CalibreCustomFields => {
                let Some(fields) = take::<Vec<CalibreCustomFieldJson>>(&mut root, RecordType::CalibreCustomFields)?
                else {
                    return Ok(results);
                };
                for field in fields {
                    let field = CalibreCustomField { calibre_key: field.calibre_key, kind: field.kind, db_key: field.db_key };
                    catalogue.calibre().upsert_custom_field(&field).or_raise(|| ErrorKind::Storage)?;
                    results.calibre_custom_fields += 1;
                }
            },
            RecordType::Books => {
                let Some(books) = take::<Vec<Value>>(&mut root, RecordType::Books)? else {
                    return Ok(results);
                };
                if ctx.progress.max_steps() < books.len() {
                    ctx.progress.set_max_steps(books.len());
                }
                let rows = books
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| (index + 1, decode_book(ctx, value)));
                results = base::import_books(ctx, rows)?;
            },
            other => exn::bail!(ErrorKind::Unsupported(format!("reading {other} from JSON"))),
        }
        results.record_types.insert(self.record_type);
        debug!(?results, "read JSON record");
        Ok(results)
    }
}

fn import_bookshelf(catalogue: &Catalogue, mut shelf: Bookshelf, policy: UpdatePolicy) -> folio_store::error::Result<()> {
    let shelves = catalogue.bookshelves();
    match shelves.fix_id(&mut shelf)? {
        Some(_) if policy == UpdatePolicy::Overwrite => shelves.update(&shelf),
        Some(_) => Ok(()),
        None => shelves.insert(&shelf).map(drop),
    }
}

fn import_library(
    catalogue: &Catalogue,
    mut library: CalibreLibrary,
    policy: UpdatePolicy,
) -> folio_store::error::Result<()> {
    let calibre = catalogue.calibre();
    match calibre.fix_library_id(&mut library)? {
        Some(_) if policy == UpdatePolicy::Overwrite => calibre.update_library(&library),
        Some(_) => Ok(()),
        None => calibre.insert_library(&library).map(drop),
    }
}

/// Decode one book, creating any shelves or library it embeds.
fn decode_book(ctx: &ReadContext<'_>, value: Value) -> Result<(Book, Option<i64>)> {
    let json: BookIn = serde_json::from_value(value).or_raise(|| ErrorKind::format("malformed book"))?;
    if json.book_uuid.is_empty() {
        exn::bail!(ErrorKind::format("book without a UUID"));
    }
    let policy = ctx.helper.update_policy;
    let mut bookshelves = Vec::with_capacity(json.bookshelves.len());
    for shelf in json.bookshelves {
        bookshelves.push(match shelf {
            Reference::Name(name) => name,
            Reference::Embedded(shelf) => {
                let name = shelf.name.clone();
                import_bookshelf(ctx.catalogue, Bookshelf::from(shelf), policy).or_raise(|| ErrorKind::Storage)?;
                name
            },
        });
    }
    let calibre_library = match json.calibre_library {
        None => None,
        Some(Reference::Name(id)) => Some(id),
        Some(Reference::Embedded(library)) => {
            let id = library.library_string_id.clone();
            import_library(ctx.catalogue, CalibreLibrary::from(library), policy).or_raise(|| ErrorKind::Storage)?;
            Some(id)
        },
    };
    let book = Book {
        id: None,
        uuid: json.book_uuid,
        title: json.title,
        isbn: json.isbn,
        authors: json.authors,
        series: json.series,
        publisher: json.publisher,
        date_published: json.date_published,
        description: json.description,
        bookshelves,
        calibre_library,
        date_added: json.date_added,
        last_updated: json.last_updated,
    };
    Ok((book, json.id))
}

// =============================================================================
// Writer
// =============================================================================

/// Writes one record type as a JSON entry.
#[derive(Debug)]
pub struct JsonRecordWriter {
    record_type: RecordType,
}

impl JsonRecordWriter {
    pub fn new(record_type: RecordType) -> Self {
        Self { record_type }
    }
}

fn write_root<T: Serialize>(out: &mut dyn Write, record_type: RecordType, value: &T) -> Result<()> {
    let root = BTreeMap::from([(record_type.name(), value)]);
    serde_json::to_writer(out, &root).or_raise(|| ErrorKind::Io)
}

impl RecordWriter for JsonRecordWriter {
    fn write_metadata(&mut self, out: &mut dyn Write, metadata: &ArchiveMetaData) -> Result<()> {
        write_root(out, RecordType::MetaData, metadata)
    }

    #[instrument(skip_all, fields(record = %self.record_type))]
    fn write(
        &mut self,
        ctx: &WriteContext<'_>,
        out: &mut dyn Write,
        types: &BTreeSet<RecordType>,
    ) -> Result<ExportResults> {
        let mut results = ExportResults::default();
        if !types.contains(&self.record_type) {
            return Ok(results);
        }
        let catalogue = ctx.catalogue;
        let written = match self.record_type {
            RecordType::Styles => {
                let styles: Vec<StyleJson> =
                    catalogue.styles().all().or_raise(|| ErrorKind::Storage)?.into_iter().map(Into::into).collect();
                results.styles = styles.len();
                write_non_empty(out, self.record_type, &styles, results.styles)?
            },
            RecordType::Preferences => {
                let preferences = catalogue.preferences().all().or_raise(|| ErrorKind::Storage)?;
                results.preferences = usize::from(!preferences.is_empty());
                write_non_empty(out, self.record_type, &preferences, results.preferences)?
            },
            RecordType::Certificates => {
                let certificates: BTreeMap<String, CertificateJson> = catalogue
                    .certificates()
                    .all()
                    .or_raise(|| ErrorKind::Storage)?
                    .into_iter()
                    .map(|cert| (cert.name, CertificateJson { der: BASE64.encode(cert.der) }))
                    .collect();
                results.certificates = certificates.len();
                write_non_empty(out, self.record_type, &certificates, results.certificates)?
            },
            RecordType::Bookshelves => {
                let shelves: Vec<BookshelfJson> = catalogue
                    .bookshelves()
                    .all()
                    .or_raise(|| ErrorKind::Storage)?
                    .into_iter()
                    .map(|shelf| BookshelfJson { name: shelf.name, style: shelf.style_uuid })
                    .collect();
                results.bookshelves = shelves.len();
                write_non_empty(out, self.record_type, &shelves, results.bookshelves)?
            },
            RecordType::CalibreLibraries => {
                let libraries: Vec<CalibreLibraryJson> = catalogue
                    .calibre()
                    .libraries()
                    .or_raise(|| ErrorKind::Storage)?
                    .into_iter()
                    .map(|library| CalibreLibraryJson {
                        library_string_id: library.library_string_id,
                        uuid: library.uuid,
                        name: library.name,
                        last_sync_date: library.last_sync,
                        bookshelf: library.bookshelf,
                    })
                    .collect();
                results.calibre_libraries = libraries.len();
                write_non_empty(out, self.record_type, &libraries, results.calibre_libraries)?
            },
            RecordType::CalibreCustomFields => {
                let fields: Vec<CalibreCustomFieldJson> = catalogue
                    .calibre()
                    .custom_fields()
                    .or_raise(|| ErrorKind::Storage)?
                    .into_iter()
                    .map(|field| CalibreCustomFieldJson {
                        calibre_key: field.calibre_key,
                        kind: field.kind,
                        db_key: field.db_key,
                    })
                    .collect();
                results.calibre_custom_fields = fields.len();
                write_non_empty(out, self.record_type, &fields, results.calibre_custom_fields)?
            },
            RecordType::Books => {
                write_books(ctx, out, types.contains(&RecordType::Cover), &mut results)?;
                results.books > 0
            },
            other => exn::bail!(ErrorKind::Unsupported(format!("writing {other} as JSON"))),
        };
        if written {
            results.record_types.insert(self.record_type);
        }
        Ok(results)
    }
}

/// Write the record unless it holds nothing.
fn write_non_empty<T: Serialize>(out: &mut dyn Write, record_type: RecordType, items: &T, count: usize) -> Result<bool> {
    if count == 0 {
        return Ok(false);
    }
    write_root(out, record_type, items)?;
    Ok(true)
}

/// Stream books as `{"books":[...]}`, one book at a time.
fn write_books(ctx: &WriteContext<'_>, out: &mut dyn Write, covers: bool, results: &mut ExportResults) -> Result<()> {
    let mut throttle = Throttle::default();
    write!(out, r#"{{"{}":["#, RecordType::Books.name()).or_raise(|| ErrorKind::Io)?;
    for book in ctx.catalogue.books().for_export(ctx.since).or_raise(|| ErrorKind::Storage)? {
        if ctx.progress.is_cancelled() {
            break;
        }
        let book = book.or_raise(|| ErrorKind::Storage)?;
        if results.books > 0 {
            out.write_all(b",").or_raise(|| ErrorKind::Io)?;
        }
        serde_json::to_writer(&mut *out, &BookOut::from(&book)).or_raise(|| ErrorKind::Io)?;
        if covers {
            super::collect_covers(ctx, &book, results)?;
        }
        results.books += 1;
        throttle.tick(ctx.progress, || format!("books: {} exported", results.books));
    }
    throttle.finish(ctx.progress, || format!("books: {} exported", results.books));
    out.write_all(b"]}").or_raise(|| ErrorKind::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::ImportHelper;
    use crate::progress::TracingProgress;
    use folio_store::MockCoverStorage;
    use serde_json::json;

    struct Fixture {
        catalogue: Catalogue,
        covers: MockCoverStorage,
        helper: ImportHelper,
        progress: TracingProgress,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                catalogue: Catalogue::open_in_memory().unwrap(),
                covers: MockCoverStorage::new(),
                helper: ImportHelper::default(),
                progress: TracingProgress::default(),
            }
        }

        fn read(&self, record_type: RecordType, name: &str, content: Value) -> ImportResults {
            let ctx = ReadContext {
                catalogue: &self.catalogue,
                covers: &self.covers,
                helper: &self.helper,
                progress: &self.progress,
            };
            let data = content.to_string().into_bytes();
            let mut reader = data.as_slice();
            let mut record = ArchiveReaderRecord::new(name, None, &mut reader);
            JsonRecordReader::new(record_type).read(&ctx, &mut record).unwrap()
        }

        fn write(&self, record_type: RecordType) -> (ExportResults, Value) {
            let ctx = WriteContext {
                catalogue: &self.catalogue,
                covers: &self.covers,
                progress: &self.progress,
                since: None,
            };
            let mut out = Vec::new();
            let results = JsonRecordWriter::new(record_type).write(&ctx, &mut out, &RecordType::ALL.into()).unwrap();
            let value = match out.is_empty() {
                true => Value::Null,
                false => serde_json::from_slice(&out).unwrap(),
            };
            (results, value)
        }
    }

    #[test]
    fn test_metadata_round_trip() {
        let header = ArchiveMetaData {
            version: 5,
            creator: Some("folio".to_string()),
            created: Some(time::macros::utc_datetime!(2024-02-03 04:05:06)),
            book_count: Some(2),
            cover_count: None,
        };
        let mut out = Vec::new();
        JsonRecordWriter::new(RecordType::MetaData).write_metadata(&mut out, &header).unwrap();
        let mut reader = out.as_slice();
        let mut record = ArchiveReaderRecord::new("metadata.json", None, &mut reader);
        let parsed = JsonRecordReader::new(RecordType::MetaData).read_metadata(&mut record).unwrap();
        assert_eq!(parsed, Some(header));
    }

    #[test]
    fn test_metadata_missing_root_key() {
        let mut reader: &[u8] = br#"{"books":[]}"#;
        let mut record = ArchiveReaderRecord::new("metadata.json", None, &mut reader);
        assert_eq!(JsonRecordReader::new(RecordType::MetaData).read_metadata(&mut record).unwrap(), None);
    }

    #[test]
    fn test_invalid_json_is_a_format_error() {
        let mut reader: &[u8] = b"{not json";
        let mut record = ArchiveReaderRecord::new("metadata.json", None, &mut reader);
        let err = JsonRecordReader::new(RecordType::MetaData).read_metadata(&mut record).unwrap_err();
        assert!(matches!(*err, ErrorKind::Format(_)));
    }

    #[test]
    fn test_read_v3_books_with_embedded_references() {
        let fixture = Fixture::new();
        let results = fixture.read(
            RecordType::Books,
            "books.json",
            json!({
                "books": [{
                    "_id": 12,
                    "book_uuid": "5c7f1d2e-0000-4000-8000-000000000001",
                    "title": "Hyperion",
                    "authors": ["Dan Simmons"],
                    "bookshelves": [{"name": "Sci-Fi"}, "Read"],
                    "calibre_library": {"library_string_id": "lib1", "uuid": "u-1", "name": "Main"},
                    "last_updated": "2021-04-05T06:07:08Z"
                }]
            }),
        );
        assert_eq!(results.books_created, 1);
        let book = fixture.catalogue.books().get(12).unwrap().unwrap();
        assert_eq!(book.title, "Hyperion");
        assert_eq!(book.calibre_library.as_deref(), Some("lib1"));
        let mut shelves = book.bookshelves.clone();
        shelves.sort();
        assert_eq!(shelves, ["Read", "Sci-Fi"]);
    }

    #[test]
    fn test_read_book_without_uuid_fails_the_row() {
        let fixture = Fixture::new();
        let results = fixture.read(RecordType::Books, "books.json", json!({"books": [{"book_uuid": "", "title": "?"}]}));
        assert_eq!(results.books_failed, 1);
        assert_eq!(results.failed_lines[0].0, 1);
        assert_eq!(fixture.catalogue.books().count().unwrap(), 0);
    }

    #[test]
    fn test_styles_and_preferences_round_trip() {
        let source = Fixture::new();
        let mut style = Style::new("4a9f7c2e-1b3d-4e5f-8a6b-7c8d9e0f1a2b", "Compact");
        style.settings.insert("group_by".to_string(), json!("author"));
        source.catalogue.styles().upsert(&style).unwrap();
        source.catalogue.preferences().set("theme", &json!("dark")).unwrap();

        let (style_results, styles) = source.write(RecordType::Styles);
        let (pref_results, preferences) = source.write(RecordType::Preferences);
        assert_eq!(style_results.styles, 1);
        assert_eq!(pref_results.preferences, 1);

        let target = Fixture::new();
        target.read(RecordType::Styles, "styles.json", styles);
        target.read(RecordType::Preferences, "preferences.json", preferences);
        assert_eq!(target.catalogue.styles().get(&style.uuid).unwrap(), Some(style));
        assert_eq!(target.catalogue.preferences().get("theme").unwrap(), Some(json!("dark")));
    }

    #[test]
    fn test_certificates_round_trip() {
        let source = Fixture::new();
        let cert = Certificate { name: "calibre_ca".to_string(), der: vec![0x30, 0x82, 0x01, 0x0a] };
        source.catalogue.certificates().upsert(&cert).unwrap();
        let (results, value) = source.write(RecordType::Certificates);
        assert_eq!(results.certificates, 1);

        let target = Fixture::new();
        assert_eq!(target.read(RecordType::Certificates, "certificates.json", value).certificates, 1);
        assert_eq!(target.catalogue.certificates().get("calibre_ca").unwrap(), Some(cert));
    }

    #[test]
    fn test_bookshelves_only_overwritten_when_requested() {
        let mut fixture = Fixture::new();
        let mut shelf = Bookshelf::new("Wishlist");
        shelf.style_uuid = Some("old".to_string());
        fixture.catalogue.bookshelves().insert(&shelf).unwrap();
        let record = json!({"bookshelves": [{"name": "Wishlist", "style": "new"}, {"name": "Loaned"}]});

        fixture.helper.update_policy = UpdatePolicy::OnlyNewer;
        fixture.read(RecordType::Bookshelves, "bookshelves.json", record.clone());
        let stored = fixture.catalogue.bookshelves().find_by_name("Wishlist").unwrap().unwrap();
        assert_eq!(stored.style_uuid.as_deref(), Some("old"));
        assert!(fixture.catalogue.bookshelves().find_by_name("Loaned").unwrap().is_some());

        fixture.helper.update_policy = UpdatePolicy::Overwrite;
        fixture.read(RecordType::Bookshelves, "bookshelves.json", record);
        let stored = fixture.catalogue.bookshelves().find_by_name("Wishlist").unwrap().unwrap();
        assert_eq!(stored.style_uuid.as_deref(), Some("new"));
    }

    #[test]
    fn test_empty_tables_write_nothing() {
        let fixture = Fixture::new();
        let (results, value) = fixture.write(RecordType::Certificates);
        assert!(!results.has(RecordType::Certificates));
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_books_written_by_reference() {
        let fixture = Fixture::new();
        let book = Book {
            uuid: "5c7f1d2e-0000-4000-8000-000000000002".to_string(),
            bookshelves: vec!["Read".to_string()],
            ..Book::new("Ilium")
        };
        fixture.catalogue.books().insert(&book, Default::default()).unwrap();
        fixture.covers.insert(&folio_store::cover_filename(&book.uuid, 0), b"jpg", folio_store::dates::now());

        let (results, value) = fixture.write(RecordType::Books);
        assert_eq!(results.books, 1);
        assert_eq!(results.cover_filenames, [format!("{}.jpg", book.uuid)]);
        assert_eq!(value["books"][0]["bookshelves"], json!(["Read"]));
        assert_eq!(value["books"][0]["book_uuid"], json!(book.uuid));
    }
}
