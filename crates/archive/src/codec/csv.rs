//! CSV book records, as written by the oldest archive versions.

use ::csv::{ReaderBuilder, StringRecord, WriterBuilder};
use exn::ResultExt;
use folio_store::{Book, dates};
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use tracing::instrument;

use super::{ReadContext, RecordReader, RecordWriter, WriteContext, base};
use crate::error::{ErrorKind, Result};
use crate::metadata::ArchiveMetaData;
use crate::progress::Throttle;
use crate::record::{ArchiveReaderRecord, RecordType};
use crate::results::{ExportResults, ImportResults};

const COLUMNS: [&str; 12] = [
    "_id",
    "book_uuid",
    "title",
    "isbn",
    "author_details",
    "series_details",
    "publisher",
    "date_published",
    "description",
    "bookshelf",
    "date_added",
    "last_update_date",
];

/// Separator for multi-valued columns.
const LIST_SEPARATOR: char = '|';

/// Column positions by lower-cased header name.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Self(headers.iter().enumerate().map(|(index, name)| (name.trim().to_lowercase(), index)).collect())
    }

    fn get<'r>(&self, row: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.0.get(name).and_then(|index| row.get(*index)).map(str::trim).filter(|value| !value.is_empty())
    }

    fn list(&self, row: &StringRecord, name: &str) -> Vec<String> {
        self.get(row, name)
            .map(|value| value.split(LIST_SEPARATOR).map(str::trim).filter(|v| !v.is_empty()).map(String::from).collect())
            .unwrap_or_default()
    }

    fn decode(&self, row: &StringRecord) -> Result<(Book, Option<i64>)> {
        let uuid = self
            .get(row, "book_uuid")
            .or_else(|| self.get(row, "uuid"))
            .ok_or_else(|| exn::Exn::from(ErrorKind::format("book without a UUID")))?;
        let id = match self.get(row, "_id") {
            Some(id) => Some(id.parse::<i64>().or_raise(|| ErrorKind::format(format!("invalid id {id}")))?),
            None => None,
        };
        let text = |name| self.get(row, name).map(String::from);
        let book = Book {
            id: None,
            uuid: uuid.to_string(),
            title: text("title").unwrap_or_default(),
            isbn: text("isbn"),
            authors: self.list(row, "author_details"),
            series: text("series_details"),
            publisher: text("publisher"),
            date_published: text("date_published"),
            description: text("description"),
            bookshelves: self.list(row, "bookshelf"),
            calibre_library: None,
            date_added: self.get(row, "date_added").and_then(dates::parse_iso),
            last_updated: self.get(row, "last_update_date").and_then(dates::parse_iso),
        };
        Ok((book, id))
    }
}

/// Reads the books record from CSV.
#[derive(Debug, Default)]
pub struct CsvRecordReader;

impl CsvRecordReader {
    pub fn new() -> Self {
        Self
    }
}

impl RecordReader for CsvRecordReader {
    fn read_metadata(&mut self, _record: &mut ArchiveReaderRecord<'_>) -> Result<Option<ArchiveMetaData>> {
        Ok(None)
    }

    #[instrument(skip_all, fields(record = record.name()))]
    fn read(&mut self, ctx: &ReadContext<'_>, record: &mut ArchiveReaderRecord<'_>) -> Result<ImportResults> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(&mut *record);
        let headers = reader.headers().or_raise(|| ErrorKind::format("missing CSV header"))?.clone();
        let columns = Columns::new(&headers);
        if !columns.0.contains_key("book_uuid") && !columns.0.contains_key("uuid") {
            exn::bail!(ErrorKind::format("CSV has no uuid column"));
        }
        let rows = reader.into_records().enumerate().map(|(index, row)| {
            let parsed = row
                .or_raise(|| ErrorKind::format("unreadable CSV row"))
                .and_then(|row| columns.decode(&row));
            (index + 1, parsed)
        });
        base::import_books(ctx, rows)
    }
}

/// Writes the books record as CSV.
#[derive(Debug, Default)]
pub struct CsvRecordWriter;

impl CsvRecordWriter {
    pub fn new() -> Self {
        Self
    }
}

fn join(values: &[String]) -> String {
    values.join(&LIST_SEPARATOR.to_string())
}

impl RecordWriter for CsvRecordWriter {
    fn write_metadata(&mut self, _out: &mut dyn Write, _metadata: &ArchiveMetaData) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported("writing metadata as CSV".to_string()))
    }

    #[instrument(skip_all)]
    fn write(
        &mut self,
        ctx: &WriteContext<'_>,
        out: &mut dyn Write,
        types: &BTreeSet<RecordType>,
    ) -> Result<ExportResults> {
        let mut results = ExportResults::default();
        if !types.contains(&RecordType::Books) {
            return Ok(results);
        }
        let covers = types.contains(&RecordType::Cover);
        let mut writer = WriterBuilder::new().from_writer(&mut *out);
        writer.write_record(COLUMNS).or_raise(|| ErrorKind::Io)?;

        let mut throttle = Throttle::default();
        for book in ctx.catalogue.books().for_export(ctx.since).or_raise(|| ErrorKind::Storage)? {
            if ctx.progress.is_cancelled() {
                break;
            }
            let book = book.or_raise(|| ErrorKind::Storage)?;
            let date = |date: Option<time::UtcDateTime>| date.map(dates::to_sql).unwrap_or_default();
            writer
                .write_record([
                    book.id.map(|id| id.to_string()).unwrap_or_default(),
                    book.uuid.clone(),
                    book.title.clone(),
                    book.isbn.clone().unwrap_or_default(),
                    join(&book.authors),
                    book.series.clone().unwrap_or_default(),
                    book.publisher.clone().unwrap_or_default(),
                    book.date_published.clone().unwrap_or_default(),
                    book.description.clone().unwrap_or_default(),
                    join(&book.bookshelves),
                    date(book.date_added),
                    date(book.last_updated),
                ])
                .or_raise(|| ErrorKind::Io)?;
            if covers {
                super::collect_covers(ctx, &book, &mut results)?;
            }
            results.books += 1;
            throttle.tick(ctx.progress, || format!("books: {} exported", results.books));
        }
        throttle.finish(ctx.progress, || format!("books: {} exported", results.books));
        writer.flush().or_raise(|| ErrorKind::Io)?;
        if results.books > 0 {
            results.record_types.insert(RecordType::Books);
        }
        Ok(results)
    }
}
