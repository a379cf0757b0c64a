use exn::ResultExt;
use folio_dbsync::{CursorRow, Value};
use time::UtcDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{dao, opt_date, opt_text, text};
use crate::dates;
use crate::error::{Error, ErrorKind, Result};
use crate::models::{Book, WriteFlags};

dao! {
    /// Books, and their links to bookshelves and Calibre libraries.
    BookDao
}

impl TryFrom<CursorRow> for Book {
    type Error = Error;
    fn try_from(row: CursorRow) -> Result<Self> {
        let get_text = |column: &'static str| -> Result<Option<String>> {
            row.get_by_name::<Option<String>>(column).or_raise(|| ErrorKind::InvalidData(column))
        };
        let authors = get_text("authors")?.unwrap_or_else(|| "[]".to_string());
        Ok(Self {
            id: Some(row.get_by_name("id").or_raise(|| ErrorKind::InvalidData("id"))?),
            uuid: get_text("uuid")?.unwrap_or_default(),
            title: get_text("title")?.unwrap_or_default(),
            isbn: get_text("isbn")?,
            authors: serde_json::from_str(&authors).or_raise(|| ErrorKind::InvalidData("authors"))?,
            series: get_text("series")?,
            publisher: get_text("publisher")?,
            date_published: get_text("date_published")?,
            description: get_text("description")?,
            bookshelves: Vec::new(),
            calibre_library: get_text("calibre_library")?,
            date_added: get_text("date_added")?.as_deref().and_then(dates::parse_iso),
            last_updated: get_text("last_updated")?.as_deref().and_then(dates::parse_iso),
        })
    }
}

impl<'a> BookDao<'a> {
    // =========================================================================
    // Lookups
    // =========================================================================

    /// Id of the book with the given UUID.
    pub fn lookup_by_uuid(&self, uuid: &str) -> Result<Option<i64>> {
        self.db()
            .query_row("SELECT id FROM books WHERE uuid = ?", &[text(uuid)], |row| row.get(0))
            .or_raise(|| ErrorKind::Database)
    }

    pub fn exists(&self, id: i64) -> Result<bool> {
        let found = self
            .db()
            .query_row("SELECT 1 FROM books WHERE id = ?", &[Value::Integer(id)], |_| Ok(()))
            .or_raise(|| ErrorKind::Database)?;
        Ok(found.is_some())
    }

    /// When the book was last modified, if it exists and the stored date is readable.
    pub fn last_update(&self, id: i64) -> Result<Option<UtcDateTime>> {
        let date: Option<String> = self
            .db()
            .query_row("SELECT last_updated FROM books WHERE id = ?", &[Value::Integer(id)], |row| row.get(0))
            .or_raise(|| ErrorKind::Database)?;
        Ok(date.as_deref().and_then(dates::parse_iso))
    }

    pub fn get(&self, id: i64) -> Result<Option<Book>> {
        let mut rows = self
            .db()
            .raw_query(include_str!("../../queries/book_by_id.sql"), vec![Value::Integer(id)])
            .or_raise(|| ErrorKind::Database)?;
        match rows.next() {
            Some(row) => Ok(Some(self.complete(row.or_raise(|| ErrorKind::Database)?)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<usize> {
        self.count_for_export(None)
    }

    /// Number of books modified after `since`, or all books when `None`.
    pub fn count_for_export(&self, since: Option<UtcDateTime>) -> Result<usize> {
        let count: i64 = self
            .db()
            .compile_statement("SELECT COUNT(*) FROM books WHERE ?1 IS NULL OR last_updated > ?1")
            .and_then(|statement| statement.simple_query_for_long_or_zero(&[opt_date(since)]))
            .or_raise(|| ErrorKind::Database)?;
        usize::try_from(count).or_raise(|| ErrorKind::InvalidData("book count"))
    }

    /// Stream the books modified after `since` (all books when `None`), in id order.
    ///
    /// Rows are fetched in windows, so writers are not kept out for the whole
    /// iteration.
    pub fn for_export(self, since: Option<UtcDateTime>) -> Result<impl Iterator<Item = Result<Book>> + 'a> {
        let dao = self;
        let rows = self
            .db()
            .raw_query(include_str!("../../queries/books_for_export.sql"), vec![opt_date(since)])
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.map(move |row| dao.complete(row.or_raise(|| ErrorKind::Database)?)))
    }

    fn complete(&self, row: CursorRow) -> Result<Book> {
        let mut book = Book::try_from(row)?;
        if let Some(id) = book.id {
            book.bookshelves = self.catalogue.bookshelves().names_for_book(id)?;
        }
        Ok(book)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn values(&self, book: &Book, last_updated: UtcDateTime) -> Result<Vec<(&'static str, Value)>> {
        let library_id = match &book.calibre_library {
            Some(library) => match self.catalogue.calibre().library_by_string_id(library)? {
                Some(stored) => stored.id.map_or(Value::Null, Value::Integer),
                None => {
                    debug!(library, "book references an unknown Calibre library");
                    Value::Null
                },
            },
            None => Value::Null,
        };
        let authors = serde_json::to_string(&book.authors).or_raise(|| ErrorKind::InvalidData("authors"))?;
        Ok(vec![
            ("title", text(&book.title)),
            ("isbn", opt_text(book.isbn.as_deref())),
            ("authors", text(authors)),
            ("series", opt_text(book.series.as_deref())),
            ("publisher", opt_text(book.publisher.as_deref())),
            ("date_published", opt_text(book.date_published.as_deref())),
            ("description", opt_text(book.description.as_deref())),
            ("calibre_library_id", library_id),
            ("last_updated", text(dates::to_sql(last_updated))),
        ])
    }

    fn last_updated(book: &Book, flags: WriteFlags) -> UtcDateTime {
        match (flags.use_update_date_if_present, book.last_updated) {
            (true, Some(date)) => date,
            _ => dates::now(),
        }
    }

    fn link_bookshelves(&self, id: i64, names: &[String]) -> Result<()> {
        self.db()
            .delete("book_bookshelf", "book_id = ?", &[Value::Integer(id)])
            .or_raise(|| ErrorKind::Database)?;
        let shelves = self.catalogue.bookshelves();
        for name in names {
            let shelf = shelves.find_or_create(name)?;
            self.db()
                .execute(
                    "INSERT OR IGNORE INTO book_bookshelf (book_id, bookshelf_id) VALUES (?, ?)",
                    &[Value::Integer(id), Value::Integer(shelf)],
                )
                .or_raise(|| ErrorKind::Database)?;
        }
        Ok(())
    }

    /// Insert a new book and return its id.
    ///
    /// A book without a UUID is given a fresh one. Bookshelves are created
    /// on demand.
    pub fn insert(&self, book: &Book, flags: WriteFlags) -> Result<i64> {
        self.catalogue.write_transaction(|| {
            let uuid = match book.uuid.is_empty() {
                true => Uuid::new_v4().to_string(),
                false => book.uuid.clone(),
            };
            let mut values = self.values(book, Self::last_updated(book, flags))?;
            values.push(("uuid", text(uuid)));
            values.push(("date_added", text(dates::to_sql(book.date_added.unwrap_or_else(dates::now)))));
            if let Some(id) = book.id.filter(|id| flags.use_id_if_present && *id > 0) {
                values.push(("id", Value::Integer(id)));
            }
            let id = self.db().insert("books", &values).or_raise(|| ErrorKind::Database)?;
            self.link_bookshelves(id, &book.bookshelves)?;
            Ok(id)
        })
    }

    /// Overwrite the stored book `id` with `book`. The UUID and date added are kept.
    pub fn update(&self, book: &Book, id: i64, flags: WriteFlags) -> Result<()> {
        self.catalogue.write_transaction(|| {
            let values = self.values(book, Self::last_updated(book, flags))?;
            let changed = self
                .db()
                .update("books", &values, "id = ?", &[Value::Integer(id)])
                .or_raise(|| ErrorKind::Database)?;
            if changed == 0 {
                exn::bail!(ErrorKind::NotFound(format!("book {id}")));
            }
            self.link_bookshelves(id, &book.bookshelves)
        })
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let deleted = self
            .db()
            .delete("books", "id = ?", &[Value::Integer(id)])
            .or_raise(|| ErrorKind::Database)?;
        Ok(deleted > 0)
    }
}
