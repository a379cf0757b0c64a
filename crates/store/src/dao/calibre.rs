use exn::{OptionExt, ResultExt};
use folio_dbsync::{Row, Value};

use super::{dao, opt_date, text};
use crate::dates;
use crate::error::{ErrorKind, Result};
use crate::models::{CalibreCustomField, CalibreLibrary};

dao! {
    /// Calibre content-server libraries and custom field mappings.
    CalibreDao
}

const LIBRARY_SELECT: &str = "SELECT l.id, l.library_string_id, l.uuid, l.name, l.last_sync_date, s.name
     FROM calibre_libraries AS l
     LEFT JOIN bookshelves AS s ON s.id = l.bookshelf_id";

fn library_from_row(row: &Row<'_>) -> rusqlite::Result<CalibreLibrary> {
    let last_sync: Option<String> = row.get(4)?;
    Ok(CalibreLibrary {
        id: row.get(0)?,
        library_string_id: row.get(1)?,
        uuid: row.get(2)?,
        name: row.get(3)?,
        last_sync: last_sync.as_deref().and_then(dates::parse_iso),
        bookshelf: row.get(5)?,
    })
}

fn field_from_row(row: &Row<'_>) -> rusqlite::Result<CalibreCustomField> {
    Ok(CalibreCustomField { calibre_key: row.get(0)?, kind: row.get(1)?, db_key: row.get(2)? })
}

impl CalibreDao<'_> {
    // =========================================================================
    // Libraries
    // =========================================================================

    pub fn library_by_string_id(&self, library_string_id: &str) -> Result<Option<CalibreLibrary>> {
        self.db()
            .query_row(
                &format!("{LIBRARY_SELECT} WHERE l.library_string_id = ?"),
                &[text(library_string_id)],
                library_from_row,
            )
            .or_raise(|| ErrorKind::Database)
    }

    /// Replace the library's id with the id of the stored library that has
    /// the same library string id.
    pub fn fix_library_id(&self, library: &mut CalibreLibrary) -> Result<Option<i64>> {
        library.id = self.library_by_string_id(&library.library_string_id)?.and_then(|stored| stored.id);
        Ok(library.id)
    }

    fn library_values(&self, library: &CalibreLibrary) -> Result<Vec<(&'static str, Value)>> {
        let bookshelf_id = match &library.bookshelf {
            Some(name) => Value::Integer(self.catalogue.bookshelves().find_or_create(name)?),
            None => Value::Null,
        };
        Ok(vec![
            ("library_string_id", text(&library.library_string_id)),
            ("uuid", text(&library.uuid)),
            ("name", text(&library.name)),
            ("last_sync_date", opt_date(library.last_sync)),
            ("bookshelf_id", bookshelf_id),
        ])
    }

    pub fn insert_library(&self, library: &CalibreLibrary) -> Result<i64> {
        self.catalogue.write_transaction(|| {
            let values = self.library_values(library)?;
            self.db().insert("calibre_libraries", &values).or_raise(|| ErrorKind::Database)
        })
    }

    pub fn update_library(&self, library: &CalibreLibrary) -> Result<()> {
        let id = library.id.ok_or_raise(|| ErrorKind::NotFound(library.library_string_id.clone()))?;
        self.catalogue.write_transaction(|| {
            let values = self.library_values(library)?;
            self.db()
                .update("calibre_libraries", &values, "id = ?", &[Value::Integer(id)])
                .or_raise(|| ErrorKind::Database)?;
            Ok(())
        })
    }

    pub fn libraries(&self) -> Result<Vec<CalibreLibrary>> {
        self.db()
            .query_map(&format!("{LIBRARY_SELECT} ORDER BY l.id"), &[], library_from_row)
            .or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Custom fields
    // =========================================================================

    pub fn custom_fields(&self) -> Result<Vec<CalibreCustomField>> {
        self.db()
            .query_map(
                "SELECT calibre_key, type, db_key FROM calibre_custom_fields ORDER BY calibre_key",
                &[],
                field_from_row,
            )
            .or_raise(|| ErrorKind::Database)
    }

    /// Insert or replace the mapping for a Calibre key. Returns `true` when it was new.
    pub fn upsert_custom_field(&self, field: &CalibreCustomField) -> Result<bool> {
        self.catalogue.write_transaction(|| {
            let existed = self
                .db()
                .query_row(
                    "SELECT 1 FROM calibre_custom_fields WHERE calibre_key = ?",
                    &[text(&field.calibre_key)],
                    |_| Ok(()),
                )
                .or_raise(|| ErrorKind::Database)?
                .is_some();
            self.db()
                .execute(
                    "INSERT INTO calibre_custom_fields (calibre_key, type, db_key) VALUES (?1, ?2, ?3)
                     ON CONFLICT (calibre_key) DO UPDATE SET type = excluded.type, db_key = excluded.db_key",
                    &[text(&field.calibre_key), text(&field.kind), text(&field.db_key)],
                )
                .or_raise(|| ErrorKind::Database)?;
            Ok(!existed)
        })
    }
}
