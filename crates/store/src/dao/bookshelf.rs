use exn::{OptionExt, ResultExt};
use folio_dbsync::{Row, Value};

use super::{dao, opt_text, text};
use crate::error::{ErrorKind, Result};
use crate::models::Bookshelf;

dao! {
    BookshelfDao
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Bookshelf> {
    Ok(Bookshelf { id: row.get(0)?, name: row.get(1)?, style_uuid: row.get(2)? })
}

impl BookshelfDao<'_> {
    pub fn find_by_name(&self, name: &str) -> Result<Option<Bookshelf>> {
        self.db()
            .query_row("SELECT id, name, style_uuid FROM bookshelves WHERE name = ?", &[text(name)], from_row)
            .or_raise(|| ErrorKind::Database)
    }

    /// Replace the shelf's id with the id of the stored shelf of the same name.
    ///
    /// Ids in imported data belong to another database; the name is what
    /// identifies a shelf. Returns the fixed id, or `None` (and clears the id)
    /// when no such shelf exists.
    pub fn fix_id(&self, bookshelf: &mut Bookshelf) -> Result<Option<i64>> {
        bookshelf.id = self.find_by_name(&bookshelf.name)?.and_then(|stored| stored.id);
        Ok(bookshelf.id)
    }

    pub fn insert(&self, bookshelf: &Bookshelf) -> Result<i64> {
        self.db()
            .insert(
                "bookshelves",
                &[("name", text(&bookshelf.name)), ("style_uuid", opt_text(bookshelf.style_uuid.as_deref()))],
            )
            .or_raise(|| ErrorKind::Database)
    }

    pub fn update(&self, bookshelf: &Bookshelf) -> Result<()> {
        let id = bookshelf.id.ok_or_raise(|| ErrorKind::NotFound(bookshelf.name.clone()))?;
        let changed = self
            .db()
            .update(
                "bookshelves",
                &[("name", text(&bookshelf.name)), ("style_uuid", opt_text(bookshelf.style_uuid.as_deref()))],
                "id = ?",
                &[Value::Integer(id)],
            )
            .or_raise(|| ErrorKind::Database)?;
        match changed {
            0 => exn::bail!(ErrorKind::NotFound(bookshelf.name.clone())),
            _ => Ok(()),
        }
    }

    /// Id of the named shelf, creating it (without a style) if needed.
    pub fn find_or_create(&self, name: &str) -> Result<i64> {
        self.catalogue.write_transaction(|| match self.find_by_name(name)?.and_then(|shelf| shelf.id) {
            Some(id) => Ok(id),
            None => self.insert(&Bookshelf::new(name)),
        })
    }

    pub fn all(&self) -> Result<Vec<Bookshelf>> {
        self.db()
            .query_map("SELECT id, name, style_uuid FROM bookshelves ORDER BY id", &[], from_row)
            .or_raise(|| ErrorKind::Database)
    }

    /// Names of the shelves a book is on.
    pub fn names_for_book(&self, book_id: i64) -> Result<Vec<String>> {
        self.db()
            .query_map(
                "SELECT s.name FROM bookshelves AS s
                 JOIN book_bookshelf AS bs ON bs.bookshelf_id = s.id
                 WHERE bs.book_id = ? ORDER BY s.name",
                &[Value::Integer(book_id)],
                |row| row.get(0),
            )
            .or_raise(|| ErrorKind::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Catalogue;

    #[test]
    fn test_fix_id_by_name() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let shelves = catalogue.bookshelves();
        let id = shelves.insert(&Bookshelf::new("To Read")).unwrap();

        let mut imported = Bookshelf { id: Some(99), name: "to read".to_string(), style_uuid: None };
        assert_eq!(shelves.fix_id(&mut imported).unwrap(), Some(id));

        let mut unknown = Bookshelf { id: Some(99), ..Bookshelf::new("Elsewhere") };
        assert_eq!(shelves.fix_id(&mut unknown).unwrap(), None);
        assert_eq!(unknown.id, None);
    }

    #[test]
    fn test_find_or_create_is_stable() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let shelves = catalogue.bookshelves();
        let first = shelves.find_or_create("Favourites").unwrap();
        assert_eq!(shelves.find_or_create("Favourites").unwrap(), first);
        assert_eq!(shelves.all().unwrap().len(), 1);
    }

    #[test]
    fn test_update_unknown_shelf() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let err = catalogue.bookshelves().update(&Bookshelf { id: Some(5), ..Bookshelf::new("Ghost") }).unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("Ghost".to_string()));
    }
}
