//! Pre-compiled statements that lock according to what they do.

use exn::{OptionExt, ResultExt};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params_from_iter};

use crate::db::SynchronizedDb;
use crate::error::{ErrorKind, Result};
use crate::sync::SyncLock;

/// A SQL statement bound to a [`SynchronizedDb`].
///
/// Statements starting with `SELECT` are read-only and run under a shared
/// lock; everything else runs under the exclusive lock. Parameters are bound
/// per call. SQLite's statement cache keeps the compiled form around between
/// calls.
#[derive(Debug)]
pub struct SynchronizedStatement<'db> {
    db: &'db SynchronizedDb,
    sql: String,
    read_only: bool,
}

impl<'db> SynchronizedStatement<'db> {
    pub(crate) fn new(db: &'db SynchronizedDb, sql: &str) -> Result<Self> {
        let read_only = sql.trim_start().get(..6).is_some_and(|head| head.eq_ignore_ascii_case("select"));
        let statement = Self { db, sql: sql.to_string(), read_only };
        {
            let _lock = statement.lock()?;
            statement.db.conn().prepare_cached(&statement.sql).or_raise(|| ErrorKind::Database)?;
        }
        Ok(statement)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn lock(&self) -> Result<Option<SyncLock<'db>>> {
        match self.read_only {
            true => Ok(self.db.read_lock()),
            false => self.db.write_lock(),
        }
    }

    /// Run the statement, discarding any rows. Returns the changed row count
    /// for writes and zero for reads.
    pub fn execute(&self, args: &[Value]) -> Result<usize> {
        let _lock = self.lock()?;
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(&self.sql).or_raise(|| ErrorKind::Database)?;
        if self.read_only {
            let mut rows = stmt.query(params_from_iter(args.iter())).or_raise(|| ErrorKind::Database)?;
            while rows.next().or_raise(|| ErrorKind::Database)?.is_some() {}
            return Ok(0);
        }
        stmt.execute(params_from_iter(args.iter())).or_raise(|| ErrorKind::Database)
    }

    /// Run an `INSERT` and return the new rowid, or `None` if nothing was
    /// inserted (e.g. `INSERT OR IGNORE` hitting a conflict).
    pub fn execute_insert(&self, args: &[Value]) -> Result<Option<i64>> {
        let _lock = self.db.write_lock()?;
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(&self.sql).or_raise(|| ErrorKind::Database)?;
        let changed = stmt.execute(params_from_iter(args.iter())).or_raise(|| ErrorKind::Database)?;
        Ok((changed > 0).then(|| conn.last_insert_rowid()))
    }

    /// Run an `UPDATE` or `DELETE` and return the changed row count.
    pub fn execute_update_delete(&self, args: &[Value]) -> Result<usize> {
        let _lock = self.db.write_lock()?;
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(&self.sql).or_raise(|| ErrorKind::Database)?;
        stmt.execute(params_from_iter(args.iter())).or_raise(|| ErrorKind::Database)
    }

    fn first_value(&self, args: &[Value]) -> Result<Option<Value>> {
        let _lock = self.lock()?;
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(&self.sql).or_raise(|| ErrorKind::Database)?;
        stmt.query_row(params_from_iter(args.iter()), |row| row.get::<_, Value>(0))
            .optional()
            .or_raise(|| ErrorKind::Database)
    }

    /// The first column of the first row as an integer.
    ///
    /// Fails with [`ErrorKind::NoRows`] when the query returns nothing.
    pub fn simple_query_for_long(&self, args: &[Value]) -> Result<i64> {
        let value = self.first_value(args)?.ok_or_raise(|| ErrorKind::NoRows)?;
        as_long(value)
    }

    /// Like [`simple_query_for_long`](Self::simple_query_for_long), but zero
    /// when the query returns nothing.
    pub fn simple_query_for_long_or_zero(&self, args: &[Value]) -> Result<i64> {
        match self.first_value(args)? {
            Some(value) => as_long(value),
            None => Ok(0),
        }
    }

    /// The first column of the first row as text.
    ///
    /// Fails with [`ErrorKind::NoRows`] when the query returns nothing.
    pub fn simple_query_for_string(&self, args: &[Value]) -> Result<String> {
        self.simple_query_for_string_or_none(args)?.ok_or_raise(|| ErrorKind::NoRows)
    }

    pub fn simple_query_for_string_or_none(&self, args: &[Value]) -> Result<Option<String>> {
        Ok(self.first_value(args)?.and_then(|value| match value {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(text) => Some(text),
            Value::Blob(blob) => Some(String::from_utf8_lossy(&blob).into_owned()),
        }))
    }

    /// Number of rows a read-only statement would return.
    pub fn count(&self, args: &[Value]) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM ({})", self.sql);
        let _lock = self.db.read_lock();
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(&sql).or_raise(|| ErrorKind::Database)?;
        stmt.query_row(params_from_iter(args.iter()), |row| row.get(0)).or_raise(|| ErrorKind::Database)
    }
}

fn as_long(value: Value) -> Result<i64> {
    match value {
        Value::Integer(i) => Ok(i),
        Value::Null => Ok(0),
        Value::Real(f) => Ok(f as i64),
        Value::Text(text) => text.trim().parse::<i64>().or_raise(|| ErrorKind::Database),
        Value::Blob(_) => exn::bail!(ErrorKind::Database),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Location, OpenOptions, Synchronizer};
    use rstest::{fixture, rstest};
    use std::sync::Arc;

    #[fixture]
    fn db() -> SynchronizedDb {
        SynchronizedDb::open(Arc::new(Synchronizer::new()), Location::Memory, &OpenOptions::default(), |conn| {
            conn.execute_batch(
                "CREATE TABLE shelves (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);
                 INSERT INTO shelves (name) VALUES ('Default'), ('Wishlist');",
            )
        })
        .unwrap()
    }

    #[rstest]
    #[case("SELECT name FROM shelves", true)]
    #[case("  select name FROM shelves", true)]
    #[case("INSERT INTO shelves (name) VALUES (?)", false)]
    #[case("DELETE FROM shelves", false)]
    fn read_only_detection(db: SynchronizedDb, #[case] sql: &str, #[case] read_only: bool) {
        assert_eq!(db.compile_statement(sql).unwrap().is_read_only(), read_only);
    }

    #[rstest]
    fn invalid_sql_fails_to_compile(db: SynchronizedDb) {
        let err = db.compile_statement("SELECT nope FROM nowhere").unwrap_err();
        assert_eq!(*err, ErrorKind::Database);
    }

    #[rstest]
    fn insert_returns_rowid(db: SynchronizedDb) {
        let insert = db.compile_statement("INSERT OR IGNORE INTO shelves (name) VALUES (?)").unwrap();
        let id = insert.execute_insert(&[Value::from("Read".to_string())]).unwrap();
        assert_eq!(id, Some(3));
        // Duplicate name: ignored, nothing inserted.
        assert_eq!(insert.execute_insert(&[Value::from("Read".to_string())]).unwrap(), None);
    }

    #[rstest]
    fn update_delete_counts_rows(db: SynchronizedDb) {
        let delete = db.compile_statement("DELETE FROM shelves WHERE name <> ?").unwrap();
        assert_eq!(delete.execute_update_delete(&[Value::from("Default".to_string())]).unwrap(), 1);
    }

    #[rstest]
    fn simple_queries(db: SynchronizedDb) {
        let id = db.compile_statement("SELECT id FROM shelves WHERE name = ?").unwrap();
        assert_eq!(id.simple_query_for_long(&[Value::from("Wishlist".to_string())]).unwrap(), 2);
        assert_eq!(id.simple_query_for_long_or_zero(&[Value::from("Missing".to_string())]).unwrap(), 0);
        assert_eq!(*id.simple_query_for_long(&[Value::from("Missing".to_string())]).unwrap_err(), ErrorKind::NoRows);

        let name = db.compile_statement("SELECT name FROM shelves WHERE id = ?").unwrap();
        assert_eq!(name.simple_query_for_string(&[Value::from(1)]).unwrap(), "Default");
        assert_eq!(name.simple_query_for_string_or_none(&[Value::from(9)]).unwrap(), None);
    }

    #[rstest]
    fn count_wraps_the_query(db: SynchronizedDb) {
        let all = db.compile_statement("SELECT * FROM shelves").unwrap();
        assert_eq!(all.count(&[]).unwrap(), 2);
    }
}
