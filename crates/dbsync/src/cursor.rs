//! Windowed cursor over a query's results.

use std::collections::VecDeque;
use std::sync::Arc;

use exn::{OptionExt, ResultExt};
use rusqlite::params_from_iter;
use rusqlite::types::{FromSql, Value, ValueRef};

use crate::db::SynchronizedDb;
use crate::error::{ErrorKind, Result};

/// Rows fetched per shared-lock acquisition.
pub const WINDOW_SIZE: usize = 256;

/// One row of a [`SynchronizedCursor`], detached from the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl CursorRow {
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_raise(|| ErrorKind::Database)?;
        T::column_result(ValueRef::from(value)).or_raise(|| ErrorKind::Database)
    }

    pub fn get_by_name<T: FromSql>(&self, column: &str) -> Result<T> {
        let index = self
            .columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .ok_or_raise(|| ErrorKind::Database)?;
        self.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Iterates a query's rows, fetching [`WINDOW_SIZE`] at a time.
///
/// Each window is read under its own shared lock, so long iterations don't
/// keep writers out between windows. The total row count is computed at most
/// once.
#[derive(Debug)]
pub struct SynchronizedCursor<'db> {
    db: &'db SynchronizedDb,
    sql: String,
    args: Vec<Value>,
    columns: Arc<[String]>,
    window: VecDeque<Vec<Value>>,
    offset: usize,
    exhausted: bool,
    count: Option<usize>,
}

impl<'db> SynchronizedCursor<'db> {
    pub(crate) fn new(db: &'db SynchronizedDb, sql: &str, args: Vec<Value>) -> Result<Self> {
        let mut cursor = Self {
            db,
            sql: sql.to_string(),
            args,
            columns: Arc::from(Vec::new()),
            window: VecDeque::new(),
            offset: 0,
            exhausted: false,
            count: None,
        };
        cursor.fetch_window()?;
        Ok(cursor)
    }

    fn fetch_window(&mut self) -> Result<()> {
        let sql = format!("SELECT * FROM ({}) LIMIT {WINDOW_SIZE} OFFSET {}", self.sql, self.offset);
        let _lock = self.db.read_lock();
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&sql).or_raise(|| ErrorKind::Database)?;
        if self.columns.is_empty() {
            self.columns = stmt.column_names().into_iter().map(String::from).collect();
        }
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(self.args.iter())).or_raise(|| ErrorKind::Database)?;
        let mut fetched = 0;
        while let Some(row) = rows.next().or_raise(|| ErrorKind::Database)? {
            let values = (0..width)
                .map(|index| row.get::<_, Value>(index))
                .collect::<rusqlite::Result<Vec<_>>>()
                .or_raise(|| ErrorKind::Database)?;
            self.window.push_back(values);
            fetched += 1;
        }
        self.offset += fetched;
        if fetched < WINDOW_SIZE {
            self.exhausted = true;
            // Everything has been seen, the count comes for free.
            self.count.get_or_insert(self.offset);
        }
        Ok(())
    }

    /// Total number of rows the query returns.
    pub fn row_count(&mut self) -> Result<usize> {
        if let Some(count) = self.count {
            return Ok(count);
        }
        let sql = format!("SELECT COUNT(*) FROM ({})", self.sql);
        let count: i64 = {
            let _lock = self.db.read_lock();
            let conn = self.db.conn();
            let mut stmt = conn.prepare(&sql).or_raise(|| ErrorKind::Database)?;
            stmt.query_row(params_from_iter(self.args.iter()), |row| row.get(0))
                .or_raise(|| ErrorKind::Database)?
        };
        let count = usize::try_from(count).or_raise(|| ErrorKind::Database)?;
        self.count = Some(count);
        Ok(count)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for SynchronizedCursor<'_> {
    type Item = Result<CursorRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.window.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_window() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        let values = self.window.pop_front()?;
        Some(Ok(CursorRow { columns: self.columns.clone(), values }))
    }
}
