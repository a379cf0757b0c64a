//! Catalogue database connection and migrations.

use exn::ResultExt;
use folio_dbsync::{Connection, Location, OpenOptions, SynchronizedDb, Synchronizer};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::dao::{
    BookDao, BookshelfDao, CalibreDao, CertificateDao, MaintenanceDao, PreferenceDao, StyleDao, SyncDateDao,
};
use crate::error::{ErrorKind, Result};

/// Schema migrations, applied in order. `PRAGMA user_version` records how
/// many have run.
const MIGRATIONS: &[&str] = &[include_str!("../migrations/0001_catalogue.sql")];

/// The catalogue database.
///
/// This is the main entry point for interacting with stored books and
/// everything that hangs off them. Cloning is cheap; all clones share the
/// same connection and lock.
#[derive(Debug, Clone)]
pub struct Catalogue {
    db: Arc<SynchronizedDb>,
}

impl Catalogue {
    /// Open the catalogue at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        Self::open_with(Arc::new(Synchronizer::new()), Location::file(path), options)
    }

    /// Open an in-memory catalogue (useful for testing).
    ///
    /// Note: Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_with(Arc::new(Synchronizer::new()), Location::Memory, &OpenOptions::default())
    }

    /// Open the catalogue guarded by an existing [`Synchronizer`].
    pub fn open_with(sync: Arc<Synchronizer>, location: Location, options: &OpenOptions) -> Result<Self> {
        let db = SynchronizedDb::open(sync, location, options, |conn| {
            Self::apply_pragmas(conn)?;
            Self::migrate(conn)
        })
        .or_raise(|| ErrorKind::Migration)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn apply_pragmas(conn: &mut Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
                PRAGMA journal_mode = WAL;
                PRAGMA foreign_keys = ON;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
            "#,
        )
    }

    /// Run outstanding migrations, each in its own transaction.
    #[instrument("performing database migrations", skip(conn))]
    fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
        let applied: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        for (index, sql) in MIGRATIONS.iter().enumerate().skip(applied.max(0) as usize) {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", (index + 1) as i64)?;
            tx.commit()?;
            debug!(version = index + 1, "applied migration");
        }
        Ok(())
    }

    /// Get a reference to the underlying synchronized connection.
    ///
    /// Use it for transactions spanning several DAO calls.
    pub fn db(&self) -> &SynchronizedDb {
        &self.db
    }

    pub fn books(&self) -> BookDao<'_> {
        BookDao::from(self)
    }

    pub fn bookshelves(&self) -> BookshelfDao<'_> {
        BookshelfDao::from(self)
    }

    pub fn styles(&self) -> StyleDao<'_> {
        StyleDao::from(self)
    }

    pub fn preferences(&self) -> PreferenceDao<'_> {
        PreferenceDao::from(self)
    }

    pub fn certificates(&self) -> CertificateDao<'_> {
        CertificateDao::from(self)
    }

    pub fn calibre(&self) -> CalibreDao<'_> {
        CalibreDao::from(self)
    }

    pub fn sync_dates(&self) -> SyncDateDao<'_> {
        SyncDateDao::from(self)
    }

    pub fn maintenance(&self) -> MaintenanceDao<'_> {
        MaintenanceDao::from(self)
    }

    /// Run `work` inside a write transaction, committing if it succeeds.
    ///
    /// When the calling thread already runs a transaction, `work` simply
    /// joins it.
    pub fn write_transaction<T>(&self, work: impl FnOnce() -> Result<T>) -> Result<T> {
        if self.db.owns_transaction() {
            return work();
        }
        let tx = self.db.begin_transaction(true).or_raise(|| ErrorKind::Database)?;
        let result = work();
        if result.is_ok() {
            self.db.set_transaction_successful();
        }
        self.db.end_transaction(tx).or_raise(|| ErrorKind::Database)?;
        result
    }
}
