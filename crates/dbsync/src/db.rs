//! Lock-protected wrapper around a single SQLite connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use exn::ResultExt;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Row, params_from_iter};
use tracing::{debug, error, instrument, warn};

use crate::cursor::SynchronizedCursor;
use crate::error::{ErrorKind, Result, TransactionError};
use crate::statement::SynchronizedStatement;
use crate::sync::{LockKind, SyncLock, Synchronizer};

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Location::File(path.as_ref().to_path_buf())
    }
}

/// Tunables for [`SynchronizedDb::open`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// How many times a "busy" open is retried before giving up.
    pub retries: u32,
    /// First backoff delay; doubled after every failed attempt.
    pub initial_backoff: Duration,
    pub busy_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            retries: 10,
            initial_backoff: Duration::from_millis(10),
            busy_timeout: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TransactionState {
    id: u64,
    kind: LockKind,
    owner: ThreadId,
    successful: bool,
}

/// Token for a running transaction, returned by
/// [`begin_transaction`](SynchronizedDb::begin_transaction) and consumed by
/// [`end_transaction`](SynchronizedDb::end_transaction).
///
/// Carries the lock that covers the whole transaction.
#[must_use = "a transaction must be ended with `end_transaction`"]
#[derive(Debug)]
pub struct TxLock<'db> {
    id: u64,
    lock: SyncLock<'db>,
}

impl TxLock<'_> {
    pub fn kind(&self) -> LockKind {
        self.lock.kind()
    }
}

/// A single SQLite connection whose every use goes through a [`Synchronizer`].
///
/// Reads take a shared lock for the duration of the call and writes take the
/// exclusive lock, unless the calling thread is inside a transaction: the
/// transaction's lock then covers the call. Writing inside a shared
/// transaction is refused.
#[derive(Debug)]
pub struct SynchronizedDb {
    sync: Arc<Synchronizer>,
    conn: Mutex<Connection>,
    transaction: Mutex<Option<TransactionState>>,
    location: Location,
}

impl SynchronizedDb {
    /// Open (or create) the database, retrying with exponential backoff while
    /// SQLite reports the file as busy.
    ///
    /// `configure` runs on the fresh connection while the exclusive lock is
    /// still held; use it for pragmas and schema migrations.
    #[instrument(skip(sync, options, configure))]
    pub fn open<F>(sync: Arc<Synchronizer>, location: Location, options: &OpenOptions, configure: F) -> Result<Self>
    where
        F: Fn(&mut Connection) -> rusqlite::Result<()>,
    {
        let conn = {
            let _lock = sync.acquire_exclusive();
            Self::open_with_retries(&location, options, &configure)?
        };
        Ok(Self { sync, conn: Mutex::new(conn), transaction: Mutex::new(None), location })
    }

    fn open_with_retries<F>(location: &Location, options: &OpenOptions, configure: &F) -> Result<Connection>
    where
        F: Fn(&mut Connection) -> rusqlite::Result<()>,
    {
        let mut wait = options.initial_backoff;
        let mut retries_left = options.retries;
        loop {
            match Self::try_open(location, options, configure) {
                Ok(conn) => return Ok(conn),
                Err(err) if is_busy(&err) && retries_left > 0 => {
                    warn!(retries_left, wait_ms = wait.as_millis() as u64, "database busy during open, retrying");
                    thread::sleep(wait);
                    wait *= 2;
                    retries_left -= 1;
                },
                Err(err) if is_busy(&err) => {
                    return Err(err).or_raise(|| ErrorKind::Open);
                },
                Err(err) => return Err(err).or_raise(|| ErrorKind::Database),
            }
        }
    }

    fn try_open<F>(location: &Location, options: &OpenOptions, configure: &F) -> rusqlite::Result<Connection>
    where
        F: Fn(&mut Connection) -> rusqlite::Result<()>,
    {
        let mut conn = match location {
            Location::File(path) => Connection::open_with_flags(path, OpenFlags::default())?,
            Location::Memory => Connection::open_in_memory()?,
        };
        conn.busy_timeout(options.busy_timeout)?;
        configure(&mut conn)?;
        Ok(conn)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transaction_state(&self) -> MutexGuard<'_, Option<TransactionState>> {
        self.transaction.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kind of the transaction owned by the calling thread, if any.
    fn current_transaction(&self) -> Option<LockKind> {
        let me = thread::current().id();
        self.transaction_state().filter(|tx| tx.owner == me).map(|tx| tx.kind)
    }

    /// Lock for a read: none when the calling thread's transaction covers it.
    pub(crate) fn read_lock(&self) -> Option<SyncLock<'_>> {
        match self.current_transaction() {
            Some(_) => None,
            None => Some(self.sync.acquire_shared()),
        }
    }

    /// Lock for a write: none inside an exclusive transaction, refused inside
    /// a shared one.
    pub(crate) fn write_lock(&self) -> Result<Option<SyncLock<'_>>> {
        match self.current_transaction() {
            Some(LockKind::Exclusive) => Ok(None),
            Some(LockKind::Shared) => {
                error!("write attempted inside a shared transaction");
                exn::bail!(ErrorKind::Transaction(TransactionError::InsideSharedTransaction))
            },
            None => Ok(Some(self.sync.acquire_exclusive())),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a transaction, taking the exclusive lock when `is_update` is set
    /// and a shared lock otherwise.
    ///
    /// Only one transaction may be active on the connection at a time.
    pub fn begin_transaction(&self, is_update: bool) -> Result<TxLock<'_>> {
        let lock = match is_update {
            true => self.sync.acquire_exclusive(),
            false => self.sync.acquire_shared(),
        };
        let mut state = self.transaction_state();
        if state.is_some() {
            error!("refusing to start a nested transaction");
            exn::bail!(ErrorKind::Transaction(TransactionError::AlreadyStarted));
        }
        let begin = match is_update {
            true => "BEGIN IMMEDIATE",
            false => "BEGIN DEFERRED",
        };
        // On failure the lock is dropped, and therefore released, on return.
        self.conn().execute_batch(begin).or_raise(|| ErrorKind::Database)?;
        let id = NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed);
        *state = Some(TransactionState {
            id,
            kind: lock.kind(),
            owner: thread::current().id(),
            successful: false,
        });
        debug!(id, kind = %lock.kind(), "transaction started");
        Ok(TxLock { id, lock })
    }

    /// Mark the calling thread's transaction to be committed when it ends.
    pub fn set_transaction_successful(&self) {
        let me = thread::current().id();
        if let Some(tx) = self.transaction_state().as_mut().filter(|tx| tx.owner == me) {
            tx.successful = true;
        }
    }

    /// Whether any thread currently has a transaction open.
    pub fn in_transaction(&self) -> bool {
        self.transaction_state().is_some()
    }

    /// Whether the calling thread is the one running the open transaction.
    pub fn owns_transaction(&self) -> bool {
        self.current_transaction().is_some()
    }

    /// Commit (if marked successful) or roll back, then release the lock.
    ///
    /// # Panics
    ///
    /// When `tx` is not the token of the running transaction. Nothing is sent
    /// to SQLite in that case.
    pub fn end_transaction(&self, tx: TxLock<'_>) -> Result<()> {
        let mut state = self.transaction_state();
        let current = match *state {
            Some(current) if current.id == tx.id => current,
            Some(_) => {
                drop(state);
                panic!("wrong transaction lock passed to end_transaction");
            },
            None => {
                drop(state);
                panic!("end_transaction called without a transaction started");
            },
        };
        let end = match current.successful {
            true => "COMMIT",
            false => "ROLLBACK",
        };
        let result = self.conn().execute_batch(end);
        // Cleared before the lock goes, so a writer woken by the release never
        // sees this transaction as still running.
        *state = None;
        drop(state);
        drop(tx);
        debug!(id = current.id, committed = current.successful, "transaction ended");
        result.or_raise(|| ErrorKind::Database)
    }

    /// Run `work` inside the savepoint `name`, undoing its writes if it fails.
    ///
    /// The outer `Result` reports SQLite failures around the savepoint; the
    /// inner one is whatever `work` returned.
    pub fn savepoint<T, E>(
        &self,
        name: &'static str,
        work: impl FnOnce() -> std::result::Result<T, E>,
    ) -> Result<std::result::Result<T, E>> {
        // Held across `work` so that outside a transaction no other writer
        // can slip in between the savepoint statements.
        let _lock = self.write_lock()?;
        self.conn().execute_batch(&format!("SAVEPOINT {name}")).or_raise(|| ErrorKind::Database)?;
        let result = work();
        if result.is_err() {
            debug!(name, "rolling back to savepoint");
            self.conn().execute_batch(&format!("ROLLBACK TO {name}")).or_raise(|| ErrorKind::Database)?;
        }
        self.conn().execute_batch(&format!("RELEASE {name}")).or_raise(|| ErrorKind::Database)?;
        Ok(result)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Run a query and return a cursor over its rows.
    pub fn raw_query(&self, sql: &str, args: Vec<Value>) -> Result<SynchronizedCursor<'_>> {
        SynchronizedCursor::new(self, sql, args)
    }

    /// Run a query expected to return at most one row.
    pub fn query_row<T, F>(&self, sql: &str, args: &[Value], map: F) -> Result<Option<T>>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let _lock = self.read_lock();
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql).or_raise(|| ErrorKind::Database)?;
        stmt.query_row(params_from_iter(args.iter()), map)
            .optional()
            .or_raise(|| ErrorKind::Database)
    }

    /// Run a query and map every row, holding the lock for the whole read.
    pub fn query_map<T, F>(&self, sql: &str, args: &[Value], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let _lock = self.read_lock();
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql).or_raise(|| ErrorKind::Database)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), map).or_raise(|| ErrorKind::Database)?;
        rows.collect::<rusqlite::Result<Vec<T>>>().or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert one row and return its rowid.
    pub fn insert(&self, table: &str, values: &[(&str, Value)]) -> Result<i64> {
        let columns = values.iter().map(|(column, _)| *column).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})");
        let _lock = self.write_lock()?;
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&sql).or_raise(|| ErrorKind::Database)?;
        stmt.execute(params_from_iter(values.iter().map(|(_, value)| value)))
            .or_raise(|| ErrorKind::Database)?;
        Ok(conn.last_insert_rowid())
    }

    /// Update rows matching `where_clause` and return how many changed.
    pub fn update(&self, table: &str, values: &[(&str, Value)], where_clause: &str, args: &[Value]) -> Result<usize> {
        let assignments = values
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {table} SET {assignments} WHERE {where_clause}");
        let params = values.iter().map(|(_, value)| value).chain(args.iter());
        let _lock = self.write_lock()?;
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&sql).or_raise(|| ErrorKind::Database)?;
        stmt.execute(params_from_iter(params)).or_raise(|| ErrorKind::Database)
    }

    /// Delete rows matching `where_clause` and return how many went.
    pub fn delete(&self, table: &str, where_clause: &str, args: &[Value]) -> Result<usize> {
        let sql = format!("DELETE FROM {table} WHERE {where_clause}");
        let _lock = self.write_lock()?;
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&sql).or_raise(|| ErrorKind::Database)?;
        stmt.execute(params_from_iter(args.iter())).or_raise(|| ErrorKind::Database)
    }

    /// Execute one or more statements that take no parameters.
    pub fn exec_sql(&self, sql: &str) -> Result<()> {
        let _lock = self.write_lock()?;
        self.conn().execute_batch(sql).or_raise(|| ErrorKind::Database)
    }

    /// Execute a single parameterised write and return the changed row count.
    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<usize> {
        let _lock = self.write_lock()?;
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql).or_raise(|| ErrorKind::Database)?;
        stmt.execute(params_from_iter(args.iter())).or_raise(|| ErrorKind::Database)
    }

    /// Compile `sql` once so it can be executed repeatedly.
    pub fn compile_statement(&self, sql: &str) -> Result<SynchronizedStatement<'_>> {
        SynchronizedStatement::new(self, sql)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.exec_sql(&format!("DROP TABLE IF EXISTS {table}"))
    }

    /// Let SQLite refresh its query planner statistics where it thinks that's worthwhile.
    pub fn optimize(&self) -> Result<()> {
        self.exec_sql("PRAGMA optimize")
    }

    pub fn analyze(&self) -> Result<()> {
        self.exec_sql("ANALYZE")
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
