//! Synchronized access to a single SQLite database.
//!
//! SQLite refuses concurrent writes on one connection, so every access goes
//! through a [`Synchronizer`]: a reentrant readers/writer lock keyed on the
//! calling thread. Readers proceed together, writers run alone, and a thread
//! that is the only reader may upgrade to writer.
//!
//! - [`SynchronizedDb`] wraps the connection and picks the right lock for
//!   each call, including multi-statement transactions.
//! - [`SynchronizedStatement`] is a re-usable statement that knows whether it
//!   reads or writes.
//! - [`SynchronizedCursor`] streams query results in windows, each under its
//!   own shared lock.

mod cursor;
mod db;
pub mod error;
mod statement;
mod sync;

pub use crate::cursor::{CursorRow, SynchronizedCursor, WINDOW_SIZE};
pub use crate::db::{Location, OpenOptions, SynchronizedDb, TxLock};
pub use crate::statement::SynchronizedStatement;
pub use crate::sync::{LockKind, SyncLock, Synchronizer};
pub use rusqlite::types::Value;
pub use rusqlite::{Connection, Row};
