//! Catalogue database for folio.
//!
//! Everything is stored in one SQLite database accessed through
//! [`folio_dbsync`], so any number of threads can read while a single writer
//! (such as an archive import) makes changes.
//!
//! # Architecture
//! - [`Catalogue`] opens the database, runs migrations and hands out DAOs.
//! - DAOs ([`BookDao`], [`BookshelfDao`], ...) map rows to the [`models`].
//! - [`CoverStorage`] keeps cover images outside the database, addressed by
//!   file name (see [`cover_filename`]).

mod covers;
mod dao;
pub mod dates;
mod db;
pub mod error;
pub mod models;
mod path;

pub use crate::covers::{CoverReader, CoverStorage, LocalCoverStorage};
#[cfg(any(test, feature = "mock"))]
pub use crate::covers::mock::MockCoverStorage;
pub use crate::dao::{
    BookDao, BookshelfDao, CalibreDao, CertificateDao, MaintenanceDao, PreferenceDao, StyleDao, SyncDateDao,
};
pub use crate::db::Catalogue;
pub use crate::models::{Book, WriteFlags, cover_filename};
pub use crate::path::validate as validate_cover_name;
pub use folio_dbsync::OpenOptions;
