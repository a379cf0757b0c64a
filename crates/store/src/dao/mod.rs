//! Data access objects.
//!
//! Each DAO is a cheap view onto a [`Catalogue`](crate::Catalogue) and is
//! normally obtained through one of its accessors.

/// Declares a DAO struct borrowing a catalogue, plus the `From` conversion.
macro_rules! dao {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name<'a> {
            catalogue: &'a $crate::Catalogue,
        }
        impl<'a> From<&'a $crate::Catalogue> for $name<'a> {
            fn from(catalogue: &'a $crate::Catalogue) -> Self {
                Self { catalogue }
            }
        }
        impl<'a> $name<'a> {
            #[allow(dead_code)]
            fn db(&self) -> &'a folio_dbsync::SynchronizedDb {
                self.catalogue.db()
            }
        }
    };
}
pub(crate) use dao;

mod book;
mod bookshelf;
mod calibre;
mod certificate;
mod maintenance;
mod preference;
mod style;
mod sync_date;

pub use self::book::BookDao;
pub use self::bookshelf::BookshelfDao;
pub use self::calibre::CalibreDao;
pub use self::certificate::CertificateDao;
pub use self::maintenance::MaintenanceDao;
pub use self::preference::PreferenceDao;
pub use self::style::StyleDao;
pub use self::sync_date::SyncDateDao;

use folio_dbsync::Value;
use time::UtcDateTime;

use crate::dates;

pub(crate) fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_string()))
}

pub(crate) fn opt_date(value: Option<UtcDateTime>) -> Value {
    value.map_or(Value::Null, |date| Value::Text(dates::to_sql(date)))
}
