mod book;
mod bookshelf;
mod calibre;
mod style;

pub use self::book::{Book, WriteFlags, cover_filename};
pub use self::bookshelf::Bookshelf;
pub use self::calibre::{CalibreCustomField, CalibreLibrary};
pub use self::style::Style;

/// A trusted server certificate, stored in DER form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Host (or other key) the certificate is pinned for.
    pub name: String,
    pub der: Vec<u8>,
}
