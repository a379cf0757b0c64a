use time::UtcDateTime;

/// A catalogued book.
///
/// Bookshelves and the Calibre library are referenced by their natural keys
/// (shelf name, library string id) so that a book can move between databases
/// whose row ids differ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Book {
    pub id: Option<i64>,
    pub uuid: String,
    pub title: String,
    pub isbn: Option<String>,
    pub authors: Vec<String>,
    pub series: Option<String>,
    pub publisher: Option<String>,
    pub date_published: Option<String>,
    pub description: Option<String>,
    pub bookshelves: Vec<String>,
    pub calibre_library: Option<String>,
    pub date_added: Option<UtcDateTime>,
    pub last_updated: Option<UtcDateTime>,
}

impl Book {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Default::default() }
    }

    /// File names this book's covers are stored under, front cover first.
    pub fn cover_filenames(&self) -> [String; 2] {
        [cover_filename(&self.uuid, 0), cover_filename(&self.uuid, 1)]
    }
}

/// Cover file name for a book: `<uuid>.jpg` for the front cover and
/// `<uuid>_<index>.jpg` for the others.
pub fn cover_filename(uuid: &str, index: usize) -> String {
    match index {
        0 => format!("{uuid}.jpg"),
        n => format!("{uuid}_{n}.jpg"),
    }
}

/// How [`BookDao`](crate::BookDao) treats values it would otherwise generate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Insert with the book's own id when it has one.
    pub use_id_if_present: bool,
    /// Keep the book's `last_updated` instead of stamping "now".
    pub use_update_date_if_present: bool,
}
