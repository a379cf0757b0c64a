use time::UtcDateTime;

/// A library on a Calibre content server that books are synced with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibreLibrary {
    pub id: Option<i64>,
    /// The server's own identifier for the library; the natural key.
    pub library_string_id: String,
    pub uuid: String,
    pub name: String,
    pub last_sync: Option<UtcDateTime>,
    /// Name of the bookshelf the library's books are mapped onto.
    pub bookshelf: Option<String>,
}

/// Mapping of a Calibre custom column onto a local field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibreCustomField {
    pub calibre_key: String,
    /// Calibre's column type (`text`, `bool`, `datetime`, ...).
    pub kind: String,
    pub db_key: String,
}
