/// A user-defined shelf that books can be placed on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookshelf {
    pub id: Option<i64>,
    /// Unique, compared case-insensitively.
    pub name: String,
    /// Display style used when browsing the shelf.
    pub style_uuid: Option<String>,
}

impl Bookshelf {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}
