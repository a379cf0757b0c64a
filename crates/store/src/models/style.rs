/// A list display style.
///
/// The individual style options are opaque to the catalogue and kept as a
/// JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub uuid: String,
    pub name: String,
    pub preferred: bool,
    pub menu_position: i64,
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl Style {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            preferred: false,
            menu_position: 0,
            settings: serde_json::Map::new(),
        }
    }
}
