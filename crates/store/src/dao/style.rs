use exn::ResultExt;
use folio_dbsync::{Row, Value};

use super::{dao, text};
use crate::error::{ErrorKind, Result};
use crate::models::Style;

dao! {
    StyleDao
}

const COLUMNS: &str = "uuid, name, preferred, menu_position, settings";

struct StyleRow {
    uuid: String,
    name: String,
    preferred: bool,
    menu_position: i64,
    settings: String,
}

impl StyleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            name: row.get(1)?,
            preferred: row.get(2)?,
            menu_position: row.get(3)?,
            settings: row.get(4)?,
        })
    }
}

impl TryFrom<StyleRow> for Style {
    type Error = crate::error::Error;
    fn try_from(row: StyleRow) -> Result<Self> {
        Ok(Self {
            uuid: row.uuid,
            name: row.name,
            preferred: row.preferred,
            menu_position: row.menu_position,
            settings: serde_json::from_str(&row.settings).or_raise(|| ErrorKind::InvalidData("style settings"))?,
        })
    }
}

impl StyleDao<'_> {
    pub fn get(&self, uuid: &str) -> Result<Option<Style>> {
        self.db()
            .query_row(&format!("SELECT {COLUMNS} FROM styles WHERE uuid = ?"), &[text(uuid)], StyleRow::from_row)
            .or_raise(|| ErrorKind::Database)?
            .map(Style::try_from)
            .transpose()
    }

    pub fn all(&self) -> Result<Vec<Style>> {
        self.db()
            .query_map(&format!("SELECT {COLUMNS} FROM styles ORDER BY menu_position, id"), &[], StyleRow::from_row)
            .or_raise(|| ErrorKind::Database)?
            .into_iter()
            .map(Style::try_from)
            .collect()
    }

    /// Insert the style, or replace the stored one with the same uuid.
    ///
    /// Returns `true` when the style was new.
    pub fn upsert(&self, style: &Style) -> Result<bool> {
        self.catalogue.write_transaction(|| {
            let existed = self.get(&style.uuid)?.is_some();
            self.db()
                .execute(
                    &format!(
                        "INSERT INTO styles ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT (uuid) DO UPDATE SET
                            name = excluded.name,
                            preferred = excluded.preferred,
                            menu_position = excluded.menu_position,
                            settings = excluded.settings"
                    ),
                    &[
                        text(&style.uuid),
                        text(&style.name),
                        Value::Integer(style.preferred.into()),
                        Value::Integer(style.menu_position),
                        text(serde_json::Value::Object(style.settings.clone()).to_string()),
                    ],
                )
                .or_raise(|| ErrorKind::Database)?;
            Ok(!existed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Catalogue;
    use serde_json::json;

    #[test]
    fn test_upsert_and_get() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let styles = catalogue.styles();
        let mut style = Style::new("6a82c4c0-4a6e-4b24-9f08-5d5c5c7e1e10", "Compact");
        style.settings.insert("show_covers".to_string(), json!(false));
        assert!(styles.upsert(&style).unwrap());

        style.name = "Compact (edited)".to_string();
        style.preferred = true;
        assert!(!styles.upsert(&style).unwrap());

        let stored = styles.get(&style.uuid).unwrap().unwrap();
        assert_eq!(stored, style);
        assert_eq!(styles.all().unwrap().len(), 1);
    }
}
