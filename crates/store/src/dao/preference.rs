use exn::ResultExt;
use std::collections::BTreeMap;

use super::{dao, text};
use crate::error::{ErrorKind, Result};

dao! {
    /// Application preferences as a flat key/value store of JSON values.
    PreferenceDao
}

impl PreferenceDao<'_> {
    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let value: Option<String> = self
            .db()
            .query_row("SELECT value FROM preferences WHERE key = ?", &[text(key)], |row| row.get(0))
            .or_raise(|| ErrorKind::Database)?;
        value
            .map(|value| serde_json::from_str(&value).or_raise(|| ErrorKind::InvalidData("preference value")))
            .transpose()
    }

    pub fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.db()
            .execute(
                "INSERT INTO preferences (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                &[text(key), text(value.to_string())],
            )
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = self.db().delete("preferences", "key = ?", &[text(key)]).or_raise(|| ErrorKind::Database)?;
        Ok(removed > 0)
    }

    pub fn all(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let rows: Vec<(String, String)> = self
            .db()
            .query_map("SELECT key, value FROM preferences ORDER BY key", &[], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|(key, value)| {
                let value = serde_json::from_str(&value).or_raise(|| ErrorKind::InvalidData("preference value"))?;
                Ok((key, value))
            })
            .collect()
    }

    /// Store every entry, replacing existing values. Returns how many were written.
    pub fn set_all(&self, values: &BTreeMap<String, serde_json::Value>) -> Result<usize> {
        self.catalogue.write_transaction(|| {
            for (key, value) in values {
                self.set(key, value)?;
            }
            Ok(values.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Catalogue;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_typed_values_round_trip() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let preferences = catalogue.preferences();
        preferences.set("ui.theme", &json!("dark")).unwrap();
        preferences.set("list.page_size", &json!(50)).unwrap();
        preferences.set("search.sites", &json!(["isfdb", "openlibrary"])).unwrap();
        assert_eq!(preferences.get("list.page_size").unwrap(), Some(json!(50)));
        assert_eq!(preferences.all().unwrap().len(), 3);
        assert!(preferences.remove("ui.theme").unwrap());
        assert!(!preferences.remove("ui.theme").unwrap());
    }

    #[test]
    fn test_set_all_overwrites() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let preferences = catalogue.preferences();
        preferences.set("a", &json!(1)).unwrap();
        let incoming = BTreeMap::from([("a".to_string(), json!(2)), ("b".to_string(), json!(true))]);
        assert_eq!(preferences.set_all(&incoming).unwrap(), 2);
        assert_eq!(preferences.all().unwrap(), incoming);
    }
}
