//! Serde adapter for optional dates stored as text.
//!
//! Dates are written in SQL form and read with the lenient ISO parser; an
//! unparseable date is treated as missing.

use folio_store::dates;
use serde::{Deserialize, Deserializer, Serializer};
use time::UtcDateTime;

pub fn serialize<S: Serializer>(value: &Option<UtcDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(date) => serializer.serialize_some(&dates::to_sql(*date)),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UtcDateTime>, D::Error> {
    let text = Option::<String>::deserialize(deserializer)?;
    Ok(text.as_deref().and_then(dates::parse_iso))
}
