//! Import and export settings.

use exn::ResultExt;
use folio_store::Catalogue;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use time::UtcDateTime;

use crate::compression::Compression;
use crate::error::{ErrorKind, Result};
use crate::record::{RecordEncoding, RecordType};

/// `sync_dates` key holding the time of the last complete export.
pub const LAST_FULL_EXPORT: &str = "last_full_export";

/// What to do with an imported book (or cover) that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Always replace the existing data.
    Overwrite,
    /// Replace only when the imported data was modified more recently.
    #[default]
    OnlyNewer,
    /// Never touch existing data.
    Skip,
}

/// Settings for one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportHelper {
    pub record_types: BTreeSet<RecordType>,
    pub update_policy: UpdatePolicy,
}

impl ImportHelper {
    pub fn new(record_types: impl IntoIterator<Item = RecordType>, update_policy: UpdatePolicy) -> Self {
        Self { record_types: record_types.into_iter().collect(), update_policy }
    }

    /// Requested record types plus everything they depend on.
    pub fn effective_types(&self) -> BTreeSet<RecordType> {
        let mut types = self.record_types.clone();
        RecordType::add_related_types(&mut types);
        types
    }
}

impl Default for ImportHelper {
    fn default() -> Self {
        Self::new(RecordType::ALL, UpdatePolicy::default())
    }
}

/// Settings for one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportHelper {
    pub record_types: BTreeSet<RecordType>,
    /// Encoding of the books record; everything else is written as JSON.
    pub books_encoding: RecordEncoding,
    pub compression: Compression,
    /// Only export books changed since the last full export.
    pub incremental: bool,
    /// When the last full export finished, if ever.
    pub last_full_export: Option<UtcDateTime>,
}

impl ExportHelper {
    pub fn new(record_types: impl IntoIterator<Item = RecordType>) -> Self {
        Self {
            record_types: record_types.into_iter().collect(),
            books_encoding: RecordEncoding::Json,
            compression: Compression::None,
            incremental: false,
            last_full_export: None,
        }
    }

    pub fn effective_types(&self) -> BTreeSet<RecordType> {
        let mut types = self.record_types.clone();
        RecordType::add_related_types(&mut types);
        types
    }

    /// Encoding used for a record of the given type.
    pub fn encoding(&self, record_type: RecordType) -> RecordEncoding {
        match record_type {
            RecordType::Books => self.books_encoding,
            _ => RecordEncoding::Json,
        }
    }

    /// Compression for an archive written to `path`.
    ///
    /// An explicit setting wins; otherwise the file extension decides.
    pub fn compression_for(&self, path: impl AsRef<Path>) -> Compression {
        match self.compression {
            Compression::None => Compression::from_path(path),
            explicit => explicit,
        }
    }

    /// Cutoff for an incremental export.
    pub fn since(&self) -> Option<UtcDateTime> {
        match self.incremental {
            true => self.last_full_export,
            false => None,
        }
    }

    /// Load the last full export time from the catalogue.
    pub fn load_last_full_export(&mut self, catalogue: &Catalogue) -> Result<()> {
        self.last_full_export = catalogue.sync_dates().get(LAST_FULL_EXPORT).or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }

    /// Remember a completed export, if it was a full export of all books.
    pub(crate) fn set_last_done(&self, catalogue: &Catalogue, now: UtcDateTime) -> Result<bool> {
        if self.incremental || !self.record_types.contains(&RecordType::Books) {
            return Ok(false);
        }
        catalogue.sync_dates().set(LAST_FULL_EXPORT, now).or_raise(|| ErrorKind::Storage)?;
        Ok(true)
    }
}

impl Default for ExportHelper {
    fn default() -> Self {
        Self::new(RecordType::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::utc_datetime;

    #[test]
    fn test_since_only_when_incremental() {
        let mut helper = ExportHelper::default();
        helper.last_full_export = Some(utc_datetime!(2024-01-01 00:00));
        assert_eq!(helper.since(), None);
        helper.incremental = true;
        assert_eq!(helper.since(), Some(utc_datetime!(2024-01-01 00:00)));
    }

    #[test]
    fn test_encoding_per_record_type() {
        let mut helper = ExportHelper::default();
        helper.books_encoding = RecordEncoding::Csv;
        assert_eq!(helper.encoding(RecordType::Books), RecordEncoding::Csv);
        assert_eq!(helper.encoding(RecordType::Styles), RecordEncoding::Json);
    }

    #[test]
    fn test_last_full_export_round_trip() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let now = utc_datetime!(2024-05-06 07:08:09);

        let mut incremental = ExportHelper { incremental: true, ..Default::default() };
        assert!(!incremental.set_last_done(&catalogue, now).unwrap());

        let full = ExportHelper::default();
        assert!(full.set_last_done(&catalogue, now).unwrap());
        incremental.load_last_full_export(&catalogue).unwrap();
        assert_eq!(incremental.last_full_export, Some(now));
    }
}
