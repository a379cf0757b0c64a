use serde::{Deserialize, Serialize};
use time::UtcDateTime;

use crate::error::{ErrorKind, Result};
use crate::results::ExportResults;

/// Oldest archive version we can read.
pub const MIN_VERSION: u32 = 1;
/// Archive version written by this crate. Versions 4 and 5 share a wire format.
pub const VERSION: u32 = 5;

/// The header record of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetaData {
    pub version: u32,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default, with = "crate::codec::date")]
    pub created: Option<UtcDateTime>,
    #[serde(default, rename = "books", skip_serializing_if = "Option::is_none")]
    pub book_count: Option<usize>,
    #[serde(default, rename = "covers", skip_serializing_if = "Option::is_none")]
    pub cover_count: Option<usize>,
}

impl ArchiveMetaData {
    /// Header for a new archive holding what `results` recorded.
    pub fn create(version: u32, results: &ExportResults) -> Self {
        Self {
            version,
            creator: Some(format!("folio {}", env!("CARGO_PKG_VERSION"))),
            created: Some(folio_store::dates::now()),
            book_count: Some(results.books),
            cover_count: Some(results.covers),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_VERSION..=VERSION).contains(&self.version) {
            exn::bail!(ErrorKind::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}
