use exn::ResultExt;
use std::io::Read;
use tracing::{debug, instrument};

use super::{ReadContext, RecordReader};
use crate::error::{ErrorKind, Result};
use crate::helper::UpdatePolicy;
use crate::metadata::ArchiveMetaData;
use crate::record::{ArchiveReaderRecord, RecordType};
use crate::results::ImportResults;

/// Copies cover images from the archive into cover storage.
///
/// A single instance handles every cover entry of an archive.
#[derive(Debug, Default)]
pub struct CoverRecordReader {
    buffer: Vec<u8>,
}

impl CoverRecordReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordReader for CoverRecordReader {
    fn read_metadata(&mut self, _record: &mut ArchiveReaderRecord<'_>) -> Result<Option<ArchiveMetaData>> {
        Ok(None)
    }

    #[instrument(skip_all, fields(cover = record.file_name()))]
    fn read(&mut self, ctx: &ReadContext<'_>, record: &mut ArchiveReaderRecord<'_>) -> Result<ImportResults> {
        let mut results = ImportResults::default();
        results.record_types.insert(RecordType::Cover);
        let name = record.file_name().to_string();

        let exists = ctx.covers.exists(&name).or_raise(|| ErrorKind::Storage)?;
        let write = match exists {
            false => true,
            true => match ctx.helper.update_policy {
                UpdatePolicy::Overwrite => true,
                UpdatePolicy::Skip => false,
                UpdatePolicy::OnlyNewer => {
                    let stored = ctx.covers.modified(&name).or_raise(|| ErrorKind::Storage)?;
                    match (record.last_modified(), stored) {
                        (Some(imported), Some(stored)) => imported > stored,
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
                },
            },
        };
        if !write {
            debug!("skipping cover");
            results.covers_skipped += 1;
            return Ok(results);
        }

        self.buffer.clear();
        record.read_to_end(&mut self.buffer).or_raise(|| ErrorKind::Io)?;
        ctx.covers.write(&name, &self.buffer).or_raise(|| ErrorKind::Storage)?;
        match exists {
            true => results.covers_updated += 1,
            false => results.covers_created += 1,
        }
        Ok(results)
    }
}
