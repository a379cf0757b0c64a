use exn::ResultExt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use time::UtcDateTime;
use tracing::{debug, instrument};

use super::{ArchiveSink, ArchiveSource, Visitor};
use crate::compression::{Compression, Encoder};
use crate::error::{ErrorKind, Result};
use crate::helper::ExportHelper;
use crate::record::ArchiveReaderRecord;

const ENTRY_MODE: u32 = 0o644;

/// A tar archive on disk, optionally gzip or bzip2 compressed.
#[derive(Debug)]
pub struct TarArchiveSource {
    path: PathBuf,
    compression: Compression,
}

impl TarArchiveSource {
    /// Open an existing archive, detecting compression from its first bytes.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut magic = [0u8; 4];
        let mut file = File::open(&path).or_raise(|| ErrorKind::Io)?;
        let read = file.read(&mut magic).or_raise(|| ErrorKind::Io)?;
        let compression = Compression::from_magic_bytes(&magic[..read]);
        debug!(path = %path.display(), ?compression, "opened archive");
        Ok(Self { path, compression })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveSource for TarArchiveSource {
    fn for_each(&mut self, visit: &mut Visitor<'_>) -> Result<()> {
        let file = File::open(&self.path).or_raise(|| ErrorKind::Io)?;
        let mut archive = Archive::new(self.compression.wrap_reader(BufReader::new(file)));
        for entry in archive.entries().or_raise(|| ErrorKind::Io)? {
            let mut entry = entry.or_raise(|| ErrorKind::Io)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry.path().or_raise(|| ErrorKind::Io)?.to_string_lossy().into_owned();
            let modified = entry
                .header()
                .mtime()
                .ok()
                .and_then(|secs| UtcDateTime::from_unix_timestamp(secs as i64).ok());
            let mut record = ArchiveReaderRecord::new(name, modified, &mut entry);
            if visit(&mut record)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Writes a new tar archive.
pub struct TarArchiveSink {
    builder: Builder<Encoder<BufWriter<File>>>,
}

impl TarArchiveSink {
    /// Create (or truncate) the archive at `path`.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn create(path: impl AsRef<Path>, compression: Compression) -> Result<Self> {
        let file = File::create(path.as_ref()).or_raise(|| ErrorKind::Io)?;
        let builder = Builder::new(compression.wrap_writer(BufWriter::new(file)));
        Ok(Self { builder })
    }

    /// Create the archive for an export, compressed as the export asks or
    /// as the file extension suggests.
    pub fn for_export(path: impl AsRef<Path>, helper: &ExportHelper) -> Result<Self> {
        let compression = helper.compression_for(path.as_ref());
        Self::create(path, compression)
    }
}

impl ArchiveSink for TarArchiveSink {
    fn put_reader(
        &mut self,
        name: &str,
        size: u64,
        modified: Option<UtcDateTime>,
        reader: &mut dyn Read,
        _compress: bool,
    ) -> Result<()> {
        let mtime = modified.unwrap_or_else(UtcDateTime::now).unix_timestamp().max(0) as u64;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(mtime);
        self.builder.append_data(&mut header, name, reader).or_raise(|| ErrorKind::Io)?;
        debug!(name, size, "added archive entry");
        Ok(())
    }

    fn supports_covers(&self) -> bool {
        true
    }

    fn finish(self) -> Result<()> {
        let encoder = self.builder.into_inner().or_raise(|| ErrorKind::Io)?;
        let mut writer = encoder.finish().or_raise(|| ErrorKind::Io)?;
        std::io::Write::flush(&mut writer).or_raise(|| ErrorKind::Io)
    }
}
