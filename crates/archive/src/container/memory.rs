//! In-memory containers for tests.

use exn::ResultExt;
use std::io::Read;
use std::ops::ControlFlow;
use time::UtcDateTime;

use super::{ArchiveSink, ArchiveSource, Visitor};
use crate::error::{ErrorKind, Result};
use crate::record::ArchiveReaderRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub modified: Option<UtcDateTime>,
    pub compress: bool,
}

/// An archive source backed by a list of entries. Counts passes and resets
/// so tests can check how the reader walks the archive.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    entries: Vec<MemoryEntry>,
    passes: usize,
    resets: usize,
}

impl MemorySource {
    pub fn new(entries: Vec<MemoryEntry>) -> Self {
        Self { entries, ..Default::default() }
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl From<MemorySink> for MemorySource {
    fn from(sink: MemorySink) -> Self {
        Self::new(sink.entries)
    }
}

impl ArchiveSource for MemorySource {
    fn for_each(&mut self, visit: &mut Visitor<'_>) -> Result<()> {
        self.passes += 1;
        for entry in &self.entries {
            let mut data = entry.data.as_slice();
            let mut record = ArchiveReaderRecord::new(entry.name.clone(), entry.modified, &mut data);
            if visit(&mut record)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }
}

/// An archive sink that keeps every entry in memory.
#[derive(Debug, Clone)]
pub struct MemorySink {
    entries: Vec<MemoryEntry>,
    covers: bool,
}

impl MemorySink {
    pub fn new(supports_covers: bool) -> Self {
        Self { entries: Vec::new(), covers: supports_covers }
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&MemoryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemorySink {
    fn push(&mut self, name: &str, modified: Option<UtcDateTime>, reader: &mut dyn Read, compress: bool) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).or_raise(|| ErrorKind::Io)?;
        self.entries.push(MemoryEntry { name: name.to_string(), data, modified, compress });
        Ok(())
    }
}

impl ArchiveSink for MemorySink {
    fn put_reader(
        &mut self,
        name: &str,
        _size: u64,
        modified: Option<UtcDateTime>,
        reader: &mut dyn Read,
        compress: bool,
    ) -> Result<()> {
        self.push(name, modified, reader, compress)
    }

    fn supports_covers(&self) -> bool {
        self.covers
    }

    fn finish(self) -> Result<()> {
        Ok(())
    }
}

/// Lets a test inspect the entries after the writer finished.
impl ArchiveSink for &mut MemorySink {
    fn put_reader(
        &mut self,
        name: &str,
        _size: u64,
        modified: Option<UtcDateTime>,
        reader: &mut dyn Read,
        compress: bool,
    ) -> Result<()> {
        self.push(name, modified, reader, compress)
    }

    fn supports_covers(&self) -> bool {
        self.covers
    }

    fn finish(self) -> Result<()> {
        Ok(())
    }
}

impl MemorySink {
    /// Turn the written entries into a source, for round trips.
    pub fn into_source(self) -> MemorySource {
        MemorySource::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordType;

    #[test]
    fn test_seek_counts_one_pass() {
        let mut sink = MemorySink::default();
        sink.put_bytes("styles.json", b"{}", true).unwrap();
        sink.put_bytes("metadata.json", b"{}", true).unwrap();
        let mut source = sink.into_source();

        let mut seen = Vec::new();
        assert!(source.seek(RecordType::MetaData, &mut |record| {
            seen.push(record.name().to_string());
            Ok(())
        }).unwrap());
        assert_eq!(seen, ["metadata.json"]);
        assert_eq!(source.passes(), 1);

        let mut visited = 0;
        source.for_each(&mut |_| {
            visited += 1;
            Ok(ControlFlow::Break(()))
        }).unwrap();
        assert_eq!(visited, 1);
        assert_eq!(source.passes(), 2);
    }
}
