//! Record types, encodings and the records read from a container.

use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use time::UtcDateTime;

use crate::codec::{CsvRecordReader, CsvRecordWriter, JsonRecordReader, JsonRecordWriter, RecordReader, RecordWriter};
use crate::codec::{XmlRecordReader, XmlRecordWriter};

/// The logical kinds of content an archive can hold.
///
/// The variant order is the order records are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    MetaData,
    Styles,
    Preferences,
    Certificates,
    Bookshelves,
    CalibreLibraries,
    CalibreCustomFields,
    Books,
    /// Cover images are stored under their own file names.
    Cover,
}

/// Image extensions recognised as covers.
const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

impl RecordType {
    pub const ALL: [RecordType; 9] = [
        RecordType::MetaData,
        RecordType::Styles,
        RecordType::Preferences,
        RecordType::Certificates,
        RecordType::Bookshelves,
        RecordType::CalibreLibraries,
        RecordType::CalibreCustomFields,
        RecordType::Books,
        RecordType::Cover,
    ];

    /// Entry name (without extension) and root key used for this record.
    pub fn name(&self) -> &'static str {
        match self {
            RecordType::MetaData => "metadata",
            RecordType::Styles => "styles",
            RecordType::Preferences => "preferences",
            RecordType::Certificates => "certificates",
            RecordType::Bookshelves => "bookshelves",
            RecordType::CalibreLibraries => "calibreLibraries",
            RecordType::CalibreCustomFields => "calibreCustomFields",
            RecordType::Books => "books",
            RecordType::Cover => "cover",
        }
    }

    /// Archive entry name for this record in the given encoding.
    pub fn entry_name(&self, encoding: RecordEncoding) -> String {
        format!("{}{}", self.name(), encoding.extension())
    }

    /// Resolve the record type from an entry stem, including the names
    /// used by older archive versions.
    fn from_stem(stem: &str) -> Option<Self> {
        let stem = stem.to_lowercase();
        let found = RecordType::ALL
            .into_iter()
            .filter(|kind| *kind != RecordType::Cover)
            .find(|kind| kind.name().to_lowercase() == stem);
        found.or(match stem.as_str() {
            "info" => Some(RecordType::MetaData),
            "export" => Some(RecordType::Books),
            _ => None,
        })
    }

    /// Expand `types` with everything the requested types depend on.
    ///
    /// Applying this more than once has no further effect.
    pub fn add_related_types(types: &mut BTreeSet<RecordType>) {
        loop {
            let before = types.len();
            if types.contains(&RecordType::Books) {
                types.insert(RecordType::Bookshelves);
                types.insert(RecordType::CalibreLibraries);
                types.insert(RecordType::CalibreCustomFields);
            }
            if types.contains(&RecordType::CalibreLibraries) {
                types.insert(RecordType::Bookshelves);
            }
            if types.contains(&RecordType::Preferences) || types.contains(&RecordType::Bookshelves) {
                types.insert(RecordType::Styles);
            }
            if types.len() == before {
                break;
            }
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serialization formats a record can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordEncoding {
    Json,
    Xml,
    Csv,
}

impl RecordEncoding {
    /// File extension, including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            RecordEncoding::Json => ".json",
            RecordEncoding::Xml => ".xml",
            RecordEncoding::Csv => ".csv",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "json" => Some(RecordEncoding::Json),
            "xml" => Some(RecordEncoding::Xml),
            "csv" => Some(RecordEncoding::Csv),
            _ => None,
        }
    }

    pub fn can_read(&self, record_type: RecordType) -> bool {
        match self {
            RecordEncoding::Json => record_type != RecordType::Cover,
            RecordEncoding::Xml => {
                matches!(record_type, RecordType::MetaData | RecordType::Styles | RecordType::Preferences)
            },
            RecordEncoding::Csv => record_type == RecordType::Books,
        }
    }

    pub fn can_write(&self, record_type: RecordType) -> bool {
        // Every format writes exactly what it can read.
        self.can_read(record_type)
    }

    /// A reader for `record_type`, if this encoding supports it.
    ///
    /// Covers have no encoding; they are read by a
    /// [`CoverRecordReader`](crate::codec::CoverRecordReader).
    pub fn create_reader(&self, record_type: RecordType) -> Option<Box<dyn RecordReader>> {
        if !self.can_read(record_type) {
            return None;
        }
        Some(match self {
            RecordEncoding::Json => Box::new(JsonRecordReader::new(record_type)),
            RecordEncoding::Xml => Box::new(XmlRecordReader::new(record_type)),
            RecordEncoding::Csv => Box::new(CsvRecordReader::new()),
        })
    }

    /// A writer for `record_type`, if this encoding supports it.
    pub fn create_writer(&self, record_type: RecordType) -> Option<Box<dyn RecordWriter>> {
        if !self.can_write(record_type) {
            return None;
        }
        Some(match self {
            RecordEncoding::Json => Box::new(JsonRecordWriter::new(record_type)),
            RecordEncoding::Xml => Box::new(XmlRecordWriter::new(record_type)),
            RecordEncoding::Csv => Box::new(CsvRecordWriter::new()),
        })
    }
}

impl fmt::Display for RecordEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().trim_start_matches('.'))
    }
}

/// One physical entry of an archive container.
///
/// Entries whose name is not recognised have no [`record_type`](Self::record_type)
/// and are skipped by the importer.
pub struct ArchiveReaderRecord<'a> {
    name: String,
    record_type: Option<RecordType>,
    encoding: Option<RecordEncoding>,
    last_modified: Option<UtcDateTime>,
    reader: &'a mut dyn Read,
}

impl<'a> ArchiveReaderRecord<'a> {
    pub fn new(name: impl Into<String>, last_modified: Option<UtcDateTime>, reader: &'a mut dyn Read) -> Self {
        let name = name.into();
        let path = Path::new(&name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or_default();

        let (record_type, encoding) = match RecordType::from_stem(stem) {
            Some(kind) => (Some(kind), RecordEncoding::from_extension(ext)),
            None if COVER_EXTENSIONS.contains(&ext.to_lowercase().as_str()) => (Some(RecordType::Cover), None),
            None => (None, None),
        };
        Self { name, record_type, encoding, last_modified, reader }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name without any directory prefix.
    pub fn file_name(&self) -> &str {
        Path::new(&self.name).file_name().and_then(|s| s.to_str()).unwrap_or(&self.name)
    }

    pub fn record_type(&self) -> Option<RecordType> {
        self.record_type
    }

    pub fn encoding(&self) -> Option<RecordEncoding> {
        self.encoding
    }

    pub fn last_modified(&self) -> Option<UtcDateTime> {
        self.last_modified
    }
}

impl Read for ArchiveReaderRecord<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for ArchiveReaderRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReaderRecord")
            .field("name", &self.name)
            .field("record_type", &self.record_type)
            .field("encoding", &self.encoding)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}
