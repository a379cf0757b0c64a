//! Import and export accumulators.

use std::collections::BTreeSet;
use std::ops::AddAssign;

use crate::record::RecordType;

/// How an import or export ended. Failures are reported as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The listener asked to stop. Results hold what was done until then.
    Cancelled,
}

/// What an import did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResults {
    /// Book rows seen, whether or not they were imported.
    pub books_processed: usize,
    pub books_created: usize,
    pub books_updated: usize,
    pub books_skipped: usize,
    pub books_failed: usize,
    pub covers_created: usize,
    pub covers_updated: usize,
    pub covers_skipped: usize,
    pub styles: usize,
    pub preferences: usize,
    pub certificates: usize,
    pub bookshelves: usize,
    pub calibre_libraries: usize,
    pub calibre_custom_fields: usize,
    /// Entries that were not recognised or not requested.
    pub records_skipped: usize,
    /// Row number and reason for each book that could not be imported.
    pub failed_lines: Vec<(usize, String)>,
    /// Record types actually read.
    pub record_types: BTreeSet<RecordType>,
}

impl ImportResults {
    pub fn has(&self, record_type: RecordType) -> bool {
        self.record_types.contains(&record_type)
    }

    pub fn book_count(&self) -> usize {
        self.books_created + self.books_updated + self.books_skipped
    }

    pub fn cover_count(&self) -> usize {
        self.covers_created + self.covers_updated + self.covers_skipped
    }
}

impl AddAssign for ImportResults {
    fn add_assign(&mut self, other: Self) {
        self.books_processed += other.books_processed;
        self.books_created += other.books_created;
        self.books_updated += other.books_updated;
        self.books_skipped += other.books_skipped;
        self.books_failed += other.books_failed;
        self.covers_created += other.covers_created;
        self.covers_updated += other.covers_updated;
        self.covers_skipped += other.covers_skipped;
        self.styles += other.styles;
        self.preferences += other.preferences;
        self.certificates += other.certificates;
        self.bookshelves += other.bookshelves;
        self.calibre_libraries += other.calibre_libraries;
        self.calibre_custom_fields += other.calibre_custom_fields;
        self.records_skipped += other.records_skipped;
        self.failed_lines.extend(other.failed_lines);
        self.record_types.extend(other.record_types);
    }
}

/// What an export wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportResults {
    pub books: usize,
    pub covers: usize,
    pub styles: usize,
    pub preferences: usize,
    pub certificates: usize,
    pub bookshelves: usize,
    pub calibre_libraries: usize,
    pub calibre_custom_fields: usize,
    /// Cover files to copy into the archive, in the order they were found.
    pub cover_filenames: Vec<String>,
    /// Record types actually written.
    pub record_types: BTreeSet<RecordType>,
}

impl ExportResults {
    pub fn has(&self, record_type: RecordType) -> bool {
        self.record_types.contains(&record_type)
    }

    /// Record that a cover file belongs in the archive.
    pub fn add_cover(&mut self, filename: String) {
        self.covers += 1;
        self.cover_filenames.push(filename);
        self.record_types.insert(RecordType::Cover);
    }
}

impl AddAssign for ExportResults {
    fn add_assign(&mut self, other: Self) {
        self.books += other.books;
        self.covers += other.covers;
        self.styles += other.styles;
        self.preferences += other.preferences;
        self.certificates += other.certificates;
        self.bookshelves += other.bookshelves;
        self.calibre_libraries += other.calibre_libraries;
        self.calibre_custom_fields += other.calibre_custom_fields;
        self.cover_filenames.extend(other.cover_filenames);
        self.record_types.extend(other.record_types);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_results_accumulate() {
        let mut total = ImportResults::default();
        total += ImportResults { books_created: 2, books_skipped: 1, ..Default::default() };
        total += ImportResults {
            books_updated: 1,
            failed_lines: vec![(4, "bad row".to_string())],
            record_types: [RecordType::Books].into(),
            ..Default::default()
        };
        assert_eq!(total.book_count(), 4);
        assert_eq!(total.failed_lines.len(), 1);
        assert!(total.has(RecordType::Books));
    }

    #[test]
    fn test_export_results_keep_cover_order() {
        let mut results = ExportResults::default();
        results.add_cover("b.jpg".to_string());
        let mut more = ExportResults::default();
        more.add_cover("a.jpg".to_string());
        results += more;
        assert_eq!(results.covers, 2);
        assert_eq!(results.cover_filenames, ["b.jpg", "a.jpg"]);
        assert!(results.has(RecordType::Cover));
    }
}
