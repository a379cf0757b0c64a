//! Book import shared by every book record reader.

use exn::ResultExt;
use folio_dbsync::TxLock;
use folio_store::{Book, WriteFlags};
use tracing::{debug, warn};

use super::ReadContext;
use crate::error::{ErrorKind, Result};
use crate::helper::UpdatePolicy;
use crate::progress::Throttle;
use crate::record::RecordType;
use crate::results::ImportResults;

/// Books imported per transaction.
const BATCH_SIZE: usize = 10;

/// Insert `book`, or update the stored book with the same UUID according to
/// the import's [`UpdatePolicy`].
///
/// `import_id` is the id the book had in the exporting database. It is
/// reused for a new book when it is positive and not already taken here.
/// Exactly one of the created, updated or skipped counters is incremented.
pub fn import_book_with_uuid(
    ctx: &ReadContext<'_>,
    mut book: Book,
    import_id: Option<i64>,
    results: &mut ImportResults,
) -> Result<()> {
    let books = ctx.catalogue.books();
    let flags = WriteFlags { use_id_if_present: false, use_update_date_if_present: true };

    let Some(existing) = books.lookup_by_uuid(&book.uuid).or_raise(|| ErrorKind::Storage)? else {
        book.id = match import_id {
            Some(id) if id > 0 && !books.exists(id).or_raise(|| ErrorKind::Storage)? => Some(id),
            _ => None,
        };
        let flags = WriteFlags { use_id_if_present: book.id.is_some(), ..flags };
        let id = books.insert(&book, flags).or_raise(|| ErrorKind::Storage)?;
        debug!(id, uuid = %book.uuid, "created book");
        results.books_created += 1;
        return Ok(());
    };

    let update = match ctx.helper.update_policy {
        UpdatePolicy::Overwrite => true,
        UpdatePolicy::Skip => false,
        UpdatePolicy::OnlyNewer => {
            let stored = books.last_update(existing).or_raise(|| ErrorKind::Storage)?;
            match (book.last_updated, stored) {
                (Some(imported), Some(stored)) => imported > stored,
                // Nothing to compare against: the import wins.
                (Some(_), None) => true,
                (None, _) => false,
            }
        },
    };
    match update {
        true => {
            books.update(&book, existing, flags).or_raise(|| ErrorKind::Storage)?;
            debug!(id = existing, uuid = %book.uuid, "updated book");
            results.books_updated += 1;
        },
        false => results.books_skipped += 1,
    }
    Ok(())
}

/// Import a stream of parsed book rows.
///
/// Rows are `(line, parsed)` pairs: `parsed` is the book and its id in the
/// exporting database, or the reason the row could not be decoded. Failed
/// rows are recorded and skipped. Cancellation is checked before each row.
pub(crate) fn import_books<I>(ctx: &ReadContext<'_>, rows: I) -> Result<ImportResults>
where
    I: IntoIterator<Item = (usize, Result<(Book, Option<i64>)>)>,
{
    let db = ctx.catalogue.db();
    let mut results = ImportResults::default();
    results.record_types.insert(RecordType::Books);
    let mut tx = None;

    let outcome = import_batches(ctx, rows, &mut tx, &mut results);
    // A batch left open by a storage failure is rolled back.
    if let Some(tx) = tx.take() {
        if outcome.is_ok() {
            db.set_transaction_successful();
        }
        db.end_transaction(tx).or_raise(|| ErrorKind::Storage)?;
    }
    outcome?;
    Ok(results)
}

fn import_batches<'db, I>(
    ctx: &ReadContext<'db>,
    rows: I,
    tx: &mut Option<TxLock<'db>>,
    results: &mut ImportResults,
) -> Result<()>
where
    I: IntoIterator<Item = (usize, Result<(Book, Option<i64>)>)>,
{
    let db = ctx.catalogue.db();
    let mut throttle = Throttle::default();
    let mut batched = 0;

    for (line, parsed) in rows {
        if ctx.progress.is_cancelled() {
            break;
        }
        if tx.is_none() && !db.owns_transaction() {
            *tx = Some(db.begin_transaction(true).or_raise(|| ErrorKind::Storage)?);
        }
        results.books_processed += 1;
        // A row that fails halfway leaves nothing of itself in the batch.
        let imported = match parsed {
            Ok((book, id)) => db
                .savepoint("import_book", || import_book_with_uuid(ctx, book, id, results))
                .or_raise(|| ErrorKind::Storage)?,
            Err(err) => Err(err),
        };
        if let Err(err) = imported {
            warn!(line, error = %err, "skipping book");
            results.books_failed += 1;
            results.failed_lines.push((line, err.to_string()));
        }

        batched += 1;
        if batched == BATCH_SIZE {
            batched = 0;
            if let Some(tx) = tx.take() {
                db.set_transaction_successful();
                db.end_transaction(tx).or_raise(|| ErrorKind::Storage)?;
            }
        }
        throttle.tick(ctx.progress, || {
            format!(
                "books: {} created, {} updated, {} skipped",
                results.books_created, results.books_updated, results.books_skipped
            )
        });
    }
    throttle.finish(ctx.progress, || {
        format!(
            "books: {} created, {} updated, {} skipped",
            results.books_created, results.books_updated, results.books_skipped
        )
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::ImportHelper;
    use crate::progress::TracingProgress;
    use folio_store::{Catalogue, MockCoverStorage};
    use rstest::rstest;
    use time::UtcDateTime;
    use time::macros::utc_datetime;

    const UUID: &str = "7d3f2b9e-4c1a-4d8e-a6b0-2f9c1e5d7a31";
    const T0: UtcDateTime = utc_datetime!(2023-03-01 12:00:00);

    fn stored(catalogue: &Catalogue) -> i64 {
        let book = Book { uuid: UUID.to_string(), last_updated: Some(T0), ..Book::new("Stored") };
        catalogue.books().insert(&book, WriteFlags { use_update_date_if_present: true, ..Default::default() }).unwrap()
    }

    fn imported(last_updated: Option<UtcDateTime>) -> Book {
        Book { uuid: UUID.to_string(), last_updated, ..Book::new("Imported") }
    }

    fn import(catalogue: &Catalogue, policy: UpdatePolicy, book: Book, id: Option<i64>) -> ImportResults {
        let helper = ImportHelper::new([RecordType::Books], policy);
        let covers = MockCoverStorage::new();
        let progress = TracingProgress::default();
        let ctx = ReadContext { catalogue, covers: &covers, helper: &helper, progress: &progress };
        let mut results = ImportResults::default();
        import_book_with_uuid(&ctx, book, id, &mut results).unwrap();
        results
    }

    fn counters(results: &ImportResults) -> (usize, usize, usize) {
        (results.books_created, results.books_updated, results.books_skipped)
    }

    #[rstest]
    #[case(UpdatePolicy::Overwrite, Some(utc_datetime!(2023-01-01 00:00)), (0, 1, 0))]
    #[case(UpdatePolicy::Overwrite, Some(utc_datetime!(2024-01-01 00:00)), (0, 1, 0))]
    #[case(UpdatePolicy::OnlyNewer, Some(utc_datetime!(2024-01-01 00:00)), (0, 1, 0))]
    #[case(UpdatePolicy::OnlyNewer, Some(T0), (0, 0, 1))]
    #[case(UpdatePolicy::OnlyNewer, Some(utc_datetime!(2023-01-01 00:00)), (0, 0, 1))]
    #[case(UpdatePolicy::OnlyNewer, None, (0, 0, 1))]
    #[case(UpdatePolicy::Skip, Some(utc_datetime!(2024-01-01 00:00)), (0, 0, 1))]
    fn test_update_policy(
        #[case] policy: UpdatePolicy,
        #[case] last_updated: Option<UtcDateTime>,
        #[case] expected: (usize, usize, usize),
    ) {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let id = stored(&catalogue);
        let results = import(&catalogue, policy, imported(last_updated), None);
        assert_eq!(counters(&results), expected);

        let title = catalogue.books().get(id).unwrap().unwrap().title;
        let expected_title = match expected.1 {
            1 => "Imported",
            _ => "Stored",
        };
        assert_eq!(title, expected_title);
        assert_eq!(catalogue.books().count().unwrap(), 1);
    }

    #[rstest]
    #[case(Some(42), 42)]
    #[case(Some(0), 1)]
    #[case(Some(-3), 1)]
    #[case(None, 1)]
    fn test_new_book_id_reuse(#[case] import_id: Option<i64>, #[case] expected: i64) {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let results = import(&catalogue, UpdatePolicy::Skip, imported(Some(T0)), import_id);
        assert_eq!(counters(&results), (1, 0, 0));
        assert_eq!(catalogue.books().lookup_by_uuid(UUID).unwrap(), Some(expected));
    }

    #[test]
    fn test_failed_row_leaves_nothing_behind() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        catalogue
            .db()
            .exec_sql(
                "CREATE TEMP TRIGGER reject_shelf BEFORE INSERT ON book_bookshelf
                 WHEN (SELECT name FROM bookshelves WHERE id = NEW.bookshelf_id) = 'Broken'
                 BEGIN SELECT RAISE(ABORT, 'shelf rejected'); END",
            )
            .unwrap();
        let helper = ImportHelper::new([RecordType::Books], UpdatePolicy::Overwrite);
        let covers = MockCoverStorage::new();
        let progress = TracingProgress::default();
        let ctx = ReadContext { catalogue: &catalogue, covers: &covers, helper: &helper, progress: &progress };

        let good = Book { uuid: "a0000000-0000-4000-8000-000000000001".to_string(), ..Book::new("Kept") };
        let broken = Book {
            uuid: "a0000000-0000-4000-8000-000000000002".to_string(),
            bookshelves: vec!["Broken".to_string()],
            ..Book::new("Half written")
        };
        let results = import_books(&ctx, [(1, Ok((good, None))), (2, Ok((broken, None)))]).unwrap();

        assert_eq!((results.books_created, results.books_failed), (1, 1));
        assert_eq!(results.failed_lines.iter().map(|(line, _)| *line).collect::<Vec<_>>(), [2]);
        assert_eq!(catalogue.books().count().unwrap(), 1);
        assert_eq!(catalogue.books().lookup_by_uuid("a0000000-0000-4000-8000-000000000002").unwrap(), None);
        assert!(catalogue.bookshelves().find_by_name("Broken").unwrap().is_none());
    }

    #[test]
    fn test_every_book_reaches_the_progress_listener() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let helper = ImportHelper::new([RecordType::Books], UpdatePolicy::Overwrite);
        let covers = MockCoverStorage::new();
        // Long enough that only the first book is published while looping.
        let progress = TracingProgress::new(std::time::Duration::from_secs(3600));
        let ctx = ReadContext { catalogue: &catalogue, covers: &covers, helper: &helper, progress: &progress };

        let rows = (1..=13).map(|n| {
            let book = Book { uuid: format!("b0000000-0000-4000-8000-{n:012}"), ..Book::new(format!("Book {n}")) };
            (n, Ok((book, None)))
        });
        let results = import_books(&ctx, rows).unwrap();
        assert_eq!(results.books_created, 13);
        assert_eq!(progress.position(), 13);
    }

    #[test]
    fn test_taken_id_is_not_reused() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let other = Book { uuid: "11111111-2222-3333-4444-555555555555".to_string(), ..Book::new("Other") };
        let taken = catalogue.books().insert(&other, WriteFlags::default()).unwrap();

        import(&catalogue, UpdatePolicy::Skip, imported(Some(T0)), Some(taken));
        let id = catalogue.books().lookup_by_uuid(UUID).unwrap().unwrap();
        assert_ne!(id, taken);
    }

    #[test]
    fn test_import_books_records_failed_rows() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let helper = ImportHelper::default();
        let covers = MockCoverStorage::new();
        let progress = TracingProgress::default();
        let ctx = ReadContext { catalogue: &catalogue, covers: &covers, helper: &helper, progress: &progress };

        let rows = (1..=25).map(|line| {
            let parsed = match line {
                7 => Err(exn::Exn::from(ErrorKind::format("bad row"))),
                _ => Ok((Book { uuid: format!("00000000-0000-0000-0000-{line:012}"), ..Book::new("T") }, None)),
            };
            (line, parsed)
        });
        let results = import_books(&ctx, rows).unwrap();
        assert_eq!(results.books_processed, 25);
        assert_eq!(results.books_created, 24);
        assert_eq!(results.books_failed, 1);
        assert_eq!(results.failed_lines[0].0, 7);
        assert_eq!(catalogue.books().count().unwrap(), 24);
        assert!(!catalogue.db().in_transaction());
    }
}
