use exn::ResultExt;
use time::UtcDateTime;

use super::{dao, text};
use crate::dates;
use crate::error::{ErrorKind, Result};

dao! {
    /// Named "last done" timestamps, such as the last full export.
    SyncDateDao
}

impl SyncDateDao<'_> {
    pub fn get(&self, name: &str) -> Result<Option<UtcDateTime>> {
        let date: Option<String> = self
            .db()
            .query_row("SELECT utc_date FROM sync_dates WHERE name = ?", &[text(name)], |row| row.get(0))
            .or_raise(|| ErrorKind::Database)?;
        Ok(date.as_deref().and_then(dates::parse_iso))
    }

    pub fn set(&self, name: &str, date: UtcDateTime) -> Result<()> {
        self.db()
            .execute(
                "INSERT INTO sync_dates (name, utc_date) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET utc_date = excluded.utc_date",
                &[text(name), text(dates::to_sql(date))],
            )
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}
