use exn::ResultExt;
use tracing::instrument;

use super::dao;
use crate::error::{ErrorKind, Result};

dao! {
    MaintenanceDao
}

impl MaintenanceDao<'_> {
    /// Remove link rows and references left dangling by deletions, then let
    /// SQLite refresh its statistics.
    #[instrument("purging catalogue", skip(self))]
    pub fn purge(&self) -> Result<()> {
        self.catalogue.write_transaction(|| {
            self.db()
                .exec_sql(include_str!("../../queries/purge_orphans.sql"))
                .or_raise(|| ErrorKind::Database)
        })?;
        self.db().optimize().or_raise(|| ErrorKind::Database)
    }
}
