use exn::ResultExt;
use folio_dbsync::Value;

use super::{dao, text};
use crate::error::{ErrorKind, Result};
use crate::models::Certificate;

dao! {
    CertificateDao
}

impl CertificateDao<'_> {
    pub fn all(&self) -> Result<Vec<Certificate>> {
        self.db()
            .query_map("SELECT name, der FROM certificates ORDER BY name", &[], |row| {
                Ok(Certificate { name: row.get(0)?, der: row.get(1)? })
            })
            .or_raise(|| ErrorKind::Database)
    }

    pub fn get(&self, name: &str) -> Result<Option<Certificate>> {
        self.db()
            .query_row("SELECT name, der FROM certificates WHERE name = ?", &[text(name)], |row| {
                Ok(Certificate { name: row.get(0)?, der: row.get(1)? })
            })
            .or_raise(|| ErrorKind::Database)
    }

    /// Store a certificate, replacing any previous one under the same name.
    pub fn upsert(&self, certificate: &Certificate) -> Result<()> {
        self.db()
            .execute(
                "INSERT INTO certificates (name, der) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET der = excluded.der",
                &[text(&certificate.name), Value::Blob(certificate.der.clone())],
            )
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}
