//! Layered configuration for folio.
//!
//! Values come from, in increasing order of precedence:
//!
//! 1. compiled defaults,
//! 2. a `folio.toml` file (by default in the platform's config directory),
//! 3. `FOLIO_*` environment variables, with `__` separating nested keys
//!    (`FOLIO_BACKUP__COMPRESSION=gzip`).
//!
//! ```toml
//! database = "/srv/folio/catalogue.db"
//! covers = "/srv/folio/covers"
//!
//! [backup]
//! encoding = "csv"
//! compression = "gzip"
//! update_policy = "overwrite"
//! progress_interval_ms = 500
//! open_retries = 5
//! ```

pub mod error;

use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use folio_archive::{Compression, ExportHelper, ImportHelper, RecordEncoding, RecordType, TracingProgress, UpdatePolicy};
use folio_store::{Catalogue, LocalCoverStorage, OpenOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, Result};

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "folio.toml";
/// Prefix of the environment variables read.
pub const ENV_PREFIX: &str = "FOLIO_";

const DATABASE_FILE: &str = "catalogue.db";
const COVERS_DIR: &str = "covers";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Catalogue database. Defaults to `catalogue.db` in the data directory.
    pub database: Option<PathBuf>,
    /// Cover image directory. Defaults to `covers/` in the data directory.
    pub covers: Option<PathBuf>,
    pub backup: BackupConfig,
}

/// Defaults for imports and exports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    /// Encoding of the books record on export: `json` or `csv`.
    pub encoding: RecordEncoding,
    pub compression: Compression,
    pub update_policy: UpdatePolicy,
    pub progress_interval_ms: u64,
    /// Attempts at opening a busy database.
    pub open_retries: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            encoding: RecordEncoding::Json,
            compression: Compression::None,
            update_policy: UpdatePolicy::default(),
            progress_interval_ms: 250,
            open_retries: OpenOptions::default().retries,
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "folio").ok_or_raise(|| ErrorKind::NoDataDirectory)
}

impl Config {
    /// Providers in precedence order, reading `file` if it exists.
    pub fn figment(file: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Toml::file(file.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from the platform's configuration directory.
    pub fn load() -> Result<Self> {
        let file = project_dirs()?.config_dir().join(CONFIG_FILE);
        Self::load_from(file)
    }

    #[instrument(skip_all, fields(file = %file.as_ref().display()))]
    pub fn load_from(file: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Self::figment(file.as_ref())
            .extract()
            .or_raise(|| ErrorKind::Invalid(format!("cannot read {}", file.as_ref().display())))?;
        config.validate()?;
        debug!(?config, "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backup.encoding.can_write(RecordType::Books) {
            exn::bail!(ErrorKind::Invalid(format!("books cannot be exported as {}", self.backup.encoding)));
        }
        if self.backup.open_retries == 0 {
            exn::bail!(ErrorKind::Invalid("backup.open_retries must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join(DATABASE_FILE)),
        }
    }

    pub fn covers_path(&self) -> Result<PathBuf> {
        match &self.covers {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join(COVERS_DIR)),
        }
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions { retries: self.backup.open_retries, ..OpenOptions::default() }
    }

    /// Open the catalogue, creating its directory if needed.
    pub fn open_catalogue(&self) -> Result<Catalogue> {
        let path = self.database_path()?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Open("catalogue"))?;
        }
        Catalogue::open(&path, &self.open_options()).or_raise(|| ErrorKind::Open("catalogue"))
    }

    pub fn open_covers(&self) -> Result<LocalCoverStorage> {
        LocalCoverStorage::new(self.covers_path()?).or_raise(|| ErrorKind::Open("cover directory"))
    }

    pub fn progress(&self) -> TracingProgress {
        TracingProgress::new(Duration::from_millis(self.backup.progress_interval_ms))
    }

    pub fn import_helper(&self, record_types: impl IntoIterator<Item = RecordType>) -> ImportHelper {
        ImportHelper::new(record_types, self.backup.update_policy)
    }

    pub fn export_helper(&self, record_types: impl IntoIterator<Item = RecordType>) -> ExportHelper {
        ExportHelper {
            books_encoding: self.backup.encoding,
            compression: self.backup.compression,
            ..ExportHelper::new(record_types)
        }
    }
}
