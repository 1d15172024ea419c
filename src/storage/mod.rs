pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use crate::error::Result;
use crate::package::Package;
use crate::transformer::ProjectSpread;
use std::collections::HashMap;

/// Persisted project state consulted and updated by a run
///
/// Methods take `&self` so that the paged hash reader and the update driver
/// can share one handle while the change detector is running.
pub trait Database {
    /// Up to `limit` `(effname, hash)` pairs with effname strictly greater
    /// than `after`, in ascending effname order
    fn get_project_hashes(&self, after: Option<&str>, limit: usize) -> Result<Vec<(String, u64)>>;

    /// Record touched project names for downstream bookkeeping
    fn queue_project_changes(&self, effnames: &[String]) -> Result<()>;

    /// Store packages, replacing whatever was stored for their projects
    fn add_packages(&self, packages: &[Package]) -> Result<()>;

    fn update_project_hash(&self, effname: &str, hash: u64) -> Result<()>;

    /// Forget a project: its hash and its stored packages
    fn remove_project_hash(&self, effname: &str) -> Result<()>;

    /// Repository and family counts per project, for `repos`/`families` rules
    fn project_spread(&self) -> Result<HashMap<String, ProjectSpread>>;

    /// Start applying one run; everything until `commit_run` lands at once
    fn begin_run(&self) -> Result<()> {
        Ok(())
    }

    fn commit_run(&self) -> Result<()> {
        Ok(())
    }

    fn rollback_run(&self) -> Result<()> {
        Ok(())
    }
}
