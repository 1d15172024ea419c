use crate::error::{Result, UnifyError};
use crate::package::Package;
use crate::storage::schema::Schema;
use crate::storage::Database;
use crate::transformer::ProjectSpread;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Open (and create if needed) a database file
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Stored packages of one project, in insertion order
    pub fn get_packages(&self, effname: &str) -> Result<Vec<Package>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM packages WHERE effname = ? ORDER BY id")?;
        let rows = stmt
            .query_map([effname], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|data| {
                serde_json::from_str(data).map_err(|e| {
                    UnifyError::Serialization(format!("stored package of {}: {}", effname, e))
                })
            })
            .collect()
    }

    pub fn get_project_hash(&self, effname: &str) -> Result<Option<u64>> {
        let hash: Option<i64> = self
            .conn
            .query_row(
                "SELECT hash FROM project_hashes WHERE effname = ?",
                [effname],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.map(|h| h as u64))
    }

    /// Get package count
    pub fn count_packages(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_projects(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM project_hashes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// List all repositories with package counts
    pub fn list_repositories(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT repo, COUNT(*) FROM packages GROUP BY repo ORDER BY repo")?;

        let repos: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(repos
            .into_iter()
            .map(|(repo, count)| (repo, count as usize))
            .collect())
    }

    /// Queued project names, oldest first
    pub fn changed_projects(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT effname FROM changed_projects ORDER BY id")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }
}

impl Database for SqliteDatabase {
    fn get_project_hashes(&self, after: Option<&str>, limit: usize) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT effname, hash FROM project_hashes
             WHERE ?1 IS NULL OR effname > ?1
             ORDER BY effname LIMIT ?2",
        )?;
        let page = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(page)
    }

    fn queue_project_changes(&self, effnames: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO changed_projects (effname, changed_at) VALUES (?, ?)")?;
        for effname in effnames {
            stmt.execute(params![effname, now])?;
        }
        Ok(())
    }

    fn add_packages(&self, packages: &[Package]) -> Result<()> {
        let projects: BTreeSet<&str> = packages.iter().map(|p| p.effname.as_str()).collect();

        {
            let mut delete = self
                .conn
                .prepare_cached("DELETE FROM packages WHERE effname = ?")?;
            for effname in projects {
                delete.execute([effname])?;
            }
        }

        let mut insert = self.conn.prepare_cached(
            "INSERT INTO packages
                (effname, repo, family, visiblename, version, versionclass, flags, shadow, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for package in packages {
            let data = serde_json::to_string(package)
                .map_err(|e| UnifyError::Serialization(e.to_string()))?;
            insert.execute(params![
                package.effname,
                package.repo,
                package.family,
                package.visiblename,
                package.version,
                package.versionclass.as_i32(),
                package.flags.bits(),
                package.shadow,
                data,
            ])?;
        }

        Ok(())
    }

    fn update_project_hash(&self, effname: &str, hash: u64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO project_hashes (effname, hash) VALUES (?, ?)",
            params![effname, hash as i64],
        )?;
        Ok(())
    }

    fn remove_project_hash(&self, effname: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM project_hashes WHERE effname = ?", [effname])?;
        self.conn
            .execute("DELETE FROM packages WHERE effname = ?", [effname])?;
        Ok(())
    }

    fn project_spread(&self) -> Result<HashMap<String, ProjectSpread>> {
        let mut stmt = self.conn.prepare(
            "SELECT effname, COUNT(DISTINCT repo), COUNT(DISTINCT family)
             FROM packages GROUP BY effname",
        )?;
        let spread = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ProjectSpread {
                        repos: row.get::<_, i64>(1)? as usize,
                        families: row.get::<_, i64>(2)? as usize,
                    },
                ))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(spread)
    }

    fn begin_run(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit_run(&self) -> Result<()> {
        self.set_metadata("last_update", &Utc::now().to_rfc3339())?;
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_run(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::testing::package;
    use crate::package::VersionClass;

    #[test]
    fn test_hash_paging() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        for (name, hash) in [("c", 3u64), ("a", 1), ("b", u64::MAX), ("d", 4)] {
            db.update_project_hash(name, hash).unwrap();
        }

        let first = db.get_project_hashes(None, 2).unwrap();
        assert_eq!(first, vec![("a".to_string(), 1), ("b".to_string(), u64::MAX)]);

        let second = db.get_project_hashes(Some("b"), 2).unwrap();
        assert_eq!(second, vec![("c".to_string(), 3), ("d".to_string(), 4)]);

        assert!(db.get_project_hashes(Some("d"), 2).unwrap().is_empty());
    }

    #[test]
    fn test_add_packages_replaces_project() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.add_packages(&[package("a", "foo", "1.0"), package("b", "foo", "1.1")])
            .unwrap();
        db.add_packages(&[package("bar_repo", "bar", "2.0")]).unwrap();

        let mut newer = package("a", "foo", "2.0");
        newer.versionclass = VersionClass::Newest;
        db.add_packages(&[newer.clone()]).unwrap();

        assert_eq!(db.get_packages("foo").unwrap(), vec![newer]);
        assert_eq!(db.count_packages().unwrap(), 2);
    }

    #[test]
    fn test_remove_project_drops_packages() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.add_packages(&[package("a", "foo", "1.0")]).unwrap();
        db.update_project_hash("foo", 42).unwrap();

        db.remove_project_hash("foo").unwrap();
        assert_eq!(db.get_project_hash("foo").unwrap(), None);
        assert!(db.get_packages("foo").unwrap().is_empty());
    }

    #[test]
    fn test_project_spread() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let mut a = package("debian_11", "foo", "1.0");
        a.family = "debuntu".to_string();
        let mut b = package("debian_12", "foo", "1.1");
        b.family = "debuntu".to_string();
        let c = package("arch", "foo", "1.1");
        db.add_packages(&[a, b, c]).unwrap();

        let spread = db.project_spread().unwrap();
        assert_eq!(spread["foo"], ProjectSpread { repos: 3, families: 2 });
    }

    #[test]
    fn test_rollback_discards_run() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.begin_run().unwrap();
        db.update_project_hash("foo", 1).unwrap();
        db.queue_project_changes(&["foo".to_string()]).unwrap();
        db.rollback_run().unwrap();
        assert_eq!(db.count_projects().unwrap(), 0);
        assert!(db.changed_projects().unwrap().is_empty());

        db.begin_run().unwrap();
        db.update_project_hash("foo", 1).unwrap();
        db.commit_run().unwrap();
        assert_eq!(db.get_project_hash("foo").unwrap(), Some(1));
        assert!(db.get_metadata("last_update").unwrap().is_some());
    }
}
