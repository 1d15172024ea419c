use crate::error::Result;
use crate::package::Package;
use crate::repoproc::dedup::deduplicate;
use crate::storage::Database;
use crate::update::changes::{ChangeDetector, ChangeStats, ProjectChange};
use crate::update::classifier::classify_project;
use crate::update::hashes::HashPager;
use tracing::{debug, info, instrument, warn};

/// Batches touched project names into `queue_project_changes` calls
pub struct ChangeQueue<'a, D: Database + ?Sized> {
    db: &'a D,
    batch_size: usize,
    pending: Vec<String>,
    queued: usize,
}

impl<'a, D: Database + ?Sized> ChangeQueue<'a, D> {
    pub fn new(db: &'a D, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            queued: 0,
        }
    }

    pub fn push(&mut self, effname: &str) -> Result<()> {
        self.pending.push(effname.to_string());
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.db.queue_project_changes(&self.pending)?;
        self.queued += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    /// Names handed to the database so far
    pub fn queued(&self) -> usize {
        self.queued
    }
}

/// Applies one run's project stream to the database
pub struct Updater<'a, D: Database + ?Sized> {
    db: &'a D,
    hash_page_size: usize,
    change_batch_size: usize,
}

impl<'a, D: Database + ?Sized> Updater<'a, D> {
    pub fn new(db: &'a D, hash_page_size: usize, change_batch_size: usize) -> Self {
        Self {
            db,
            hash_page_size,
            change_batch_size,
        }
    }

    /// Diff `projects` against the stored hashes and persist the result
    ///
    /// `projects` must yield one group per effname in ascending order, as
    /// the heap merger does. Everything is applied inside one database run;
    /// any error rolls the run back.
    #[instrument(skip(self, projects))]
    pub fn update<I>(&self, projects: I) -> Result<ChangeStats>
    where
        I: Iterator<Item = Result<Vec<Package>>>,
    {
        self.db.begin_run()?;
        match self.apply(projects) {
            Ok(stats) => {
                self.db.commit_run()?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback) = self.db.rollback_run() {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    fn apply<I>(&self, projects: I) -> Result<ChangeStats>
    where
        I: Iterator<Item = Result<Vec<Package>>>,
    {
        let old = HashPager::new(self.db, self.hash_page_size);
        let new = projects.map(|group| group.map(deduplicate));
        let mut detector = ChangeDetector::new(old, new);
        let mut queue = ChangeQueue::new(self.db, self.change_batch_size);

        for change in detector.by_ref() {
            let change = change?;
            queue.push(change.effname())?;

            match change {
                ProjectChange::Added {
                    effname,
                    mut packages,
                    hash,
                }
                | ProjectChange::Updated {
                    effname,
                    mut packages,
                    hash,
                } => {
                    debug!(effname = %effname, packages = packages.len(), "Storing project");
                    classify_project(&mut packages);
                    self.db.add_packages(&packages)?;
                    self.db.update_project_hash(&effname, hash)?;
                }
                ProjectChange::Removed { effname } => {
                    debug!(effname = %effname, "Removing project");
                    self.db.remove_project_hash(&effname)?;
                }
            }
        }
        queue.flush()?;

        let stats = detector.stats();
        info!(
            added = stats.added,
            removed = stats.removed,
            changed = stats.changed,
            unchanged = stats.unchanged,
            queued = queue.queued(),
            "Update complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::testing::package;
    use crate::package::VersionClass;
    use crate::storage::SqliteDatabase;

    fn groups(packages: Vec<Vec<Package>>) -> impl Iterator<Item = Result<Vec<Package>>> {
        packages.into_iter().map(Ok)
    }

    #[test]
    fn test_first_run_adds_everything() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let updater = Updater::new(&db, 2, 10);

        let stats = updater
            .update(groups(vec![
                vec![package("arch", "a", "1"), package("debian", "a", "0.9")],
                vec![package("arch", "b", "1")],
            ]))
            .unwrap();

        assert_eq!(stats.added, 2);
        assert_eq!(db.count_projects().unwrap(), 2);
        let a = db.get_packages("a").unwrap();
        assert_eq!(a[0].versionclass, VersionClass::Newest);
        assert_eq!(a[1].versionclass, VersionClass::Outdated);
        assert_eq!(db.changed_projects().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_second_run_detects_changes() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let updater = Updater::new(&db, 1, 1);

        updater
            .update(groups(vec![
                vec![package("r", "a", "1")],
                vec![package("r", "b", "1")],
                vec![package("r", "d", "1")],
            ]))
            .unwrap();

        let stats = updater
            .update(groups(vec![
                vec![package("r", "b", "1")],
                vec![package("r", "c", "1")],
                vec![package("r", "d", "2")],
            ]))
            .unwrap();

        assert_eq!(
            stats,
            ChangeStats {
                added: 1,
                removed: 1,
                changed: 1,
                unchanged: 1
            }
        );
        assert!(db.get_packages("a").unwrap().is_empty());
        assert_eq!(db.get_packages("d").unwrap()[0].version, "2");
        assert_eq!(db.count_projects().unwrap(), 3);
    }

    #[test]
    fn test_duplicates_are_collapsed_before_hashing() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let updater = Updater::new(&db, 10, 10);
        let stats = updater
            .update(groups(vec![vec![package("r", "a", "1"), package("r", "a", "1")]]))
            .unwrap();
        assert_eq!(stats.added, 1);
        assert_eq!(db.get_packages("a").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_run_is_rolled_back() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let updater = Updater::new(&db, 10, 10);
        let result = updater.update(groups(vec![
            vec![package("r", "b", "1")],
            vec![package("r", "a", "1")],
        ]));
        assert!(result.is_err());
        assert_eq!(db.count_projects().unwrap(), 0);
        assert_eq!(db.count_packages().unwrap(), 0);
    }

    #[test]
    fn test_change_queue_batches() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let mut queue = ChangeQueue::new(&db, 2);
        queue.push("a").unwrap();
        assert_eq!(queue.queued(), 0);
        queue.push("b").unwrap();
        assert_eq!(queue.queued(), 2);
        queue.push("c").unwrap();
        queue.flush().unwrap();
        assert_eq!(queue.queued(), 3);
        assert_eq!(db.changed_projects().unwrap(), vec!["a", "b", "c"]);
    }
}
