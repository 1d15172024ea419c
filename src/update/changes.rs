use crate::error::{Result, UnifyError};
use crate::package::Package;
use crate::update::hashes::calculate_project_classless_hash;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectChange {
    Added {
        effname: String,
        packages: Vec<Package>,
        hash: u64,
    },
    Removed {
        effname: String,
    },
    Updated {
        effname: String,
        packages: Vec<Package>,
        hash: u64,
    },
}

impl ProjectChange {
    pub fn effname(&self) -> &str {
        match self {
            ProjectChange::Added { effname, .. }
            | ProjectChange::Removed { effname }
            | ProjectChange::Updated { effname, .. } => effname,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeStats {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
}

impl ChangeStats {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.changed + self.unchanged
    }
}

/// Sorted merge-join of stored project hashes against new project groups
///
/// Both inputs must be strictly ascending by effname. Unchanged projects are
/// only counted.
pub struct ChangeDetector<O, N> {
    old: O,
    new: N,
    old_head: Option<(String, u64)>,
    new_head: Option<(String, Vec<Package>)>,
    last_old: Option<String>,
    last_new: Option<String>,
    old_done: bool,
    new_done: bool,
    failed: bool,
    stats: ChangeStats,
}

impl<O, N> ChangeDetector<O, N>
where
    O: Iterator<Item = Result<(String, u64)>>,
    N: Iterator<Item = Result<Vec<Package>>>,
{
    pub fn new(old: O, new: N) -> Self {
        Self {
            old,
            new,
            old_head: None,
            new_head: None,
            last_old: None,
            last_new: None,
            old_done: false,
            new_done: false,
            failed: false,
            stats: ChangeStats::default(),
        }
    }

    pub fn stats(&self) -> ChangeStats {
        self.stats
    }

    fn pull_old(&mut self) -> Result<()> {
        if self.old_head.is_some() || self.old_done {
            return Ok(());
        }
        match self.old.next().transpose()? {
            Some((effname, hash)) => {
                check_ascending("old", &mut self.last_old, &effname)?;
                self.old_head = Some((effname, hash));
            }
            None => self.old_done = true,
        }
        Ok(())
    }

    fn pull_new(&mut self) -> Result<()> {
        if self.new_head.is_some() || self.new_done {
            return Ok(());
        }
        loop {
            match self.new.next().transpose()? {
                Some(packages) => {
                    // empty groups carry no project
                    let Some(first) = packages.first() else {
                        continue;
                    };
                    let effname = first.effname.clone();
                    if let Some(stray) = packages.iter().find(|p| p.effname != effname) {
                        return Err(UnifyError::MergeOrder {
                            stream: "new",
                            previous: effname,
                            next: stray.effname.clone(),
                        });
                    }
                    check_ascending("new", &mut self.last_new, &effname)?;
                    self.new_head = Some((effname, packages));
                }
                None => self.new_done = true,
            }
            return Ok(());
        }
    }

    fn step(&mut self) -> Result<Option<ProjectChange>> {
        loop {
            self.pull_old()?;
            self.pull_new()?;

            let order = match (&self.old_head, &self.new_head) {
                (None, None) => return Ok(None),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((old, _)), Some((new, _))) => old.cmp(new),
            };

            match order {
                Ordering::Less => {
                    let Some((effname, _)) = self.old_head.take() else {
                        continue;
                    };
                    self.stats.removed += 1;
                    return Ok(Some(ProjectChange::Removed { effname }));
                }
                Ordering::Greater => {
                    let Some((effname, packages)) = self.new_head.take() else {
                        continue;
                    };
                    let hash = calculate_project_classless_hash(&packages)?;
                    self.stats.added += 1;
                    return Ok(Some(ProjectChange::Added {
                        effname,
                        packages,
                        hash,
                    }));
                }
                Ordering::Equal => {
                    let (Some((_, old_hash)), Some((effname, packages))) =
                        (self.old_head.take(), self.new_head.take())
                    else {
                        continue;
                    };
                    let hash = calculate_project_classless_hash(&packages)?;
                    if hash == old_hash {
                        self.stats.unchanged += 1;
                        continue;
                    }
                    self.stats.changed += 1;
                    return Ok(Some(ProjectChange::Updated {
                        effname,
                        packages,
                        hash,
                    }));
                }
            }
        }
    }
}

fn check_ascending(stream: &'static str, last: &mut Option<String>, next: &str) -> Result<()> {
    if let Some(previous) = last {
        if next <= previous.as_str() {
            return Err(UnifyError::MergeOrder {
                stream,
                previous: previous.clone(),
                next: next.to_string(),
            });
        }
    }
    *last = Some(next.to_string());
    Ok(())
}

impl<O, N> Iterator for ChangeDetector<O, N>
where
    O: Iterator<Item = Result<(String, u64)>>,
    N: Iterator<Item = Result<Vec<Package>>>,
{
    type Item = Result<ProjectChange>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(change) => change.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::testing::package;

    fn group(effname: &str, version: &str) -> Vec<Package> {
        vec![package("repo", effname, version)]
    }

    fn hash_of(packages: &[Package]) -> u64 {
        calculate_project_classless_hash(packages).unwrap()
    }

    #[test]
    fn test_classification() {
        let b = group("b", "1.0");
        let d_old = group("d", "1.0");
        let d_new = group("d", "2.0");
        let c = group("c", "1.0");

        let old = vec![
            Ok(("a".to_string(), 1)),
            Ok(("b".to_string(), hash_of(&b))),
            Ok(("d".to_string(), hash_of(&d_old))),
        ];
        let new = vec![Ok(b), Ok(c.clone()), Ok(d_new.clone())];

        let mut detector = ChangeDetector::new(old.into_iter(), new.into_iter());
        let changes: Vec<ProjectChange> = detector.by_ref().map(|c| c.unwrap()).collect();

        assert_eq!(
            changes,
            vec![
                ProjectChange::Removed {
                    effname: "a".to_string()
                },
                ProjectChange::Added {
                    effname: "c".to_string(),
                    hash: hash_of(&c),
                    packages: c,
                },
                ProjectChange::Updated {
                    effname: "d".to_string(),
                    hash: hash_of(&d_new),
                    packages: d_new,
                },
            ]
        );

        let stats = detector.stats();
        assert_eq!(
            stats,
            ChangeStats {
                added: 1,
                removed: 1,
                changed: 1,
                unchanged: 1
            }
        );
        assert_eq!(stats.total(), 4);
    }

    #[test]
    fn test_empty_inputs() {
        let old: Vec<Result<(String, u64)>> = Vec::new();
        let new: Vec<Result<Vec<Package>>> = Vec::new();
        let mut detector = ChangeDetector::new(old.into_iter(), new.into_iter());
        assert!(detector.next().is_none());
        assert_eq!(detector.stats().total(), 0);
    }

    #[test]
    fn test_exhausted_sides() {
        let old = vec![Ok(("x".to_string(), 1)), Ok(("y".to_string(), 2))];
        let new: Vec<Result<Vec<Package>>> = Vec::new();
        let removed: Vec<String> = ChangeDetector::new(old.into_iter(), new.into_iter())
            .map(|c| c.unwrap().effname().to_string())
            .collect();
        assert_eq!(removed, vec!["x", "y"]);

        let old: Vec<Result<(String, u64)>> = Vec::new();
        let new = vec![Ok(group("x", "1")), Ok(group("y", "1"))];
        let added = ChangeDetector::new(old.into_iter(), new.into_iter())
            .filter(|c| matches!(c, Ok(ProjectChange::Added { .. })))
            .count();
        assert_eq!(added, 2);
    }

    #[test]
    fn test_versionclass_does_not_count_as_change() {
        let stored = group("p", "1.0");
        let mut reclassified = stored.clone();
        reclassified[0].versionclass = crate::package::VersionClass::Newest;

        let old = vec![Ok(("p".to_string(), hash_of(&stored)))];
        let mut detector = ChangeDetector::new(old.into_iter(), vec![Ok(reclassified)].into_iter());
        assert!(detector.next().is_none());
        assert_eq!(detector.stats().unchanged, 1);
    }

    #[test]
    fn test_duplicate_old_key_is_fatal() {
        let old = vec![Ok(("a".to_string(), 1)), Ok(("a".to_string(), 2))];
        let new = vec![Ok(group("z", "1"))];
        let results: Vec<_> = ChangeDetector::new(old.into_iter(), new.into_iter()).collect();
        assert!(matches!(
            results.last(),
            Some(Err(UnifyError::MergeOrder { stream: "old", .. }))
        ));
    }

    #[test]
    fn test_descending_new_stream_is_fatal() {
        let old: Vec<Result<(String, u64)>> = Vec::new();
        let new = vec![Ok(group("b", "1")), Ok(group("a", "1"))];
        let results: Vec<_> = ChangeDetector::new(old.into_iter(), new.into_iter()).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[1],
            Err(UnifyError::MergeOrder { stream: "new", .. })
        ));
    }

    #[test]
    fn test_collision_aborts() {
        let old: Vec<Result<(String, u64)>> = Vec::new();
        let dup = vec![package("r", "a", "1"), package("r", "a", "1")];
        let results: Vec<_> = ChangeDetector::new(old.into_iter(), vec![Ok(dup)].into_iter()).collect();
        assert!(matches!(
            results.as_slice(),
            [Err(UnifyError::HashCollision { .. })]
        ));
    }
}
