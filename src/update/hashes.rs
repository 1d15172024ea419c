use crate::error::{Result, UnifyError};
use crate::package::Package;
use crate::storage::Database;
use std::collections::{HashMap, VecDeque};

/// XOR of the classless hashes of a project's packages
///
/// Two packages with the same classless hash mean duplicated data upstream
/// and abort the run.
pub fn calculate_project_classless_hash(packages: &[Package]) -> Result<u64> {
    let Some(first) = packages.first() else {
        return Ok(0);
    };
    combine_package_hashes(
        &first.effname,
        packages.iter().map(|p| (p.classless_hash(), p)),
    )
}

pub(crate) fn combine_package_hashes<'a, I>(effname: &str, hashes: I) -> Result<u64>
where
    I: IntoIterator<Item = (u64, &'a Package)>,
{
    let mut seen: HashMap<u64, &Package> = HashMap::new();
    let mut combined = 0u64;

    for (hash, package) in hashes {
        if let Some(previous) = seen.insert(hash, package) {
            return Err(UnifyError::HashCollision {
                effname: effname.to_string(),
                first: previous.ident(),
                second: package.ident(),
            });
        }
        combined ^= hash;
    }

    Ok(combined)
}

/// Lazily pages `(effname, hash)` pairs out of the database
///
/// Pages are requested with the last effname seen as cursor. The stream
/// must be strictly ascending; anything else is reported as a merge order
/// violation and ends iteration.
pub struct HashPager<'a, D: Database + ?Sized> {
    db: &'a D,
    page_size: usize,
    buffer: VecDeque<(String, u64)>,
    last: Option<String>,
    exhausted: bool,
}

impl<'a, D: Database + ?Sized> HashPager<'a, D> {
    pub fn new(db: &'a D, page_size: usize) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            last: None,
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let page = self
            .db
            .get_project_hashes(self.last.as_deref(), self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<D: Database + ?Sized> Iterator for HashPager<'_, D> {
    type Item = Result<(String, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let (effname, hash) = self.buffer.pop_front()?;
        if let Some(last) = &self.last {
            if effname <= *last {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(UnifyError::MergeOrder {
                    stream: "stored hash",
                    previous: last.clone(),
                    next: effname,
                }));
            }
        }
        self.last = Some(effname.clone());

        Some(Ok((effname, hash)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::testing::package;
    use crate::storage::SqliteDatabase;
    use crate::transformer::ProjectSpread;

    #[test]
    fn test_project_hash_is_xor_of_packages() {
        let a = package("r1", "foo", "1.0");
        let b = package("r2", "foo", "1.0");
        let hash = calculate_project_classless_hash(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(hash, a.classless_hash() ^ b.classless_hash());

        // order does not matter
        assert_eq!(calculate_project_classless_hash(&[b, a]).unwrap(), hash);
    }

    #[test]
    fn test_duplicate_package_is_a_collision() {
        let a = package("r1", "foo", "1.0");
        let result = calculate_project_classless_hash(&[a.clone(), a]);
        assert!(matches!(result, Err(UnifyError::HashCollision { .. })));
    }

    #[test]
    fn test_engineered_collision_between_distinct_packages() {
        let a = package("r1", "foo", "1.0");
        let b = package("r2", "foo", "2.0");
        assert_ne!(a, b);
        let result = combine_package_hashes("foo", [(7, &a), (7, &b)]);
        match result {
            Err(UnifyError::HashCollision { effname, first, second }) => {
                assert_eq!(effname, "foo");
                assert_eq!(first, a.ident());
                assert_eq!(second, b.ident());
            }
            other => panic!("expected collision, got {:?}", other),
        }
    }

    #[test]
    fn test_pager_walks_all_pages() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let names: Vec<String> = (0..7).map(|i| format!("p{:02}", i)).collect();
        for (i, name) in names.iter().enumerate() {
            db.update_project_hash(name, i as u64).unwrap();
        }

        let pager = HashPager::new(&db, 3);
        let seen: Vec<String> = pager.map(|r| r.unwrap().0).collect();
        assert_eq!(seen, names);
    }

    struct Unordered;

    impl Database for Unordered {
        fn get_project_hashes(&self, after: Option<&str>, _limit: usize) -> Result<Vec<(String, u64)>> {
            Ok(match after {
                None => vec![("b".to_string(), 1), ("a".to_string(), 2)],
                Some(_) => Vec::new(),
            })
        }
        fn queue_project_changes(&self, _effnames: &[String]) -> Result<()> {
            Ok(())
        }
        fn add_packages(&self, _packages: &[Package]) -> Result<()> {
            Ok(())
        }
        fn update_project_hash(&self, _effname: &str, _hash: u64) -> Result<()> {
            Ok(())
        }
        fn remove_project_hash(&self, _effname: &str) -> Result<()> {
            Ok(())
        }
        fn project_spread(&self) -> Result<HashMap<String, ProjectSpread>> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn test_pager_rejects_descending_input() {
        let results: Vec<_> = HashPager::new(&Unordered, 10).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(UnifyError::MergeOrder { .. })));
    }
}
