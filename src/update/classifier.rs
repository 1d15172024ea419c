use crate::normalize::version::compare_versions;
use crate::package::{Package, PackageFlags, VersionClass};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Flags which take a package out of version comparison, with the class
/// they map to, in precedence order
const EXCLUDING_FLAGS: &[(PackageFlags, VersionClass)] = &[
    (PackageFlags::IGNORE, VersionClass::Ignored),
    (PackageFlags::INCORRECT, VersionClass::Incorrect),
    (PackageFlags::UNTRUSTED, VersionClass::Untrusted),
    (PackageFlags::NOSCHEME, VersionClass::NoScheme),
    (PackageFlags::ROLLING, VersionClass::Rolling),
];

fn excluded_class(package: &Package) -> Option<VersionClass> {
    EXCLUDING_FLAGS
        .iter()
        .find(|(flag, _)| package.flags.intersects(*flag))
        .map(|(_, class)| *class)
}

fn is_devel(package: &Package) -> bool {
    package
        .flags
        .intersects(PackageFlags::DEVEL | PackageFlags::WEAK_DEVEL)
}

/// Assign a version class to every package of one project
pub fn classify_project(packages: &mut [Package]) {
    let comparable = |p: &&Package| excluded_class(p).is_none() && !p.has_flag(PackageFlags::OUTDATED);

    let best_stable = packages
        .iter()
        .filter(comparable)
        .filter(|p| !is_devel(p))
        .map(|p| p.version.as_str())
        .max_by(|a, b| compare_versions(a, b))
        .map(str::to_string);

    let families: HashSet<&str> = packages.iter().map(|p| p.family.as_str()).collect();
    let unique = families.len() == 1;

    let above_stable = |version: &str| match &best_stable {
        Some(best) => compare_versions(version, best) == Ordering::Greater,
        None => true,
    };
    let is_best = |version: &str| {
        best_stable
            .as_deref()
            .is_some_and(|best| compare_versions(version, best) == Ordering::Equal)
    };

    let mut classes: Vec<VersionClass> = Vec::with_capacity(packages.len());
    for package in packages.iter() {
        let class = if let Some(class) = excluded_class(package) {
            class
        } else if package.has_flag(PackageFlags::OUTDATED) {
            VersionClass::Outdated
        } else if is_devel(package) && above_stable(&package.version) {
            VersionClass::Devel
        } else if is_best(&package.version) {
            if unique {
                VersionClass::Unique
            } else {
                VersionClass::Newest
            }
        } else {
            VersionClass::Outdated
        };
        classes.push(class);
    }

    // a repository that also carries a current version keeps its older
    // packages as legacy rather than outdated
    let current_repos: HashSet<String> = packages
        .iter()
        .zip(&classes)
        .filter(|(_, class)| {
            matches!(
                class,
                VersionClass::Newest | VersionClass::Unique | VersionClass::Devel
            )
        })
        .map(|(p, _)| p.repo.clone())
        .collect();

    for (package, class) in packages.iter_mut().zip(classes) {
        package.versionclass = match class {
            VersionClass::Outdated
                if !package.has_flag(PackageFlags::OUTDATED)
                    && !package.has_flag(PackageFlags::NOLEGACY)
                    && (package.has_flag(PackageFlags::LEGACY)
                        || current_repos.contains(&package.repo)) =>
            {
                VersionClass::Legacy
            }
            other => other,
        };
    }
}
