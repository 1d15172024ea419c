use crate::package::Package;
use tracing::debug;

/// Drop packages equal to an earlier one in the same project group
///
/// Equality is full structural equality of [`Package`]. Surviving packages
/// keep their order, with the first occurrence winning.
pub fn deduplicate(packages: Vec<Package>) -> Vec<Package> {
    let mut result: Vec<Package> = Vec::with_capacity(packages.len());

    for package in packages {
        if result.contains(&package) {
            debug!(ident = %package.ident(), "Dropping duplicate package");
            continue;
        }
        result.push(package);
    }

    result
}
