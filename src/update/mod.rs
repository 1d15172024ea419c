//! Incremental database update
//!
//! Merged project groups are diffed against the stored per-project hashes in
//! one pass; only added, changed and removed projects touch the database.

pub mod changes;
pub mod classifier;
pub mod hashes;
pub mod updater;

pub use changes::{ChangeDetector, ChangeStats, ProjectChange};
pub use classifier::classify_project;
pub use hashes::{calculate_project_classless_hash, HashPager};
pub use updater::{ChangeQueue, Updater};
