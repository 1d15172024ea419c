pub mod fields;
pub mod version;

pub use fields::{apply_chain, Diagnostic, Normalized, Normalizer};
pub use version::compare_versions;
