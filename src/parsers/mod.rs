mod jsonlines;
mod repodata;

pub use jsonlines::JsonLinesParser;
pub use repodata::RepodataParser;

use crate::config::ParserKind;
use crate::error::Result;
use crate::packagemaker::{PackageFactory, PackageMaker};
use std::path::Path;

/// Lazy, single-pass stream of filled drafts
///
/// Records the factory chose to skip never show up; an `Err` ends the
/// stream.
pub type PackageStream<'a> = Box<dyn Iterator<Item = Result<PackageMaker>> + 'a>;

/// Turns fetched state into package drafts
pub trait Parser {
    fn iter_parse<'a>(&'a self, path: &Path, factory: &'a PackageFactory) -> Result<PackageStream<'a>>;
}

pub fn create_parser(kind: ParserKind) -> Box<dyn Parser> {
    match kind {
        ParserKind::Repodata => Box::new(RepodataParser),
        ParserKind::Jsonlines => Box::new(JsonLinesParser),
    }
}
