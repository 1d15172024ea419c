mod file;

pub use file::FileFetcher;

use crate::config::{FetcherKind, SourceConfig};
use crate::error::Result;
use std::path::Path;

/// Brings raw repository data into a state path
pub trait Fetcher {
    /// Fetch into `state_path`; returns whether the state changed
    ///
    /// With `update` false an existing state is left as is.
    fn fetch(&self, state_path: &Path, update: bool) -> Result<bool>;
}

/// Build the fetcher configured for a source
pub fn create_fetcher(source: &SourceConfig) -> Box<dyn Fetcher> {
    match source.fetcher {
        FetcherKind::File => Box::new(FileFetcher::new(&source.path)),
    }
}
