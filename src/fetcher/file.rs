use crate::error::{Result, UnifyError};
use crate::fetcher::Fetcher;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

/// Copies a local dump into the state path, decompressing on the way
pub struct FileFetcher {
    source: PathBuf,
}

impl FileFetcher {
    pub fn new<P: AsRef<Path>>(source: P) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
        }
    }

    /// Decompress gzip data
    pub fn decompress_gz(data: &[u8]) -> Result<Vec<u8>> {
        use flate2::read::GzDecoder;
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }

    /// Decompress zstd data
    pub fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
        let decompressed = zstd::decode_all(data)?;
        Ok(decompressed)
    }

    /// Decompress according to the file extension
    pub fn auto_decompress<P: AsRef<Path>>(path: P, data: Vec<u8>) -> Result<Vec<u8>> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");

        match extension {
            "gz" => Self::decompress_gz(&data),
            "zst" | "zstd" => Self::decompress_zstd(&data),
            _ => Ok(data),
        }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, state_path: &Path, update: bool) -> Result<bool> {
        if state_path.exists() && !update {
            debug!(state = %state_path.display(), "State exists, not updating");
            return Ok(false);
        }

        let raw = fs::read(&self.source).map_err(|e| {
            UnifyError::Fetch(format!("cannot read {}: {}", self.source.display(), e))
        })?;
        let data = Self::auto_decompress(&self.source, raw)?;

        if state_path.exists() {
            let current = fs::read(state_path)?;
            if xxh3_64(&current) == xxh3_64(&data) {
                debug!(state = %state_path.display(), "State unchanged");
                return Ok(false);
            }
        }

        if let Some(parent) = state_path.parent() {
            fs::create_dir_all(parent)?;
        }
        // write beside the target, then rename over it
        let staging = state_path.with_extension("new");
        fs::write(&staging, &data)?;
        fs::rename(&staging, state_path)?;

        info!(
            source = %self.source.display(),
            state = %state_path.display(),
            bytes = data.len(),
            "Fetched"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_fetch_reports_changes() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.txt");
        let state = dir.path().join("state/dump");
        fs::write(&source, "one").unwrap();

        let fetcher = FileFetcher::new(&source);
        assert!(fetcher.fetch(&state, true).unwrap());
        assert!(!fetcher.fetch(&state, true).unwrap());

        fs::write(&source, "two").unwrap();
        assert!(!fetcher.fetch(&state, false).unwrap());
        assert!(fetcher.fetch(&state, true).unwrap());
        assert_eq!(fs::read_to_string(&state).unwrap(), "two");
    }

    #[test]
    fn test_fetch_decompresses_gzip() {
        use flate2::write::GzEncoder;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("primary.xml.gz");
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"<metadata/>").unwrap();
        fs::write(&source, encoder.finish().unwrap()).unwrap();

        let state = dir.path().join("state");
        FileFetcher::new(&source).fetch(&state, true).unwrap();
        assert_eq!(fs::read(&state).unwrap(), b"<metadata/>");
    }

    #[test]
    fn test_missing_source_is_fetch_error() {
        let dir = TempDir::new().unwrap();
        let result = FileFetcher::new(dir.path().join("absent")).fetch(&dir.path().join("s"), true);
        assert!(matches!(result, Err(UnifyError::Fetch(_))));
    }
}
