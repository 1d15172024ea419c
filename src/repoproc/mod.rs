//! Per-repository processing
//!
//! Fetch, parse, spawn and transform one repository's packages and store
//! them as sorted chunks; later, merge the chunks of every repository into
//! one effname-ordered project stream.

pub mod dedup;
pub mod serialization;

pub use dedup::deduplicate;
pub use serialization::{heap_merge, ChunkCompression, ChunkReader, ChunkWriter, ProjectMerger};

use crate::config::{Config, RepositoryConfig, SourceConfig};
use crate::error::Result;
use crate::fetcher::create_fetcher;
use crate::package::PackageFlags;
use crate::packagemaker::{PackageFactory, SpawnContext};
use crate::parsers::create_parser;
use crate::transformer::{PackageContext, RuleStats, Transformer};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Outcome of parsing one repository
#[derive(Debug)]
pub struct ParseReport {
    pub repo: String,
    /// Packages written to chunks
    pub packages: usize,
    /// Packages dropped by REMOVE rules
    pub removed: usize,
    /// Records skipped in skip-failed mode
    pub failures: usize,
    pub chunks: Vec<PathBuf>,
    pub rule_stats: RuleStats,
}

pub struct RepositoryProcessor<'a> {
    config: &'a Config,
    transformer: &'a Transformer,
}

impl<'a> RepositoryProcessor<'a> {
    pub fn new(config: &'a Config, transformer: &'a Transformer) -> Self {
        Self {
            config,
            transformer,
        }
    }

    pub fn state_path(&self, repo: &RepositoryConfig, source: &SourceConfig) -> PathBuf {
        self.config.state_dir.join(&repo.name).join(&source.name)
    }

    fn chunk_dir(&self, repo: &RepositoryConfig) -> PathBuf {
        self.config.chunk_dir.join(&repo.name)
    }

    /// Fetch every source of `repo`; true if any of them changed
    #[instrument(skip(self, repo), fields(repo = %repo.name))]
    pub fn fetch(&self, repo: &RepositoryConfig, update: bool) -> Result<bool> {
        let mut changed = false;
        for source in &repo.sources {
            let fetcher = create_fetcher(source);
            if fetcher.fetch(&self.state_path(repo, source), update)? {
                changed = true;
            }
        }
        info!(changed, "Repository fetched");
        Ok(changed)
    }

    /// Parse fetched state into a fresh set of chunks for `repo`
    ///
    /// The previous chunks are replaced only once every source parsed
    /// successfully.
    #[instrument(skip(self, repo), fields(repo = %repo.name))]
    pub fn parse(&self, repo: &RepositoryConfig) -> Result<ParseReport> {
        let final_dir = self.chunk_dir(repo);
        let staging_dir = self.config.chunk_dir.join(format!(".staging-{}", repo.name));
        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir)?;
        }

        let mut writer = ChunkWriter::new(
            &staging_dir,
            &repo.name,
            self.config.chunk_size,
            self.config.chunk_compression,
        )?;
        let factory = PackageFactory::new(self.config.skip_failed);
        let package_ctx = PackageContext::new(&repo.name, &repo.family, &repo.ruleset);
        let mut stats = self.transformer.new_stats(self.config.stats_interval);
        let mut removed = 0;

        for source in &repo.sources {
            let spawn_ctx = SpawnContext {
                repo: repo.name.clone(),
                family: repo.family.clone(),
                subrepo: source.subrepo.clone().or_else(|| repo.subrepo.clone()),
                shadow: repo.shadow,
                default_maintainer: repo.default_maintainer.clone(),
            };
            let parser = create_parser(source.parser);

            for maker in parser.iter_parse(&self.state_path(repo, source), &factory)? {
                let Some(mut package) = factory.spawn(maker?, &spawn_ctx)? else {
                    continue;
                };

                self.transformer
                    .process(&mut package, &package_ctx, &mut stats);
                if package.has_flag(PackageFlags::REMOVE) {
                    removed += 1;
                    continue;
                }
                writer.add(package)?;
            }
        }

        let packages = writer.total();
        writer.finish()?;
        stats.finish();
        self.transformer.report_unmatched(&stats);

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&staging_dir, &final_dir)?;
        let chunks = list_chunks(&final_dir, &repo.name)?;

        if factory.failures() > 0 {
            warn!(failures = factory.failures(), "Some records were skipped");
        }
        info!(packages, removed, chunks = chunks.len(), "Repository parsed");

        Ok(ParseReport {
            repo: repo.name.clone(),
            packages,
            removed,
            failures: factory.failures(),
            chunks,
            rule_stats: stats,
        })
    }

    /// Whether `repo` has been parsed at least once
    pub fn has_chunks(&self, repo: &RepositoryConfig) -> bool {
        self.chunk_dir(repo).is_dir()
    }

    /// Chunk files of every enabled repository, in configuration order
    pub fn all_chunks(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for repo in self.config.enabled_repositories() {
            let dir = self.chunk_dir(repo);
            if !dir.exists() {
                warn!(repo = %repo.name, "Repository has not been parsed yet");
                continue;
            }
            paths.extend(list_chunks(&dir, &repo.name)?);
        }
        Ok(paths)
    }

    /// Merge every enabled repository's chunks
    pub fn merge(&self) -> Result<ProjectMerger> {
        heap_merge(&self.all_chunks()?)
    }
}

/// Chunk files named `<prefix>.<n>.*` in `dir`, in write order
fn list_chunks(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut chunks: Vec<(usize, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let index = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| name.strip_prefix(prefix)?.strip_prefix('.'))
            .and_then(|rest| rest.split('.').next()?.parse::<usize>().ok());
        if let Some(index) = index {
            chunks.push((index, path));
        }
    }
    chunks.sort();
    Ok(chunks.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetcherKind, ParserKind};
    use tempfile::TempDir;

    fn setup(dir: &Path, lines: &str) -> Config {
        let dump = dir.join("dump.jsonl");
        fs::write(&dump, lines).unwrap();
        Config {
            state_dir: dir.join("state"),
            chunk_dir: dir.join("chunks"),
            chunk_size: 2,
            skip_failed: true,
            repositories: vec![RepositoryConfig {
                name: "test_repo".to_string(),
                family: "test".to_string(),
                desc: String::new(),
                ruleset: Vec::new(),
                shadow: false,
                default_maintainer: Some("fallback@example.org".to_string()),
                subrepo: Some("main".to_string()),
                enabled: true,
                sources: vec![SourceConfig {
                    name: "dump".to_string(),
                    fetcher: FetcherKind::File,
                    parser: ParserKind::Jsonlines,
                    path: dump,
                    subrepo: None,
                }],
            }],
            ..Default::default()
        }
    }

    const LINES: &str = r#"{"names": {"generic_name": "zlib"}, "version": "1.3"}
{"names": {"generic_name": "junk"}, "version": "0"}
{"names": {"generic_name": "libfoo"}, "version": "2.0"}
{"names": {"generic_name": "awk"}}
{"names": {"generic_name": "bar"}, "version": "1.0"}
"#;

    #[test]
    fn test_parse_writes_transformed_chunks() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), LINES);
        let transformer = Transformer::from_yaml_str(
            "- { name: junk, remove: true }\n- { namepat: 'lib(.+)', setname: '$1' }\n",
            "rules",
        )
        .unwrap();
        let processor = RepositoryProcessor::new(&config, &transformer);
        let repo = &config.repositories[0];

        assert!(processor.fetch(repo, false).unwrap());
        let report = processor.parse(repo).unwrap();
        assert_eq!(report.packages, 3);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.chunks.len(), 2);
        assert_eq!(report.rule_stats.snapshot().matches, vec![1, 1]);

        let groups: Vec<_> = processor.merge().unwrap().map(|g| g.unwrap()).collect();
        let names: Vec<&str> = groups.iter().map(|g| g[0].effname.as_str()).collect();
        assert_eq!(names, vec!["bar", "foo", "zlib"]);
        assert_eq!(groups[1][0].subrepo.as_deref(), Some("main"));
        assert_eq!(groups[1][0].maintainers, vec!["fallback@example.org".to_string()]);
    }

    #[test]
    fn test_reparse_replaces_chunks() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), LINES);
        let transformer = Transformer::new(Vec::new());
        let processor = RepositoryProcessor::new(&config, &transformer);
        let repo = &config.repositories[0];

        processor.fetch(repo, false).unwrap();
        assert_eq!(processor.parse(repo).unwrap().chunks.len(), 2);

        fs::write(
            &repo.sources[0].path,
            "{\"names\": {\"generic_name\": \"only\"}, \"version\": \"1\"}\n",
        )
        .unwrap();
        assert!(processor.fetch(repo, true).unwrap());
        assert_eq!(processor.parse(repo).unwrap().chunks.len(), 1);
        assert_eq!(processor.all_chunks().unwrap().len(), 1);
    }

    #[test]
    fn test_staging_does_not_touch_similar_repository() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(dir.path(), LINES);
        let mut other = config.repositories[0].clone();
        other.name = "test_repo.new".to_string();
        config.repositories.push(other);

        let transformer = Transformer::new(Vec::new());
        let processor = RepositoryProcessor::new(&config, &transformer);
        for repo in &config.repositories {
            processor.fetch(repo, false).unwrap();
        }
        processor.parse(&config.repositories[1]).unwrap();
        processor.parse(&config.repositories[0]).unwrap();

        assert!(processor.has_chunks(&config.repositories[1]));
        let groups = processor.merge().unwrap().count();
        assert_eq!(groups, 4);
        assert_eq!(processor.all_chunks().unwrap().len(), 4);
    }
}
