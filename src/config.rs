use crate::error::{Result, UnifyError};
use crate::repoproc::serialization::{ChunkCompression, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parser used for a repository source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// rpm-md primary.xml
    Repodata,
    /// One JSON object per line
    Jsonlines,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    /// Local file copied into the state directory
    #[default]
    File,
}

/// One input of a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    #[serde(default)]
    pub fetcher: FetcherKind,

    pub parser: ParserKind,

    /// Location the fetcher reads from
    pub path: PathBuf,

    /// Subrepository stamped onto packages which do not carry their own
    pub subrepo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository name (used as identifier in the database and chunk names)
    pub name: String,

    /// Repository family, e.g. every Debian derivative shares `debuntu`
    pub family: String,

    #[serde(default)]
    pub desc: String,

    /// Extra rulesets, on top of the repository name and family
    #[serde(default)]
    pub ruleset: Vec<String>,

    #[serde(default)]
    pub shadow: bool,

    pub default_maintainer: Option<String>,

    pub subrepo: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("pkgunify.db")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".pkgunify/state")
}

fn default_chunk_dir() -> PathBuf {
    PathBuf::from(".pkgunify/chunks")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_hash_page_size() -> usize {
    10000
}

fn default_change_batch_size() -> usize {
    1000
}

fn default_stats_interval() -> u64 {
    10000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database file path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Where fetchers keep raw repository data
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Where parsed repositories are kept as sorted chunks
    #[serde(default = "default_chunk_dir")]
    pub chunk_dir: PathBuf,

    /// Rule files or directories, loaded in order
    #[serde(default)]
    pub rules: Vec<PathBuf>,

    /// Packages per chunk file
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub chunk_compression: ChunkCompression,

    /// Log and drop records that fail to build instead of aborting
    #[serde(default)]
    pub skip_failed: bool,

    /// Project hashes fetched from the database per page
    #[serde(default = "default_hash_page_size")]
    pub hash_page_size: usize,

    /// Changed project names queued per database call
    #[serde(default = "default_change_batch_size")]
    pub change_batch_size: usize,

    /// Packages between rule statistics snapshots
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,

    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            state_dir: default_state_dir(),
            chunk_dir: default_chunk_dir(),
            rules: Vec::new(),
            chunk_size: default_chunk_size(),
            chunk_compression: ChunkCompression::default(),
            skip_failed: false,
            hash_page_size: default_hash_page_size(),
            change_batch_size: default_change_batch_size(),
            stats_interval: default_stats_interval(),
            repositories: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| UnifyError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| UnifyError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for repo in &self.repositories {
            if !seen.insert(repo.name.as_str()) {
                return Err(UnifyError::Config(format!(
                    "Duplicate repository name: {}",
                    repo.name
                )));
            }
            if repo.name.is_empty()
                || repo.name.starts_with('.')
                || repo.name.contains(['/', '\\'])
            {
                return Err(UnifyError::Config(format!(
                    "Invalid repository name: {:?}",
                    repo.name
                )));
            }
        }
        if self.hash_page_size == 0 || self.change_batch_size == 0 {
            return Err(UnifyError::Config(
                "hash_page_size and change_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn enabled_repositories(&self) -> impl Iterator<Item = &RepositoryConfig> {
        self.repositories.iter().filter(|repo| repo.enabled)
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|repo| repo.name == name)
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            rules: vec![PathBuf::from("rules.d")],
            repositories: vec![
                RepositoryConfig {
                    name: "rocky9".to_string(),
                    family: "centos".to_string(),
                    desc: "Rocky Linux 9".to_string(),
                    ruleset: vec!["rpm".to_string()],
                    shadow: false,
                    default_maintainer: Some("fallback-mnt-rocky@pkgunify".to_string()),
                    subrepo: None,
                    enabled: true,
                    sources: vec![
                        SourceConfig {
                            name: "baseos".to_string(),
                            fetcher: FetcherKind::File,
                            parser: ParserKind::Repodata,
                            path: PathBuf::from("dumps/rocky9/BaseOS/primary.xml.gz"),
                            subrepo: Some("BaseOS".to_string()),
                        },
                        SourceConfig {
                            name: "appstream".to_string(),
                            fetcher: FetcherKind::File,
                            parser: ParserKind::Repodata,
                            path: PathBuf::from("dumps/rocky9/AppStream/primary.xml.zst"),
                            subrepo: Some("AppStream".to_string()),
                        },
                    ],
                },
                RepositoryConfig {
                    name: "crates_io".to_string(),
                    family: "crates_io".to_string(),
                    desc: "crates.io".to_string(),
                    ruleset: Vec::new(),
                    shadow: true,
                    default_maintainer: None,
                    subrepo: None,
                    enabled: false,
                    sources: vec![SourceConfig {
                        name: "index".to_string(),
                        fetcher: FetcherKind::File,
                        parser: ParserKind::Jsonlines,
                        path: PathBuf::from("dumps/crates_io.jsonl"),
                        subrepo: None,
                    }],
                },
            ],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() {
        let config = Config::from_toml_str(
            r#"
            [[repositories]]
            name = "fedora_rawhide"
            family = "fedora"

            [[repositories.sources]]
            name = "primary"
            parser = "repodata"
            path = "primary.xml"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunk_size, 10240);
        assert_eq!(config.chunk_compression, ChunkCompression::Zstd);
        assert_eq!(config.hash_page_size, 10000);
        assert!(!config.skip_failed);

        let repo = &config.repositories[0];
        assert!(repo.enabled);
        assert_eq!(repo.sources[0].fetcher, FetcherKind::File);
        assert_eq!(repo.sources[0].parser, ParserKind::Repodata);
    }

    #[test]
    fn test_duplicate_repository_rejected() {
        let result = Config::from_toml_str(
            r#"
            [[repositories]]
            name = "a"
            family = "x"

            [[repositories]]
            name = "a"
            family = "y"
            "#,
        );
        assert!(matches!(result, Err(UnifyError::Config(_))));
    }

    #[test]
    fn test_hidden_or_nested_repository_name_rejected() {
        for name in [".staging-a", "a/b", ""] {
            let result = Config::from_toml_str(&format!(
                "[[repositories]]\nname = {:?}\nfamily = \"x\"\n",
                name
            ));
            assert!(matches!(result, Err(UnifyError::Config(_))), "{:?} accepted", name);
        }
    }

    #[test]
    fn test_unknown_parser_rejected() {
        let result = Config::from_toml_str(
            r#"
            [[repositories]]
            name = "a"
            family = "x"
            sources = [{ name = "s", parser = "ebuild", path = "x" }]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_example_roundtrips_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pkgunify.toml");
        Config::example().to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.repositories.len(), 2);
        assert_eq!(loaded.enabled_repositories().count(), 1);
        assert_eq!(
            loaded.repository("rocky9").unwrap().sources[1].subrepo.as_deref(),
            Some("AppStream")
        );
    }
}
