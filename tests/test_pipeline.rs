/// End-to-end runs: fetch, parse, merge and incremental database update
use pkgunify::config::{Config, FetcherKind, ParserKind, RepositoryConfig, SourceConfig};
use pkgunify::package::VersionClass;
use pkgunify::repoproc::RepositoryProcessor;
use pkgunify::storage::SqliteDatabase;
use pkgunify::transformer::Transformer;
use pkgunify::update::{ChangeStats, Updater};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const PRIMARY: &str = r#"<?xml version="1.0"?>
<metadata xmlns="http://linux.duke.edu/metadata/common"
          xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="3">
  <package type="rpm">
    <name>python3-requests</name>
    <arch>noarch</arch>
    <version epoch="0" ver="2.31.0" rel="1.el9"/>
    <format><rpm:sourcerpm>python-requests-2.31.0-1.el9.src.rpm</rpm:sourcerpm></format>
  </package>
  <package type="rpm">
    <name>zlib</name>
    <arch>x86_64</arch>
    <version epoch="0" ver="1.2.11" rel="40.el9"/>
    <format><rpm:sourcerpm>zlib-1.2.11-40.el9.src.rpm</rpm:sourcerpm></format>
  </package>
  <package type="rpm">
    <name>zlib-devel</name>
    <arch>x86_64</arch>
    <version epoch="0" ver="1.2.11" rel="40.el9"/>
    <format><rpm:sourcerpm>zlib-1.2.11-40.el9.src.rpm</rpm:sourcerpm></format>
  </package>
</metadata>"#;

const DUMP: &str = r#"{"names": {"generic_name": "requests"}, "version": "2.32.3"}
{"names": {"generic_name": "zlib"}, "version": "1.3.1"}
{"names": {"generic_name": "leftpad"}, "version": "1.0"}
"#;

const RULES: &str = r#"
- { name: python-requests, setname: requests }
- { name: zlib, ruleset: rpm, warning: 'rpm zlib' }
"#;

fn setup(root: &Path) -> Config {
    let primary = root.join("dumps/primary.xml");
    let dump = root.join("dumps/dump.jsonl");
    fs::create_dir_all(root.join("dumps")).unwrap();
    fs::create_dir_all(root.join("rules.d")).unwrap();
    fs::write(&primary, PRIMARY).unwrap();
    fs::write(&dump, DUMP).unwrap();
    fs::write(root.join("rules.d/10-names.yaml"), RULES).unwrap();

    Config {
        db_path: root.join("pkgunify.db"),
        state_dir: root.join("state"),
        chunk_dir: root.join("chunks"),
        rules: vec![root.join("rules.d")],
        chunk_size: 2,
        hash_page_size: 1,
        change_batch_size: 2,
        repositories: vec![
            RepositoryConfig {
                name: "rocky9".to_string(),
                family: "centos".to_string(),
                desc: String::new(),
                ruleset: vec!["rpm".to_string()],
                shadow: false,
                default_maintainer: None,
                subrepo: None,
                enabled: true,
                sources: vec![SourceConfig {
                    name: "baseos".to_string(),
                    fetcher: FetcherKind::File,
                    parser: ParserKind::Repodata,
                    path: primary,
                    subrepo: Some("BaseOS".to_string()),
                }],
            },
            RepositoryConfig {
                name: "upstream".to_string(),
                family: "upstream".to_string(),
                desc: String::new(),
                ruleset: Vec::new(),
                shadow: false,
                default_maintainer: None,
                subrepo: None,
                enabled: true,
                sources: vec![SourceConfig {
                    name: "dump".to_string(),
                    fetcher: FetcherKind::File,
                    parser: ParserKind::Jsonlines,
                    path: dump,
                    subrepo: None,
                }],
            },
        ],
        ..Default::default()
    }
}

fn run(config: &Config, db: &SqliteDatabase, update: bool) -> ChangeStats {
    let transformer = Transformer::from_paths(&config.rules).unwrap();
    let processor = RepositoryProcessor::new(config, &transformer);
    for repo in config.enabled_repositories() {
        if processor.fetch(repo, update).unwrap() || !processor.has_chunks(repo) {
            processor.parse(repo).unwrap();
        }
    }
    Updater::new(db, config.hash_page_size, config.change_batch_size)
        .update(processor.merge().unwrap())
        .unwrap()
}

#[test]
fn test_first_run_stores_every_project() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path());
    let db = SqliteDatabase::open(&config.db_path).unwrap();

    let stats = run(&config, &db, false);
    assert_eq!(
        stats,
        ChangeStats {
            added: 3,
            removed: 0,
            changed: 0,
            unchanged: 0
        }
    );
    assert_eq!(db.count_projects().unwrap(), 3);
    assert_eq!(db.count_packages().unwrap(), 6);

    let requests = db.get_packages("requests").unwrap();
    assert_eq!(requests.len(), 2);
    let rocky = requests.iter().find(|p| p.repo == "rocky9").unwrap();
    assert_eq!(rocky.versionclass, VersionClass::Outdated);
    assert_eq!(rocky.subrepo.as_deref(), Some("BaseOS"));
    let upstream = requests.iter().find(|p| p.repo == "upstream").unwrap();
    assert_eq!(upstream.versionclass, VersionClass::Newest);

    let leftpad = db.get_packages("leftpad").unwrap();
    assert_eq!(leftpad[0].versionclass, VersionClass::Unique);

    // both rocky zlib binaries stay, they differ by name
    let zlib = db.get_packages("zlib").unwrap();
    assert_eq!(zlib.iter().filter(|p| p.repo == "rocky9").count(), 2);

    assert_eq!(db.changed_projects().unwrap().len(), 3);
    assert!(db.get_metadata("last_update").unwrap().is_some());
}

#[test]
fn test_second_run_without_changes_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path());
    let db = SqliteDatabase::open(&config.db_path).unwrap();

    run(&config, &db, false);
    let stats = run(&config, &db, true);
    assert_eq!(stats.unchanged, 3);
    assert_eq!(stats.total(), 3);
    assert_eq!(db.changed_projects().unwrap().len(), 3);
}

#[test]
fn test_incremental_run_applies_only_differences() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path());
    let db = SqliteDatabase::open(&config.db_path).unwrap();
    run(&config, &db, false);

    fs::write(
        &config.repositories[1].sources[0].path,
        "{\"names\": {\"generic_name\": \"requests\"}, \"version\": \"2.32.3\"}\n\
         {\"names\": {\"generic_name\": \"zlib\"}, \"version\": \"1.3.2\"}\n\
         {\"names\": {\"generic_name\": \"curl\"}, \"version\": \"8.10.0\"}\n",
    )
    .unwrap();

    let stats = run(&config, &db, true);
    assert_eq!(
        stats,
        ChangeStats {
            added: 1,
            removed: 1,
            changed: 1,
            unchanged: 1
        }
    );
    assert!(db.get_packages("leftpad").unwrap().is_empty());
    assert_eq!(db.get_project_hash("leftpad").unwrap(), None);
    assert_eq!(db.get_packages("curl").unwrap().len(), 1);

    let zlib = db.get_packages("zlib").unwrap();
    let upstream = zlib.iter().find(|p| p.repo == "upstream").unwrap();
    assert_eq!(upstream.version, "1.3.2");

    // 3 from the first run, then curl, leftpad and zlib
    let queued = db.changed_projects().unwrap();
    assert_eq!(&queued[3..], ["curl", "leftpad", "zlib"]);
}

#[test]
fn test_corrupt_chunk_leaves_database_untouched() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path());
    let db = SqliteDatabase::open(&config.db_path).unwrap();
    run(&config, &db, false);

    let transformer = Transformer::new(Vec::new());
    let processor = RepositoryProcessor::new(&config, &transformer);
    let chunks = processor.all_chunks().unwrap();
    let last = chunks.last().unwrap();
    let data = fs::read(last).unwrap();
    fs::write(last, &data[..data.len() / 2]).unwrap();

    let result = processor
        .merge()
        .and_then(|projects| Updater::new(&db, 1, 1).update(projects));
    assert!(result.is_err());
    assert_eq!(db.count_projects().unwrap(), 3);
    assert_eq!(db.changed_projects().unwrap().len(), 3);
}
