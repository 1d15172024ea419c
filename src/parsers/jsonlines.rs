use crate::error::{Result, UnifyError};
use crate::package::{Cpe, LinkType, PackageFlags};
use crate::packagemaker::{NameKind, PackageFactory, PackageMaker};
use crate::parsers::{PackageStream, Parser};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One JSON object per line, names keyed by name kind
///
/// ```json
/// {"names": {"crates_name": "serde"}, "version": "1.0.200", "homepages": ["https://serde.rs"]}
/// ```
pub struct JsonLinesParser;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonRecord {
    names: BTreeMap<String, String>,
    version: Option<String>,
    rawversion: Option<String>,
    arch: Option<String>,
    subrepo: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    maintainers: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    licenses: Vec<String>,
    #[serde(default)]
    binnames: Vec<String>,
    #[serde(default)]
    homepages: Vec<String>,
    #[serde(default)]
    downloads: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    extrafields: BTreeMap<String, String>,
    cpe: Option<Cpe>,
}

impl JsonRecord {
    fn fill(self, maker: &mut PackageMaker) -> Result<()> {
        for (kind, value) in self.names {
            let kind = NameKind::from_str_name(&kind)
                .ok_or_else(|| UnifyError::Parse(format!("unknown name kind {:?}", kind)))?;
            maker.add_name(value, kind);
        }
        for flag in &self.flags {
            let flag = PackageFlags::from_name(&flag.to_uppercase())
                .ok_or_else(|| UnifyError::Parse(format!("unknown flag {:?}", flag)))?;
            maker.set_flags(flag, true);
        }

        maker.set_version(self.version, None);
        maker.set_rawversion(self.rawversion);
        maker.set_arch(self.arch);
        maker.set_subrepo(self.subrepo);
        maker.set_summary(self.summary);
        maker.add_maintainers(self.maintainers);
        maker.add_categories(self.categories);
        maker.add_licenses(self.licenses);
        maker.add_binnames(self.binnames);
        maker.add_links(LinkType::UpstreamHomepage, self.homepages);
        maker.add_links(LinkType::UpstreamDownload, self.downloads);
        for (key, value) in self.extrafields {
            maker.set_extra_field(key, value);
        }
        if let Some(cpe) = self.cpe {
            maker.set_cpe(cpe);
        }
        Ok(())
    }
}

impl JsonLinesParser {
    /// Stream drafts out of any line-oriented reader; `source` prefixes record idents
    pub fn parse_reader<'a, R: BufRead + 'a>(
        reader: R,
        source: String,
        factory: &'a PackageFactory,
    ) -> PackageStream<'a> {
        let mut failed = false;
        let stream = reader
            .lines()
            .enumerate()
            .map_while(move |(n, line)| {
                if failed {
                    return None;
                }
                let ident = format!("{}:{}", source, n + 1);
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        failed = true;
                        return Some(Err(e.into()));
                    }
                };
                if line.trim().is_empty() {
                    return Some(Ok(None));
                }

                let built = factory.build(ident, |maker| {
                    let record: JsonRecord = serde_json::from_str(&line)
                        .map_err(|e| UnifyError::Parse(e.to_string()))?;
                    record.fill(maker)
                });
                if built.is_err() {
                    failed = true;
                }
                Some(built)
            })
            .filter_map(|result| result.transpose());

        Box::new(stream)
    }
}

impl Parser for JsonLinesParser {
    fn iter_parse<'a>(&'a self, path: &Path, factory: &'a PackageFactory) -> Result<PackageStream<'a>> {
        let file = BufReader::new(File::open(path)?);
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self::parse_reader(file, source, factory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packagemaker::SpawnContext;

    const DUMP: &str = r#"{"names": {"crates_name": "serde"}, "version": "1.0.200", "homepages": ["https://serde.rs"], "licenses": ["MIT", "Apache-2.0"]}

{"names": {"generic_srcname": "foo", "generic_binname": "foo-bin"}, "version": "2.0", "flags": ["devel"], "extrafields": {"path": "devel/foo"}}
{"names": {"bogus_kind": "x"}, "version": "1"}
{"names": {"crates_name": "serde_json"}, "version": "1.0.116", "cpe": {"vendor": "serde-rs", "product": "serde_json"}}
not json
"#;

    fn ctx() -> SpawnContext {
        SpawnContext {
            repo: "crates_io".to_string(),
            family: "crates_io".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_records() {
        let factory = PackageFactory::new(true);
        let makers: Vec<PackageMaker> =
            JsonLinesParser::parse_reader(DUMP.as_bytes(), "dump".to_string(), &factory)
                .map(|m| m.unwrap())
                .collect();

        assert_eq!(makers.len(), 3);
        assert_eq!(factory.failures(), 2);

        let serde = makers[0].clone().spawn(&ctx()).unwrap();
        assert_eq!(serde.effname, "serde");
        assert_eq!(serde.licenses.len(), 2);

        let foo = makers[1].clone().spawn(&ctx()).unwrap();
        assert_eq!(foo.effname, "foo");
        assert_eq!(foo.binname.as_deref(), Some("foo-bin"));
        assert!(foo.has_flag(PackageFlags::DEVEL));
        assert_eq!(foo.extrafields["path"], "devel/foo");

        let json = makers[2].clone().spawn(&ctx()).unwrap();
        assert_eq!(json.cpe.vendor.as_deref(), Some("serde-rs"));
    }

    #[test]
    fn test_idents_carry_line_numbers() {
        let factory = PackageFactory::new(true);
        let makers: Vec<PackageMaker> =
            JsonLinesParser::parse_reader(DUMP.as_bytes(), "dump".to_string(), &factory)
                .map(|m| m.unwrap())
                .collect();
        assert_eq!(makers[1].ident(), "dump:3");
    }

    #[test]
    fn test_strict_mode_stops_at_first_failure() {
        let factory = PackageFactory::new(false);
        let results: Vec<_> =
            JsonLinesParser::parse_reader(DUMP.as_bytes(), "dump".to_string(), &factory).collect();
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }
}
