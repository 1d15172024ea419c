use crate::error::{Result, UnifyError};
use crate::package::LinkType;
use crate::packagemaker::{NameKind, PackageFactory, PackageMaker};
use crate::parsers::{PackageStream, Parser};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// rpm-md `primary.xml` parser
pub struct RepodataParser;

impl RepodataParser {
    /// Stream drafts out of any primary.xml reader
    pub fn parse_reader<'a, R: BufRead + 'a>(reader: R, factory: &'a PackageFactory) -> PackageStream<'a> {
        Box::new(RepodataStream {
            reader: Reader::from_reader(reader),
            buf: Vec::new(),
            factory,
            done: false,
        })
    }
}

impl Parser for RepodataParser {
    fn iter_parse<'a>(&'a self, path: &Path, factory: &'a PackageFactory) -> Result<PackageStream<'a>> {
        let file = BufReader::new(File::open(path)?);
        Ok(Self::parse_reader(file, factory))
    }
}

/// Raw fields of one `<package>` element
#[derive(Debug, Default)]
struct RpmRecord {
    name: String,
    epoch: Option<String>,
    version: Option<String>,
    release: Option<String>,
    vcs: Option<String>,
    arch: String,
    summary: Option<String>,
    url: Option<String>,
    license: Option<String>,
    group: Option<String>,
    packager: Option<String>,
    sourcerpm: Option<String>,
}

impl RpmRecord {
    fn ident(&self) -> String {
        match (&self.version, &self.release) {
            (Some(ver), Some(rel)) => format!("{}-{}-{}.{}", self.name, ver, rel, self.arch),
            _ => self.name.clone(),
        }
    }

    fn fill(self, maker: &mut PackageMaker) -> Result<()> {
        if self.name.is_empty() {
            return Err(UnifyError::Parse("package without name".to_string()));
        }

        if self.arch == "src" {
            maker.add_name(self.name, NameKind::RpmSrcName);
        } else {
            if let Some(srcname) = self.sourcerpm.as_deref().and_then(srcrpm_name) {
                maker.add_name(srcname, NameKind::RpmSrcName);
            }
            maker.add_name(self.name, NameKind::RpmName);
        }

        if let Some(version) = &self.version {
            let mut raw = version.clone();
            if let Some(release) = &self.release {
                raw = format!("{}-{}", raw, release);
            }
            if let Some(epoch) = self.epoch.as_deref().filter(|e| *e != "0") {
                raw = format!("{}:{}", epoch, raw);
            }
            maker.set_version(Some(version.as_str()), None);
            maker.set_rawversion(Some(raw));
        }

        maker.set_arch(Some(self.arch));
        maker.set_summary(self.summary);
        maker.add_homepages(self.url);
        maker.add_links(LinkType::UpstreamRepository, self.vcs);
        maker.add_licenses(self.license);
        maker.add_categories(self.group);
        if let Some(packager) = self.packager {
            maker.set_extra_field("packager", packager);
        }

        Ok(())
    }
}

/// `foo-1.0-1.fc40.src.rpm` -> `foo`
fn srcrpm_name(srcrpm: &str) -> Option<&str> {
    let stem = srcrpm.strip_suffix(".rpm")?;
    let (nvr, _arch) = stem.rsplit_once('.')?;
    let (nv, _release) = nvr.rsplit_once('-')?;
    let (name, _version) = nv.rsplit_once('-')?;
    (!name.is_empty()).then_some(name)
}

fn attributes<'a>(e: &'a BytesStart<'_>) -> impl Iterator<Item = (String, String)> + 'a {
    e.attributes().flatten().map(|attr| {
        (
            String::from_utf8_lossy(attr.key.as_ref()).to_string(),
            String::from_utf8_lossy(&attr.value).to_string(),
        )
    })
}

struct RepodataStream<'a, R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    factory: &'a PackageFactory,
    done: bool,
}

impl<R: BufRead> RepodataStream<'_, R> {
    /// Read up to the next complete `<package>` element
    fn next_record(&mut self) -> Result<Option<RpmRecord>> {
        let mut current: Option<RpmRecord> = None;
        let mut text = String::new();

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    text.clear();

                    match name.as_str() {
                        "package" => current = Some(RpmRecord::default()),
                        "version" => {
                            if let Some(record) = current.as_mut() {
                                for (key, value) in attributes(&e) {
                                    match key.as_str() {
                                        "epoch" => record.epoch = Some(value),
                                        "ver" => record.version = Some(value),
                                        "rel" => record.release = Some(value),
                                        "vcs" => record.vcs = Some(value),
                                        _ => {}
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(e)) => {
                    let decoded = self
                        .reader
                        .decoder()
                        .decode(e.as_ref())
                        .unwrap_or_default()
                        .to_string();
                    text.push_str(&decoded);
                }
                Ok(Event::CData(e)) => {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
                Ok(Event::GeneralRef(e)) => {
                    if let Ok(name) = e.decode() {
                        if let Some(resolved) = quick_xml::escape::resolve_predefined_entity(&name) {
                            text.push_str(resolved);
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let value = std::mem::take(&mut text).trim().to_string();

                    if name == "package" {
                        if let Some(record) = current.take() {
                            return Ok(Some(record));
                        }
                        continue;
                    }

                    let Some(record) = current.as_mut() else {
                        continue;
                    };
                    let value = (!value.is_empty()).then_some(value);
                    match name.as_str() {
                        "name" => record.name = value.unwrap_or_default(),
                        "arch" => record.arch = value.unwrap_or_default(),
                        "summary" => record.summary = value,
                        "url" => record.url = value,
                        "packager" => record.packager = value,
                        "rpm:license" => record.license = value,
                        "rpm:group" => record.group = value,
                        "rpm:sourcerpm" => record.sourcerpm = value,
                        _ => {}
                    }
                }
                Ok(Event::Eof) => return Ok(None),
                Err(e) => {
                    return Err(UnifyError::Parse(format!(
                        "XML parsing error at {}: {}",
                        self.reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for RepodataStream<'_, R> {
    type Item = Result<PackageMaker>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let record = match self.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            match self.factory.build(record.ident(), |maker| record.fill(maker)) {
                Ok(Some(maker)) => return Some(Ok(maker)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
