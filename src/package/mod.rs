use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

bitflags! {
    /// Package flags set by parsers and rules
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PackageFlags: u32 {
        /// Drop the package entirely
        const REMOVE = 1 << 0;
        const DEVEL = 1 << 1;
        const IGNORE = 1 << 2;
        const INCORRECT = 1 << 3;
        const UNTRUSTED = 1 << 4;
        const NOSCHEME = 1 << 5;
        const ROLLING = 1 << 6;
        const SINK = 1 << 7;
        const LEGACY = 1 << 8;
        const OUTDATED = 1 << 9;
        const P_IS_PATCH = 1 << 10;
        const ANY_IS_PATCH = 1 << 11;
        /// Log matched rules for this package
        const TRACE = 1 << 12;
        const ALTVER = 1 << 13;
        const VULNERABLE = 1 << 14;
        const NOLEGACY = 1 << 15;
        const WEAK_DEVEL = 1 << 16;
    }
}

impl Default for PackageFlags {
    fn default() -> Self {
        PackageFlags::empty()
    }
}

/// Kind of a package link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkType {
    UpstreamHomepage,
    UpstreamDownload,
    UpstreamRepository,
    UpstreamIssueTracker,
    ProjectHomepage,
    PackageHomepage,
    PackageSources,
    PackageRecipe,
    PackageRecipeRaw,
    Documentation,
    Other,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::UpstreamHomepage => "upstream_homepage",
            LinkType::UpstreamDownload => "upstream_download",
            LinkType::UpstreamRepository => "upstream_repository",
            LinkType::UpstreamIssueTracker => "upstream_issue_tracker",
            LinkType::ProjectHomepage => "project_homepage",
            LinkType::PackageHomepage => "package_homepage",
            LinkType::PackageSources => "package_sources",
            LinkType::PackageRecipe => "package_recipe",
            LinkType::PackageRecipeRaw => "package_recipe_raw",
            LinkType::Documentation => "documentation",
            LinkType::Other => "other",
        }
    }

    /// Homepage-like links, consulted by `wwwpart`/`wwwpat` rules
    pub fn is_homepage(&self) -> bool {
        matches!(
            self,
            LinkType::UpstreamHomepage | LinkType::ProjectHomepage
        )
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub kind: LinkType,
    pub url: String,
    pub fragment: Option<String>,
}

/// Version classification, recomputed for every changed project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionClass {
    Unprocessed,
    Newest,
    Outdated,
    Ignored,
    Unique,
    Devel,
    Legacy,
    Rolling,
    Incorrect,
    Untrusted,
    NoScheme,
}

impl VersionClass {
    /// Convert to integer for storage
    pub fn as_i32(&self) -> i32 {
        match self {
            VersionClass::Unprocessed => 0,
            VersionClass::Newest => 1,
            VersionClass::Outdated => 2,
            VersionClass::Ignored => 3,
            VersionClass::Unique => 4,
            VersionClass::Devel => 5,
            VersionClass::Legacy => 6,
            VersionClass::Rolling => 7,
            VersionClass::Incorrect => 8,
            VersionClass::Untrusted => 9,
            VersionClass::NoScheme => 10,
        }
    }

    /// Convert from integer
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => VersionClass::Newest,
            2 => VersionClass::Outdated,
            3 => VersionClass::Ignored,
            4 => VersionClass::Unique,
            5 => VersionClass::Devel,
            6 => VersionClass::Legacy,
            7 => VersionClass::Rolling,
            8 => VersionClass::Incorrect,
            9 => VersionClass::Untrusted,
            10 => VersionClass::NoScheme,
            _ => VersionClass::Unprocessed,
        }
    }
}

/// CPE name components
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cpe {
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub edition: Option<String>,
    pub lang: Option<String>,
    pub sw_edition: Option<String>,
    pub target_sw: Option<String>,
    pub target_hw: Option<String>,
    pub other: Option<String>,
}

impl Cpe {
    pub fn is_empty(&self) -> bool {
        *self == Cpe::default()
    }
}

/// A finalized package
///
/// Produced by `PackageMaker::spawn`. Only the rule engine (`effname`,
/// `version`, `flags`, `flavors`, `categories`) and the classifier
/// (`versionclass`) touch it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub repo: String,
    pub family: String,
    pub subrepo: Option<String>,

    pub name: String,
    pub srcname: Option<String>,
    pub binname: Option<String>,
    pub binnames: Vec<String>,
    pub trackname: String,
    pub visiblename: String,
    pub projectname_seed: String,
    pub effname: String,

    pub version: String,
    pub origversion: String,
    pub rawversion: String,

    pub arch: Option<String>,
    pub maintainers: Vec<String>,
    pub categories: Vec<String>,
    pub comment: Option<String>,
    pub licenses: Vec<String>,

    pub flags: PackageFlags,
    pub shadow: bool,
    pub versionclass: VersionClass,

    pub links: Vec<Link>,
    pub extrafields: BTreeMap<String, String>,
    pub cpe: Cpe,
    pub flavors: Vec<String>,
}

fn feed_str(hasher: &mut Xxh3, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn feed_opt(hasher: &mut Xxh3, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update(&[1]);
            feed_str(hasher, value);
        }
        None => hasher.update(&[0]),
    }
}

fn feed_list(hasher: &mut Xxh3, values: &[String]) {
    hasher.update(&(values.len() as u64).to_le_bytes());
    for value in values {
        feed_str(hasher, value);
    }
}

impl Package {
    /// First category, if any
    pub fn category(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }

    pub fn has_flag(&self, flag: PackageFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Homepage URLs in link order
    pub fn homepages(&self) -> impl Iterator<Item = &str> {
        self.links
            .iter()
            .filter(|link| link.kind.is_homepage())
            .map(|link| link.url.as_str())
    }

    /// Short identity used in diagnostics
    pub fn ident(&self) -> String {
        match &self.subrepo {
            Some(subrepo) => format!(
                "{}/{}:{} {}",
                self.repo, subrepo, self.visiblename, self.version
            ),
            None => format!("{}:{} {}", self.repo, self.visiblename, self.version),
        }
    }

    /// Content hash over every field except `versionclass`
    ///
    /// The classification is recomputed after every change, so including it
    /// would make unchanged projects look modified.
    pub fn classless_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();

        feed_str(&mut hasher, &self.repo);
        feed_str(&mut hasher, &self.family);
        feed_opt(&mut hasher, self.subrepo.as_deref());

        feed_str(&mut hasher, &self.name);
        feed_opt(&mut hasher, self.srcname.as_deref());
        feed_opt(&mut hasher, self.binname.as_deref());
        feed_list(&mut hasher, &self.binnames);
        feed_str(&mut hasher, &self.trackname);
        feed_str(&mut hasher, &self.visiblename);
        feed_str(&mut hasher, &self.projectname_seed);
        feed_str(&mut hasher, &self.effname);

        feed_str(&mut hasher, &self.version);
        feed_str(&mut hasher, &self.origversion);
        feed_str(&mut hasher, &self.rawversion);

        feed_opt(&mut hasher, self.arch.as_deref());
        feed_list(&mut hasher, &self.maintainers);
        feed_list(&mut hasher, &self.categories);
        feed_opt(&mut hasher, self.comment.as_deref());
        feed_list(&mut hasher, &self.licenses);

        hasher.update(&self.flags.bits().to_le_bytes());
        hasher.update(&[self.shadow as u8]);

        hasher.update(&(self.links.len() as u64).to_le_bytes());
        for link in &self.links {
            feed_str(&mut hasher, link.kind.as_str());
            feed_str(&mut hasher, &link.url);
            feed_opt(&mut hasher, link.fragment.as_deref());
        }

        hasher.update(&(self.extrafields.len() as u64).to_le_bytes());
        for (key, value) in &self.extrafields {
            feed_str(&mut hasher, key);
            feed_str(&mut hasher, value);
        }

        for component in [
            &self.cpe.vendor,
            &self.cpe.product,
            &self.cpe.edition,
            &self.cpe.lang,
            &self.cpe.sw_edition,
            &self.cpe.target_sw,
            &self.cpe.target_hw,
            &self.cpe.other,
        ] {
            feed_opt(&mut hasher, component.as_deref());
        }

        feed_list(&mut hasher, &self.flavors);

        hasher.digest()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Minimal package for tests in other modules
    pub fn package(repo: &str, effname: &str, version: &str) -> Package {
        Package {
            repo: repo.to_string(),
            family: repo.to_string(),
            subrepo: None,
            name: effname.to_string(),
            srcname: Some(effname.to_string()),
            binname: None,
            binnames: Vec::new(),
            trackname: effname.to_string(),
            visiblename: effname.to_string(),
            projectname_seed: effname.to_string(),
            effname: effname.to_string(),
            version: version.to_string(),
            origversion: version.to_string(),
            rawversion: version.to_string(),
            arch: None,
            maintainers: Vec::new(),
            categories: Vec::new(),
            comment: None,
            licenses: Vec::new(),
            flags: PackageFlags::empty(),
            shadow: false,
            versionclass: VersionClass::Unprocessed,
            links: Vec::new(),
            extrafields: BTreeMap::new(),
            cpe: Cpe::default(),
            flavors: Vec::new(),
        }
    }
}
