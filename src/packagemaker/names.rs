//! Repository-specific package names and their mapping onto the common name schema
//!
//! Parsers report every name they know about a package tagged with a
//! [`NameKind`]. The set of kinds present selects exactly one entry of the
//! static mapping table, which says which of the reported names becomes the
//! source name, binary name, tracking name, display name and project name
//! seed. A kind combination missing from the table is an error, never a
//! guess.

use crate::error::{Result, UnifyError};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Declares `NameKind` together with its storage spelling and `ALL_KINDS`
macro_rules! name_kinds {
    ($($(#[$attr:meta])* $variant:ident => $name:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum NameKind {
            $($(#[$attr])* $variant,)*
        }

        impl NameKind {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(NameKind::$variant => $name,)*
                }
            }
        }

        /// Every kind, in declaration order
        pub const ALL_KINDS: &[NameKind] = &[$(NameKind::$variant,)*];
    };
}

name_kinds! {
    /// Dropped by `add_name`
    Ignored => "ignored",

    // Format-agnostic kinds, used by simple parsers
    GenericName => "generic_name",
    GenericSrcName => "generic_srcname",
    GenericBinName => "generic_binname",
    GenericProjectName => "generic_projectname",

    DebianSourcePackage => "debian_source_package",
    DebianBinaryPackage => "debian_binary_package",

    RpmName => "rpm_name",
    RpmSrcName => "rpm_srcname",

    GentooName => "gentoo_name",
    GentooFullName => "gentoo_full_name",

    ArchName => "arch_name",
    ArchBasename => "arch_basename",

    BsdPkgname => "bsd_pkgname",
    BsdOrigin => "bsd_origin",

    OpenbsdStem => "openbsd_stem",
    OpenbsdPkgpath => "openbsd_pkgpath",

    PypiName => "pypi_name",

    CpanModule => "cpan_module",
    CpanDist => "cpan_dist",

    HackageName => "hackage_name",
    CratesName => "crates_name",
    NpmName => "npm_name",
    HomebrewFormula => "homebrew_formula",

    NixAttribute => "nix_attribute",
    NixPname => "nix_pname",

    OpamName => "opam_name",
}

impl NameKind {
    /// Parse the storage/config spelling of a kind
    pub fn from_str_name(s: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which supplied name fills which output slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameMapping {
    pub srcname: Option<NameKind>,
    pub binname: Option<NameKind>,
    pub trackname: Option<NameKind>,
    pub visiblename: NameKind,
    pub projectname_seed: NameKind,
}

impl NameMapping {
    /// One name serves every slot; `src`/`bin` says which typed slot it also fills
    const fn single(kind: NameKind, src: bool, bin: bool) -> Self {
        Self {
            srcname: if src { Some(kind) } else { None },
            binname: if bin { Some(kind) } else { None },
            trackname: Some(kind),
            visiblename: kind,
            projectname_seed: kind,
        }
    }
}

use NameKind::*;

static MAPPINGS: &[(&[NameKind], NameMapping)] = &[
    (&[GenericName], NameMapping::single(GenericName, false, false)),
    (&[GenericSrcName], NameMapping::single(GenericSrcName, true, false)),
    (&[GenericBinName], NameMapping::single(GenericBinName, false, true)),
    (
        &[GenericSrcName, GenericBinName],
        NameMapping {
            srcname: Some(GenericSrcName),
            binname: Some(GenericBinName),
            trackname: Some(GenericSrcName),
            visiblename: GenericBinName,
            projectname_seed: GenericSrcName,
        },
    ),
    (
        &[GenericName, GenericProjectName],
        NameMapping {
            srcname: None,
            binname: None,
            trackname: Some(GenericName),
            visiblename: GenericName,
            projectname_seed: GenericProjectName,
        },
    ),
    (
        &[GenericSrcName, GenericProjectName],
        NameMapping {
            srcname: Some(GenericSrcName),
            binname: None,
            trackname: Some(GenericSrcName),
            visiblename: GenericSrcName,
            projectname_seed: GenericProjectName,
        },
    ),
    (
        &[DebianSourcePackage],
        NameMapping::single(DebianSourcePackage, true, false),
    ),
    (
        &[DebianBinaryPackage],
        NameMapping::single(DebianBinaryPackage, false, true),
    ),
    (
        &[DebianSourcePackage, DebianBinaryPackage],
        NameMapping {
            srcname: Some(DebianSourcePackage),
            binname: Some(DebianBinaryPackage),
            trackname: Some(DebianSourcePackage),
            visiblename: DebianSourcePackage,
            projectname_seed: DebianSourcePackage,
        },
    ),
    (&[RpmName], NameMapping::single(RpmName, false, true)),
    (&[RpmSrcName], NameMapping::single(RpmSrcName, true, false)),
    (
        &[RpmName, RpmSrcName],
        NameMapping {
            srcname: Some(RpmSrcName),
            binname: Some(RpmName),
            trackname: Some(RpmName),
            visiblename: RpmName,
            projectname_seed: RpmSrcName,
        },
    ),
    (
        &[GentooName, GentooFullName],
        NameMapping {
            srcname: Some(GentooFullName),
            binname: None,
            trackname: Some(GentooFullName),
            visiblename: GentooFullName,
            projectname_seed: GentooName,
        },
    ),
    (&[ArchName], NameMapping::single(ArchName, false, true)),
    (
        &[ArchName, ArchBasename],
        NameMapping {
            srcname: Some(ArchBasename),
            binname: Some(ArchName),
            trackname: Some(ArchName),
            visiblename: ArchName,
            projectname_seed: ArchBasename,
        },
    ),
    (
        &[BsdPkgname, BsdOrigin],
        NameMapping {
            srcname: Some(BsdOrigin),
            binname: Some(BsdPkgname),
            trackname: Some(BsdOrigin),
            visiblename: BsdOrigin,
            projectname_seed: BsdPkgname,
        },
    ),
    (
        &[OpenbsdStem, OpenbsdPkgpath],
        NameMapping {
            srcname: Some(OpenbsdPkgpath),
            binname: Some(OpenbsdStem),
            trackname: Some(OpenbsdPkgpath),
            visiblename: OpenbsdPkgpath,
            projectname_seed: OpenbsdStem,
        },
    ),
    (&[PypiName], NameMapping::single(PypiName, true, false)),
    (&[CpanDist], NameMapping::single(CpanDist, true, false)),
    (
        &[CpanModule, CpanDist],
        NameMapping {
            srcname: Some(CpanDist),
            binname: None,
            trackname: Some(CpanDist),
            visiblename: CpanDist,
            projectname_seed: CpanDist,
        },
    ),
    (&[HackageName], NameMapping::single(HackageName, true, false)),
    (&[CratesName], NameMapping::single(CratesName, true, false)),
    (&[NpmName], NameMapping::single(NpmName, true, false)),
    (
        &[HomebrewFormula],
        NameMapping::single(HomebrewFormula, true, false),
    ),
    (
        &[NixAttribute, NixPname],
        NameMapping {
            srcname: None,
            binname: None,
            trackname: Some(NixAttribute),
            visiblename: NixPname,
            projectname_seed: NixPname,
        },
    ),
    (&[OpamName], NameMapping::single(OpamName, true, false)),
];

/// Sorted kind set → mapping; duplicate or inconsistent entries abort at first use
static MAPPING_INDEX: Lazy<HashMap<Vec<NameKind>, NameMapping>> = Lazy::new(|| {
    let mut index = HashMap::with_capacity(MAPPINGS.len());
    for (kinds, mapping) in MAPPINGS {
        let mut key = kinds.to_vec();
        key.sort();
        key.dedup();
        assert_eq!(key.len(), kinds.len(), "repeated kind in name mapping {:?}", kinds);
        assert!(
            mapping_slots(mapping).all(|kind| key.contains(&kind)),
            "name mapping for {:?} refers to a kind outside its key",
            kinds
        );
        let previous = index.insert(key, *mapping);
        assert!(previous.is_none(), "duplicate name mapping for {:?}", kinds);
    }
    index
});

fn mapping_slots(mapping: &NameMapping) -> impl Iterator<Item = NameKind> {
    [
        mapping.srcname,
        mapping.binname,
        mapping.trackname,
        Some(mapping.visiblename),
        Some(mapping.projectname_seed),
    ]
    .into_iter()
    .flatten()
}

/// Look up the mapping for an exact set of kinds
pub fn find_mapping(kinds: &[NameKind]) -> Option<&'static NameMapping> {
    let mut key = kinds.to_vec();
    key.sort();
    key.dedup();
    MAPPING_INDEX.get(&key)
}

/// Every kind set the table accepts
pub fn known_combinations() -> impl Iterator<Item = &'static [NameKind]> {
    MAPPINGS.iter().map(|(kinds, _)| *kinds)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedNames {
    pub srcname: Option<String>,
    pub binname: Option<String>,
    pub trackname: String,
    pub visiblename: String,
    pub projectname_seed: String,
}

/// Collects the names a parser reports for one record
#[derive(Debug, Clone, Default)]
pub struct NameMapper {
    names: BTreeMap<NameKind, String>,
}

impl NameMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name; a later value for the same kind replaces the earlier one
    pub fn add_name(&mut self, value: impl Into<String>, kind: NameKind) {
        if kind == NameKind::Ignored {
            return;
        }
        self.names.insert(kind, value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, kind: NameKind) -> Option<&str> {
        self.names.get(&kind).map(String::as_str)
    }

    /// Kinds supplied so far, in ascending order
    pub fn kinds(&self) -> Vec<NameKind> {
        self.names.keys().copied().collect()
    }

    pub fn get_mapped_names(&self) -> Result<MappedNames> {
        let kinds = self.kinds();
        let mapping = find_mapping(&kinds).ok_or_else(|| {
            UnifyError::NoNameMapping(
                kinds
                    .iter()
                    .map(NameKind::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        })?;

        let pick = |kind: NameKind| self.names.get(&kind).cloned();

        let trackname = mapping
            .trackname
            .and_then(pick)
            .ok_or(UnifyError::MissingField("trackname"))?;
        let visiblename = pick(mapping.visiblename).ok_or(UnifyError::MissingField("visiblename"))?;
        let projectname_seed =
            pick(mapping.projectname_seed).ok_or(UnifyError::MissingField("projectname_seed"))?;

        Ok(MappedNames {
            srcname: mapping.srcname.and_then(pick),
            binname: mapping.binname.and_then(pick),
            trackname,
            visiblename,
            projectname_seed,
        })
    }
}
