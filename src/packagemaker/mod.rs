//! Package draft builder
//!
//! Parsers fill a [`PackageMaker`] one field at a time. Every setter runs
//! its value through a fixed normalizer chain, so a malformed value only
//! costs that value, never the record. `spawn` turns a complete draft into
//! an immutable [`Package`].

pub mod names;

use crate::error::{Result, UnifyError};
use crate::normalize::fields::{
    self, apply_chain, limit_short_field, limit_summary, Diagnostic, Normalizer,
};
use crate::package::{Cpe, Link, LinkType, Package, PackageFlags, VersionClass};
use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use tracing::{error, warn};

pub use names::{MappedNames, NameKind, NameMapper};

const NAME_CHAIN: &[Normalizer] = &[fields::strip, fields::forbid_newlines];
const VERSION_CHAIN: &[Normalizer] = &[fields::strip, fields::forbid_newlines];
const SUMMARY_CHAIN: &[Normalizer] = &[fields::strip, fields::forbid_newlines, limit_summary];
const SHORT_CHAIN: &[Normalizer] = &[fields::strip, fields::forbid_newlines, limit_short_field];
const MAINTAINER_CHAIN: &[Normalizer] = &[
    fields::strip,
    fields::forbid_newlines,
    fields::lowercase,
    limit_short_field,
];
const URL_CHAIN: &[Normalizer] = &[fields::strip, fields::forbid_newlines, fields::url];

/// Values accepted by the omnivorous setters
///
/// Implemented for strings, options and (nested) sequences, which are
/// flattened; `None` contributes nothing.
pub trait IntoValues {
    fn collect_into(self, out: &mut Vec<String>);
}

impl IntoValues for String {
    fn collect_into(self, out: &mut Vec<String>) {
        out.push(self);
    }
}

impl IntoValues for &String {
    fn collect_into(self, out: &mut Vec<String>) {
        out.push(self.clone());
    }
}

impl IntoValues for &str {
    fn collect_into(self, out: &mut Vec<String>) {
        out.push(self.to_string());
    }
}

impl<T: IntoValues> IntoValues for Option<T> {
    fn collect_into(self, out: &mut Vec<String>) {
        if let Some(value) = self {
            value.collect_into(out);
        }
    }
}

impl<T: IntoValues> IntoValues for Vec<T> {
    fn collect_into(self, out: &mut Vec<String>) {
        for value in self {
            value.collect_into(out);
        }
    }
}

impl<T: IntoValues + Clone> IntoValues for &[T] {
    fn collect_into(self, out: &mut Vec<String>) {
        for value in self {
            value.clone().collect_into(out);
        }
    }
}

impl<T: IntoValues, const N: usize> IntoValues for [T; N] {
    fn collect_into(self, out: &mut Vec<String>) {
        for value in self {
            value.collect_into(out);
        }
    }
}

/// Repository-level attributes stamped onto every spawned package
#[derive(Debug, Clone, Default)]
pub struct SpawnContext {
    pub repo: String,
    pub family: String,
    pub subrepo: Option<String>,
    pub shadow: bool,
    pub default_maintainer: Option<String>,
}

/// Mutable draft of one package
#[derive(Debug, Clone, Default)]
pub struct PackageMaker {
    ident: String,
    names: NameMapper,

    version: Option<String>,
    origversion: Option<String>,
    rawversion: Option<String>,

    arch: Option<String>,
    subrepo: Option<String>,
    summary: Option<String>,

    maintainers: Vec<String>,
    categories: Vec<String>,
    licenses: Vec<String>,
    binnames: Vec<String>,
    flavors: Vec<String>,
    links: Vec<Link>,

    flags: PackageFlags,
    extrafields: BTreeMap<String, String>,
    cpe: Cpe,

    diagnostics: Vec<Diagnostic>,
}

fn dedup_preserving_order<T: Eq + Hash + Clone>(values: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

impl PackageMaker {
    pub fn new(ident: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            ..Default::default()
        }
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn set_ident(&mut self, ident: impl Into<String>) {
        self.ident = ident.into();
    }

    /// Diagnostics reported by normalizers so far
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Independent copy of the draft, optionally renamed or with a suffix appended to its identity
    pub fn clone_with(&self, ident: Option<&str>, append_ident: Option<&str>) -> Self {
        let mut copy = self.clone();
        if let Some(ident) = ident {
            copy.ident = ident.to_string();
        }
        if let Some(suffix) = append_ident {
            copy.ident.push_str(suffix);
        }
        copy
    }

    fn normalize(&mut self, field: &'static str, value: String, chain: &[Normalizer]) -> Option<String> {
        let outcome = apply_chain(value, chain);
        for diagnostic in outcome.diagnostics {
            match &diagnostic {
                Diagnostic::Warning(message) => {
                    warn!(ident = %self.ident, field, "{}", message)
                }
                Diagnostic::Error(message) => {
                    error!(ident = %self.ident, field, "{}, value dropped", message)
                }
            }
            self.diagnostics.push(diagnostic);
        }
        outcome.value
    }

    fn normalize_all<V: IntoValues>(
        &mut self,
        field: &'static str,
        values: V,
        chain: &[Normalizer],
    ) -> Vec<String> {
        let mut raw = Vec::new();
        values.collect_into(&mut raw);
        raw.into_iter()
            .filter_map(|value| self.normalize(field, value, chain))
            .collect()
    }

    pub fn add_name(&mut self, value: impl Into<String>, kind: NameKind) {
        if let Some(value) = self.normalize("name", value.into(), NAME_CHAIN) {
            self.names.add_name(value, kind);
        }
    }

    pub fn names(&self) -> &NameMapper {
        &self.names
    }

    /// Set the version, optionally rewriting it with `normalizer`; the original is kept as `origversion`
    pub fn set_version<S: Into<String>>(&mut self, version: Option<S>, normalizer: Option<fn(&str) -> String>) {
        let Some(version) = version else {
            return;
        };
        let Some(origversion) = self.normalize("version", version.into(), VERSION_CHAIN) else {
            return;
        };
        let version = match normalizer {
            Some(normalizer) => normalizer(&origversion),
            None => origversion.clone(),
        };
        self.version = Some(version);
        self.origversion = Some(origversion);
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn set_rawversion<S: Into<String>>(&mut self, rawversion: Option<S>) {
        if let Some(value) = rawversion {
            if let Some(value) = self.normalize("rawversion", value.into(), VERSION_CHAIN) {
                self.rawversion = Some(value);
            }
        }
    }

    pub fn set_arch<S: Into<String>>(&mut self, arch: Option<S>) {
        if let Some(value) = arch {
            if let Some(value) = self.normalize("arch", value.into(), SHORT_CHAIN) {
                self.arch = Some(value);
            }
        }
    }

    pub fn set_subrepo<S: Into<String>>(&mut self, subrepo: Option<S>) {
        if let Some(value) = subrepo {
            if let Some(value) = self.normalize("subrepo", value.into(), SHORT_CHAIN) {
                self.subrepo = Some(value);
            }
        }
    }

    pub fn set_summary<S: Into<String>>(&mut self, summary: Option<S>) {
        if let Some(value) = summary {
            if let Some(value) = self.normalize("summary", value.into(), SUMMARY_CHAIN) {
                self.summary = Some(value);
            }
        }
    }

    pub fn set_flags(&mut self, mask: PackageFlags, is_set: bool) {
        self.flags.set(mask, is_set);
    }

    pub fn add_maintainers<V: IntoValues>(&mut self, values: V) {
        let values = self.normalize_all("maintainer", values, MAINTAINER_CHAIN);
        self.maintainers.extend(values);
    }

    pub fn add_categories<V: IntoValues>(&mut self, values: V) {
        let values = self.normalize_all("category", values, SHORT_CHAIN);
        self.categories.extend(values);
    }

    pub fn add_licenses<V: IntoValues>(&mut self, values: V) {
        let values = self.normalize_all("license", values, SHORT_CHAIN);
        self.licenses.extend(values);
    }

    pub fn add_binnames<V: IntoValues>(&mut self, values: V) {
        let values = self.normalize_all("binname", values, NAME_CHAIN);
        self.binnames.extend(values);
    }

    pub fn add_flavors<V: IntoValues>(&mut self, values: V) {
        let values = self.normalize_all("flavor", values, SHORT_CHAIN);
        self.flavors.extend(values);
    }

    /// Add links of one kind; a `#fragment` is split off before URL validation
    pub fn add_links<V: IntoValues>(&mut self, kind: LinkType, urls: V) {
        let mut raw = Vec::new();
        urls.collect_into(&mut raw);

        for value in raw {
            let (url, fragment) = match value.split_once('#') {
                Some((url, fragment)) if !fragment.trim().is_empty() => {
                    (url.to_string(), Some(fragment.trim().to_string()))
                }
                Some((url, _)) => (url.to_string(), None),
                None => (value, None),
            };
            if let Some(url) = self.normalize("link", url, URL_CHAIN) {
                self.links.push(Link {
                    kind,
                    url,
                    fragment,
                });
            }
        }
    }

    pub fn add_homepages<V: IntoValues>(&mut self, urls: V) {
        self.add_links(LinkType::UpstreamHomepage, urls);
    }

    pub fn add_downloads<V: IntoValues>(&mut self, urls: V) {
        self.add_links(LinkType::UpstreamDownload, urls);
    }

    pub fn set_extra_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(value) = self.normalize("extrafield", value.into(), NAME_CHAIN) {
            self.extrafields.insert(key, value);
        }
    }

    pub fn set_cpe(&mut self, cpe: Cpe) {
        let Cpe {
            vendor,
            product,
            edition,
            lang,
            sw_edition,
            target_sw,
            target_hw,
            other,
        } = cpe;
        let mut component = |value: Option<String>| {
            value.and_then(|value| self.normalize("cpe", value, SHORT_CHAIN))
        };
        let normalized = Cpe {
            vendor: component(vendor),
            product: component(product),
            edition: component(edition),
            lang: component(lang),
            sw_edition: component(sw_edition),
            target_sw: component(target_sw),
            target_hw: component(target_hw),
            other: component(other),
        };
        self.cpe = normalized;
    }

    /// Finalize the draft
    ///
    /// Fails when no version was set or the supplied names do not resolve
    /// through the name mapping table.
    pub fn spawn(self, ctx: &SpawnContext) -> Result<Package> {
        let version = self.version.ok_or(UnifyError::MissingField("version"))?;
        let origversion = self.origversion.unwrap_or_else(|| version.clone());
        let rawversion = self.rawversion.unwrap_or_else(|| origversion.clone());

        let names = self.names.get_mapped_names()?;

        let mut maintainers = dedup_preserving_order(self.maintainers);
        if maintainers.is_empty() {
            if let Some(default) = &ctx.default_maintainer {
                maintainers.push(default.clone());
            }
        }

        let binnames = dedup_preserving_order(self.binnames);
        let name = names
            .binname
            .clone()
            .or_else(|| names.srcname.clone())
            .unwrap_or_else(|| names.visiblename.clone());

        Ok(Package {
            repo: ctx.repo.clone(),
            family: ctx.family.clone(),
            subrepo: self.subrepo.or_else(|| ctx.subrepo.clone()),
            name,
            srcname: names.srcname,
            binname: names.binname,
            binnames,
            trackname: names.trackname,
            visiblename: names.visiblename,
            effname: names.projectname_seed.clone(),
            projectname_seed: names.projectname_seed,
            version,
            origversion,
            rawversion,
            arch: self.arch,
            maintainers,
            categories: dedup_preserving_order(self.categories),
            comment: self.summary,
            licenses: dedup_preserving_order(self.licenses),
            flags: self.flags,
            shadow: ctx.shadow,
            versionclass: VersionClass::Unprocessed,
            links: dedup_preserving_order(self.links),
            extrafields: self.extrafields,
            cpe: self.cpe,
            flavors: dedup_preserving_order(self.flavors),
        })
    }
}

/// Applies the failure policy around building and spawning records
///
/// In skip-failed mode a failing record is logged and dropped; otherwise the
/// failure is returned and aborts the whole parse.
#[derive(Debug, Default)]
pub struct PackageFactory {
    skip_failed: bool,
    failures: Cell<usize>,
}

impl PackageFactory {
    pub fn new(skip_failed: bool) -> Self {
        Self {
            skip_failed,
            failures: Cell::new(0),
        }
    }

    pub fn begin(&self, ident: impl Into<String>) -> PackageMaker {
        PackageMaker::new(ident)
    }

    /// Run `f` against a fresh draft
    ///
    /// Returns `Ok(None)` when the record failed and failures are skipped.
    pub fn build<F>(&self, ident: impl Into<String>, f: F) -> Result<Option<PackageMaker>>
    where
        F: FnOnce(&mut PackageMaker) -> Result<()>,
    {
        let mut maker = PackageMaker::new(ident);
        match f(&mut maker) {
            Ok(()) => Ok(Some(maker)),
            Err(e) => self.fail(maker.ident, e).map(|()| None),
        }
    }

    /// Spawn a draft under the same failure policy
    pub fn spawn(&self, maker: PackageMaker, ctx: &SpawnContext) -> Result<Option<Package>> {
        let ident = maker.ident.clone();
        match maker.spawn(ctx) {
            Ok(package) => Ok(Some(package)),
            Err(e) => self.fail(ident, e).map(|()| None),
        }
    }

    /// Number of records dropped in skip-failed mode
    pub fn failures(&self) -> usize {
        self.failures.get()
    }

    fn fail(&self, ident: String, e: UnifyError) -> Result<()> {
        error!(ident = %ident, error = %e, "package processing failed");
        if self.skip_failed {
            self.failures.set(self.failures.get() + 1);
            Ok(())
        } else {
            Err(UnifyError::PackageFailed {
                ident,
                source: Box::new(e),
            })
        }
    }
}
