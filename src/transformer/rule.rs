//! Rule file syntax and compiled rules
//!
//! A rule file is a YAML list of mappings. Keys fall into match keys, which
//! are ANDed, and action keys, applied when every match key holds:
//!
//! ```yaml
//! - { name: [libfoo, foo-lib], setname: foo }
//! - { namepat: "python-(.+)", setname: "python:$1" }
//! - { name: foo, verpat: ".*(alpha|beta).*", devel: true, last: true }
//! ```

use crate::error::{Result, UnifyError};
use crate::normalize::version::{compare_versions, version_components};
use crate::package::{Package, PackageFlags};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CountSpec {
    Exact(usize),
    Range(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FlavorSpec {
    CurrentName(bool),
    Values(OneOrMany<String>),
}

/// One rule as written in a rule file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    // match keys
    pub name: Option<OneOrMany<String>>,
    pub namepat: Option<String>,
    pub ver: Option<OneOrMany<String>>,
    pub verpat: Option<String>,
    pub ruleset: Option<OneOrMany<String>>,
    pub noruleset: Option<OneOrMany<String>>,
    pub category: Option<OneOrMany<String>>,
    pub nocategory: Option<OneOrMany<String>>,
    pub maintainer: Option<OneOrMany<String>>,
    pub nomaintainer: Option<OneOrMany<String>>,
    pub wwwpart: Option<OneOrMany<String>>,
    pub wwwpat: Option<String>,
    pub summpart: Option<OneOrMany<String>>,
    pub verlonger: Option<usize>,
    pub vergt: Option<String>,
    pub verge: Option<String>,
    pub verlt: Option<String>,
    pub verle: Option<String>,
    pub vereq: Option<String>,
    pub repos: Option<CountSpec>,
    pub families: Option<CountSpec>,
    pub flag: Option<OneOrMany<String>>,
    pub noflag: Option<OneOrMany<String>>,

    // flag actions
    pub remove: Option<bool>,
    pub ignore: Option<bool>,
    pub devel: Option<bool>,
    pub weak_devel: Option<bool>,
    pub rolling: Option<bool>,
    pub incorrect: Option<bool>,
    pub untrusted: Option<bool>,
    pub noscheme: Option<bool>,
    pub legacy: Option<bool>,
    pub nolegacy: Option<bool>,
    pub outdated: Option<bool>,
    pub p_is_patch: Option<bool>,
    pub any_is_patch: Option<bool>,
    pub sink: Option<bool>,
    pub trace: Option<bool>,
    pub altver: Option<bool>,
    pub vulnerable: Option<bool>,

    // other actions
    pub setname: Option<String>,
    pub setver: Option<String>,
    pub replaceinname: Option<BTreeMap<String, String>>,
    pub tolowername: Option<bool>,
    pub addflavor: Option<FlavorSpec>,
    pub resetflavors: Option<bool>,
    pub addcategory: Option<OneOrMany<String>>,
    pub warning: Option<String>,
    pub last: Option<bool>,
}

/// Inclusive count range; `None` bounds are open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRange {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl CountRange {
    pub fn contains(&self, value: usize) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    fn parse(spec: &CountSpec) -> std::result::Result<Self, String> {
        let text = match spec {
            CountSpec::Exact(n) => {
                return Ok(Self {
                    min: Some(*n),
                    max: Some(*n),
                })
            }
            CountSpec::Range(text) => text.trim(),
        };

        let bound = |s: &str| -> std::result::Result<Option<usize>, String> {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse()
                    .map(Some)
                    .map_err(|_| format!("bad count {:?} in range {:?}", s, text))
            }
        };

        match text.split_once('-') {
            Some((min, max)) => Ok(Self {
                min: bound(min)?,
                max: bound(max)?,
            }),
            None => {
                let n = bound(text)?;
                Ok(Self { min: n, max: n })
            }
        }
    }
}

/// Repository and family counts of a project from the previous run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectSpread {
    pub repos: usize,
    pub families: usize,
}

/// Per-repository facts rules can match on
#[derive(Debug, Clone, Default)]
pub struct PackageContext {
    pub rulesets: HashSet<String>,
}

impl PackageContext {
    /// The repository name and family always count as rulesets
    pub fn new(repo: &str, family: &str, rulesets: &[String]) -> Self {
        let mut all: HashSet<String> = rulesets.iter().cloned().collect();
        all.insert(repo.to_string());
        all.insert(family.to_string());
        Self { rulesets: all }
    }
}

/// Template with `$N` references into a regex match
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Template {
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Group(usize),
}

impl Template {
    pub(crate) fn parse(text: &str) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                // digit strings too long for usize can never name a group
                parts.push(TemplatePart::Group(digits.parse().unwrap_or(usize::MAX)));
            } else {
                literal.push(c);
            }
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }

        Self { parts }
    }

    /// Expand against `groups` (group 0 is the whole subject)
    ///
    /// References to groups which did not participate expand to nothing and
    /// produce a warning.
    pub(crate) fn expand(&self, groups: &[Option<String>], warnings: &mut Vec<String>) -> String {
        let mut result = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => result.push_str(text),
                TemplatePart::Group(n) => match groups.get(*n) {
                    Some(Some(value)) => result.push_str(value),
                    _ => warnings.push(format!("template references unavailable group ${}", n)),
                },
            }
        }
        result
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Matcher {
    Name(HashSet<String>),
    NamePat(Regex),
    Ver(HashSet<String>),
    VerPat(Regex),
    Ruleset(HashSet<String>),
    NoRuleset(HashSet<String>),
    Category(HashSet<String>),
    NoCategory(HashSet<String>),
    Maintainer(HashSet<String>),
    NoMaintainer(HashSet<String>),
    WwwPart(Vec<String>),
    WwwPat(Regex),
    SummPart(Vec<String>),
    VerLonger(usize),
    VerCompare(Ordering, bool, String),
    Repos(CountRange),
    Families(CountRange),
    Flag(PackageFlags),
    NoFlag(PackageFlags),
}

#[derive(Debug, Clone)]
pub(crate) enum FlavorSource {
    CurrentName,
    Values(Vec<Template>),
}

#[derive(Debug, Clone)]
pub(crate) enum Action {
    SetFlags(PackageFlags, bool),
    AddFlavor(FlavorSource),
    ResetFlavors,
    SetName(Template),
    ReplaceInName(Vec<(String, String)>),
    ToLowerName,
    SetVer(Template),
    AddCategory(Vec<String>),
    Warning(String),
}

/// Captures collected while matching one rule against one package
#[derive(Debug, Default)]
pub(crate) struct MatchContext {
    pub name_groups: Vec<Option<String>>,
    pub ver_groups: Vec<Option<String>>,
}

/// Compiled rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) index: usize,
    pub(crate) source: String,
    pub(crate) matchers: Vec<Matcher>,
    pub(crate) actions: Vec<Action>,
    pub(crate) last: bool,
}

fn anchored(pattern: &str, case_insensitive: bool, source: &str) -> Result<Regex> {
    RegexBuilder::new(&format!("^(?:{})$", pattern))
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| rule_error(source, format!("bad regex {:?}: {}", pattern, e)))
}

fn unanchored(pattern: &str, source: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| rule_error(source, format!("bad regex {:?}: {}", pattern, e)))
}

fn rule_error(source: &str, message: String) -> UnifyError {
    UnifyError::RuleSyntax {
        file: source.to_string(),
        message,
    }
}

fn set_of(values: OneOrMany<String>) -> HashSet<String> {
    values.into_vec().into_iter().collect()
}

fn lowered_set_of(values: OneOrMany<String>) -> HashSet<String> {
    values.into_vec().into_iter().map(|v| v.to_lowercase()).collect()
}

fn lowered_list_of(values: OneOrMany<String>) -> Vec<String> {
    values.into_vec().into_iter().map(|v| v.to_lowercase()).collect()
}

fn flags_of(values: OneOrMany<String>, source: &str) -> Result<PackageFlags> {
    let mut flags = PackageFlags::empty();
    for value in values.into_vec() {
        let flag = PackageFlags::from_name(&value.to_uppercase())
            .ok_or_else(|| rule_error(source, format!("unknown flag {:?}", value)))?;
        flags |= flag;
    }
    Ok(flags)
}

fn captures_of(regex: &Regex, subject: &str) -> Option<Vec<Option<String>>> {
    regex.captures(subject).map(|caps| {
        caps.iter()
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect()
    })
}

impl Rule {
    /// Compile a rule; `source` names the rule in diagnostics (e.g. `file.yaml:12`)
    pub fn compile(spec: RuleSpec, index: usize, source: String) -> Result<Self> {
        let mut matchers = Vec::new();
        let src = source.as_str();

        // cheap matchers first; order does not change the outcome
        if let Some(names) = spec.name {
            matchers.push(Matcher::Name(set_of(names)));
        }
        if let Some(pattern) = &spec.namepat {
            matchers.push(Matcher::NamePat(anchored(pattern, false, src)?));
        }
        if let Some(versions) = spec.ver {
            matchers.push(Matcher::Ver(set_of(versions)));
        }
        if let Some(pattern) = &spec.verpat {
            matchers.push(Matcher::VerPat(anchored(pattern, true, src)?));
        }
        if let Some(rulesets) = spec.ruleset {
            matchers.push(Matcher::Ruleset(set_of(rulesets)));
        }
        if let Some(rulesets) = spec.noruleset {
            matchers.push(Matcher::NoRuleset(set_of(rulesets)));
        }
        if let Some(categories) = spec.category {
            matchers.push(Matcher::Category(lowered_set_of(categories)));
        }
        if let Some(categories) = spec.nocategory {
            matchers.push(Matcher::NoCategory(lowered_set_of(categories)));
        }
        if let Some(maintainers) = spec.maintainer {
            matchers.push(Matcher::Maintainer(lowered_set_of(maintainers)));
        }
        if let Some(maintainers) = spec.nomaintainer {
            matchers.push(Matcher::NoMaintainer(lowered_set_of(maintainers)));
        }
        if let Some(parts) = spec.wwwpart {
            matchers.push(Matcher::WwwPart(lowered_list_of(parts)));
        }
        if let Some(pattern) = &spec.wwwpat {
            matchers.push(Matcher::WwwPat(unanchored(pattern, src)?));
        }
        if let Some(parts) = spec.summpart {
            matchers.push(Matcher::SummPart(lowered_list_of(parts)));
        }
        if let Some(n) = spec.verlonger {
            matchers.push(Matcher::VerLonger(n));
        }
        for (reference, ordering, or_equal) in [
            (spec.vergt, Ordering::Greater, false),
            (spec.verge, Ordering::Greater, true),
            (spec.verlt, Ordering::Less, false),
            (spec.verle, Ordering::Less, true),
            (spec.vereq, Ordering::Equal, true),
        ] {
            if let Some(reference) = reference {
                matchers.push(Matcher::VerCompare(ordering, or_equal, reference));
            }
        }
        if let Some(spec) = &spec.repos {
            matchers.push(Matcher::Repos(
                CountRange::parse(spec).map_err(|e| rule_error(src, e))?,
            ));
        }
        if let Some(spec) = &spec.families {
            matchers.push(Matcher::Families(
                CountRange::parse(spec).map_err(|e| rule_error(src, e))?,
            ));
        }
        if let Some(flags) = spec.flag {
            matchers.push(Matcher::Flag(flags_of(flags, src)?));
        }
        if let Some(flags) = spec.noflag {
            matchers.push(Matcher::NoFlag(flags_of(flags, src)?));
        }

        let mut actions = Vec::new();
        if let Some(message) = spec.warning {
            actions.push(Action::Warning(message));
        }
        for (value, flag) in [
            (spec.remove, PackageFlags::REMOVE),
            (spec.ignore, PackageFlags::IGNORE),
            (spec.devel, PackageFlags::DEVEL),
            (spec.weak_devel, PackageFlags::WEAK_DEVEL),
            (spec.rolling, PackageFlags::ROLLING),
            (spec.incorrect, PackageFlags::INCORRECT),
            (spec.untrusted, PackageFlags::UNTRUSTED),
            (spec.noscheme, PackageFlags::NOSCHEME),
            (spec.legacy, PackageFlags::LEGACY),
            (spec.nolegacy, PackageFlags::NOLEGACY),
            (spec.outdated, PackageFlags::OUTDATED),
            (spec.p_is_patch, PackageFlags::P_IS_PATCH),
            (spec.any_is_patch, PackageFlags::ANY_IS_PATCH),
            (spec.sink, PackageFlags::SINK),
            (spec.trace, PackageFlags::TRACE),
            (spec.altver, PackageFlags::ALTVER),
            (spec.vulnerable, PackageFlags::VULNERABLE),
        ] {
            if let Some(is_set) = value {
                actions.push(Action::SetFlags(flag, is_set));
            }
        }
        if spec.resetflavors == Some(true) {
            actions.push(Action::ResetFlavors);
        }
        match spec.addflavor {
            Some(FlavorSpec::CurrentName(true)) => {
                actions.push(Action::AddFlavor(FlavorSource::CurrentName))
            }
            Some(FlavorSpec::CurrentName(false)) | None => {}
            Some(FlavorSpec::Values(values)) => actions.push(Action::AddFlavor(
                FlavorSource::Values(values.into_vec().iter().map(|v| Template::parse(v)).collect()),
            )),
        }
        if let Some(template) = &spec.setname {
            actions.push(Action::SetName(Template::parse(template)));
        }
        if let Some(replacements) = spec.replaceinname {
            actions.push(Action::ReplaceInName(replacements.into_iter().collect()));
        }
        if spec.tolowername == Some(true) {
            actions.push(Action::ToLowerName);
        }
        if let Some(template) = &spec.setver {
            actions.push(Action::SetVer(Template::parse(template)));
        }
        if let Some(categories) = spec.addcategory {
            actions.push(Action::AddCategory(categories.into_vec()));
        }

        Ok(Self {
            index,
            source,
            matchers,
            actions,
            last: spec.last.unwrap_or(false),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Names this rule is restricted to, if it has a `name` matcher
    pub(crate) fn name_set(&self) -> Option<&HashSet<String>> {
        self.matchers.iter().find_map(|m| match m {
            Matcher::Name(names) => Some(names),
            _ => None,
        })
    }

    /// Evaluate every matcher against the current package state
    pub(crate) fn matches(
        &self,
        package: &Package,
        ctx: &PackageContext,
        spread: Option<&HashMap<String, ProjectSpread>>,
    ) -> Option<MatchContext> {
        let mut match_ctx = MatchContext::default();

        for matcher in &self.matchers {
            let ok = match matcher {
                Matcher::Name(names) => names.contains(&package.effname),
                Matcher::NamePat(regex) => match captures_of(regex, &package.effname) {
                    Some(groups) => {
                        match_ctx.name_groups = groups;
                        true
                    }
                    None => false,
                },
                Matcher::Ver(versions) => versions.contains(&package.version),
                Matcher::VerPat(regex) => match captures_of(regex, &package.version) {
                    Some(groups) => {
                        match_ctx.ver_groups = groups;
                        true
                    }
                    None => false,
                },
                Matcher::Ruleset(rulesets) => !rulesets.is_disjoint(&ctx.rulesets),
                Matcher::NoRuleset(rulesets) => rulesets.is_disjoint(&ctx.rulesets),
                Matcher::Category(categories) => package
                    .categories
                    .iter()
                    .any(|c| categories.contains(&c.to_lowercase())),
                Matcher::NoCategory(categories) => !package
                    .categories
                    .iter()
                    .any(|c| categories.contains(&c.to_lowercase())),
                Matcher::Maintainer(maintainers) => package
                    .maintainers
                    .iter()
                    .any(|m| maintainers.contains(&m.to_lowercase())),
                Matcher::NoMaintainer(maintainers) => !package
                    .maintainers
                    .iter()
                    .any(|m| maintainers.contains(&m.to_lowercase())),
                Matcher::WwwPart(parts) => package.homepages().any(|url| {
                    let url = url.to_lowercase();
                    parts.iter().any(|part| url.contains(part.as_str()))
                }),
                Matcher::WwwPat(regex) => package.homepages().any(|url| regex.is_match(url)),
                Matcher::SummPart(parts) => package.comment.as_ref().is_some_and(|comment| {
                    let comment = comment.to_lowercase();
                    parts.iter().any(|part| comment.contains(part.as_str()))
                }),
                Matcher::VerLonger(n) => version_components(&package.version) > *n,
                Matcher::VerCompare(ordering, or_equal, reference) => {
                    let result = compare_versions(&package.version, reference);
                    result == *ordering || (*or_equal && result == Ordering::Equal)
                }
                Matcher::Repos(range) => spread
                    .and_then(|s| s.get(&package.effname))
                    .is_some_and(|s| range.contains(s.repos)),
                Matcher::Families(range) => spread
                    .and_then(|s| s.get(&package.effname))
                    .is_some_and(|s| range.contains(s.families)),
                Matcher::Flag(flags) => package.flags.intersects(*flags),
                Matcher::NoFlag(flags) => !package.flags.intersects(*flags),
            };
            if !ok {
                return None;
            }
        }

        if match_ctx.name_groups.is_empty() {
            match_ctx.name_groups = vec![Some(package.effname.clone())];
        }
        if match_ctx.ver_groups.is_empty() {
            match_ctx.ver_groups = vec![Some(package.version.clone())];
        }

        Some(match_ctx)
    }

    /// Apply actions in order; returns warnings produced
    pub(crate) fn apply(&self, package: &mut Package, match_ctx: &MatchContext) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut pending_flavors = Vec::new();

        for action in &self.actions {
            match action {
                Action::Warning(message) => warnings.push(message.clone()),
                Action::SetFlags(flag, is_set) => package.flags.set(*flag, *is_set),
                Action::ResetFlavors => package.flavors.clear(),
                Action::AddFlavor(FlavorSource::CurrentName) => {
                    pending_flavors.push(package.effname.clone())
                }
                Action::AddFlavor(FlavorSource::Values(templates)) => {
                    for template in templates {
                        pending_flavors.push(template.expand(&match_ctx.name_groups, &mut warnings));
                    }
                }
                Action::SetName(template) => {
                    let name = template.expand(&match_ctx.name_groups, &mut warnings);
                    if name.is_empty() {
                        warnings.push(format!("setname produced an empty name for {}", package.effname));
                    } else {
                        package.effname = name;
                    }
                }
                Action::ReplaceInName(replacements) => {
                    for (from, to) in replacements {
                        package.effname = package.effname.replace(from.as_str(), to);
                    }
                }
                Action::ToLowerName => package.effname = package.effname.to_lowercase(),
                Action::SetVer(template) => {
                    package.version = template.expand(&match_ctx.ver_groups, &mut warnings);
                }
                Action::AddCategory(categories) => {
                    for category in categories {
                        if !package.categories.contains(category) {
                            package.categories.push(category.clone());
                        }
                    }
                }
            }
        }

        for flavor in pending_flavors {
            let flavor = strip_project_prefix(&flavor, &package.effname);
            if !flavor.is_empty() && !package.flavors.iter().any(|f| f == flavor) {
                package.flavors.push(flavor.to_string());
            }
        }

        warnings
    }
}

/// Drop `<effname>-` (or `_`, `.`) from the start of a flavor
fn strip_project_prefix<'a>(flavor: &'a str, effname: &str) -> &'a str {
    flavor
        .strip_prefix(effname)
        .and_then(|rest| rest.strip_prefix(['-', '_', '.']))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(flavor)
}
