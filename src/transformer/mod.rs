//! Rule engine
//!
//! Rules are evaluated in declaration order against each package. A matching
//! rule applies its actions before the next rule is tried, so later rules see
//! the rewritten `effname`. A matching `last` rule stops evaluation.

mod rule;
mod stats;

pub use rule::{CountRange, PackageContext, ProjectSpread, Rule, RuleSpec};
pub use stats::{RuleStats, Snapshot};

use crate::error::{Result, UnifyError};
use crate::package::{Package, PackageFlags};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Consecutive rules shorter than this are not worth indexing
const MIN_INDEXED_BLOCK: usize = 2;

#[derive(Debug)]
enum Block {
    Single(usize),
    /// Run of rules that all carry a `name` matcher, indexed by name
    NameIndexed {
        by_name: HashMap<String, Vec<usize>>,
    },
}

/// Result of running the rules over one package
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Indices of matched rules, in evaluation order
    pub matched: Vec<usize>,
    pub warnings: Vec<String>,
}

pub struct Transformer {
    rules: Vec<Rule>,
    blocks: Vec<Block>,
    spread: Option<HashMap<String, ProjectSpread>>,
    trace_all: bool,
}

impl Transformer {
    pub fn new(rules: Vec<Rule>) -> Self {
        let blocks = build_blocks(&rules);
        Self {
            rules,
            blocks,
            spread: None,
            trace_all: false,
        }
    }

    /// Parse rules from one YAML document
    pub fn from_yaml_str(yaml: &str, source: &str) -> Result<Self> {
        let mut rules = Vec::new();
        append_rules(&mut rules, yaml, source)?;
        Ok(Self::new(rules))
    }

    /// Load rule files and directories
    ///
    /// Directories contribute their `*.yaml`/`*.yml` files recursively, in
    /// lexicographic path order.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            collect_rule_files(path.as_ref(), &mut files)?;
        }

        let mut rules = Vec::new();
        for file in &files {
            let text = fs::read_to_string(file)?;
            append_rules(&mut rules, &text, &file.display().to_string())?;
        }

        info!(files = files.len(), rules = rules.len(), "Loaded rules");
        Ok(Self::new(rules))
    }

    /// Project spread from the previous run, for `repos`/`families` rules
    pub fn with_project_spread(mut self, spread: HashMap<String, ProjectSpread>) -> Self {
        self.spread = Some(spread);
        self
    }

    /// Trace every package, not only those flagged TRACE
    pub fn with_trace(mut self, trace_all: bool) -> Self {
        self.trace_all = trace_all;
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Fresh statistics sized for this rule set
    pub fn new_stats(&self, interval: u64) -> RuleStats {
        RuleStats::new(self.rules.len(), interval)
    }

    /// Run every rule over `package`
    pub fn process(
        &self,
        package: &mut Package,
        ctx: &PackageContext,
        stats: &mut RuleStats,
    ) -> TransformOutcome {
        let mut outcome = TransformOutcome::default();
        let spread = self.spread.as_ref();

        'blocks: for block in &self.blocks {
            match block {
                Block::Single(idx) => {
                    if self.try_rule(*idx, package, ctx, spread, stats, &mut outcome) {
                        break 'blocks;
                    }
                }
                Block::NameIndexed { by_name } => {
                    // rules whose name set misses the current effname cannot
                    // match, so only candidates need evaluating
                    let mut cursor = 0;
                    loop {
                        let Some(candidates) = by_name.get(&package.effname) else {
                            break;
                        };
                        let pos = candidates.partition_point(|&idx| idx < cursor);
                        let Some(&idx) = candidates.get(pos) else {
                            break;
                        };
                        if self.try_rule(idx, package, ctx, spread, stats, &mut outcome) {
                            break 'blocks;
                        }
                        cursor = idx + 1;
                    }
                }
            }
        }

        stats.record_package();

        if self.trace_all || package.has_flag(PackageFlags::TRACE) {
            info!(
                ident = %package.ident(),
                effname = %package.effname,
                matched = ?outcome.matched,
                "Rule trace"
            );
        }

        if !package.has_flag(PackageFlags::REMOVE) {
            for warning in &outcome.warnings {
                warn!(ident = %package.ident(), "{}", warning);
            }
        }

        outcome
    }

    /// Returns true when a terminal rule matched
    fn try_rule(
        &self,
        idx: usize,
        package: &mut Package,
        ctx: &PackageContext,
        spread: Option<&HashMap<String, ProjectSpread>>,
        stats: &mut RuleStats,
        outcome: &mut TransformOutcome,
    ) -> bool {
        let rule = &self.rules[idx];
        let Some(match_ctx) = rule.matches(package, ctx, spread) else {
            return false;
        };

        outcome.warnings.extend(rule.apply(package, &match_ctx));
        outcome.matched.push(idx);
        stats.record_match(idx);

        rule.is_last()
    }

    /// Log rules that never matched, per the final statistics snapshot
    pub fn report_unmatched(&self, stats: &RuleStats) {
        let unmatched = stats.unmatched_rules();
        for idx in &unmatched {
            if let Some(rule) = self.rules.get(*idx) {
                debug!(rule = idx, source = %rule.source(), "Rule never matched");
            }
        }
        info!(
            packages = stats.snapshot().packages,
            unmatched = unmatched.len(),
            "Rule statistics"
        );
    }
}

fn append_rules(rules: &mut Vec<Rule>, yaml: &str, source: &str) -> Result<()> {
    let specs: Vec<RuleSpec> = if yaml.trim().is_empty() {
        Vec::new()
    } else {
        serde_yaml::from_str(yaml).map_err(|e| UnifyError::RuleSyntax {
            file: source.to_string(),
            message: e.to_string(),
        })?
    };

    for (n, spec) in specs.into_iter().enumerate() {
        let index = rules.len();
        rules.push(Rule::compile(spec, index, format!("{}#{}", source, n + 1))?);
    }
    Ok(())
}

fn collect_rule_files(path: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if !path.is_dir() {
        files.push(path.to_path_buf());
        return Ok(());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            collect_rule_files(&entry, files)?;
        } else if matches!(
            entry.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            files.push(entry);
        }
    }
    Ok(())
}

fn build_blocks(rules: &[Rule]) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut run: Vec<usize> = Vec::new();

    let flush = |run: &mut Vec<usize>, blocks: &mut Vec<Block>| {
        if run.len() < MIN_INDEXED_BLOCK {
            blocks.extend(run.drain(..).map(Block::Single));
            return;
        }
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for &idx in run.iter() {
            if let Some(names) = rules[idx].name_set() {
                for name in names {
                    by_name.entry(name.clone()).or_default().push(idx);
                }
            }
        }
        // indices were pushed in ascending order already
        run.clear();
        blocks.push(Block::NameIndexed { by_name });
    };

    for (idx, rule) in rules.iter().enumerate() {
        if rule.name_set().is_some() {
            run.push(idx);
        } else {
            flush(&mut run, &mut blocks);
            blocks.push(Block::Single(idx));
        }
    }
    flush(&mut run, &mut blocks);

    blocks
}
