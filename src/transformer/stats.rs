/// Rule match counters
///
/// Live counters are bumped for every package; the snapshot, which is what
/// reports read, is refreshed every `interval` packages and on `finish`.
/// Nothing here feeds back into rule selection.
#[derive(Debug, Clone)]
pub struct RuleStats {
    interval: u64,
    packages: u64,
    matches: Vec<u64>,
    snapshot: Snapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub packages: u64,
    pub matches: Vec<u64>,
}

impl RuleStats {
    pub fn new(rule_count: usize, interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            packages: 0,
            matches: vec![0; rule_count],
            snapshot: Snapshot {
                packages: 0,
                matches: vec![0; rule_count],
            },
        }
    }

    pub(crate) fn record_match(&mut self, rule: usize) {
        if let Some(count) = self.matches.get_mut(rule) {
            *count += 1;
        }
    }

    pub(crate) fn record_package(&mut self) {
        self.packages += 1;
        if self.packages % self.interval == 0 {
            self.take_snapshot();
        }
    }

    fn take_snapshot(&mut self) {
        self.snapshot.packages = self.packages;
        self.snapshot.matches.clone_from(&self.matches);
    }

    /// Refresh the snapshot with the final live counters
    pub fn finish(&mut self) {
        self.take_snapshot();
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Indices of rules which never matched as of the last snapshot
    pub fn unmatched_rules(&self) -> Vec<usize> {
        self.snapshot
            .matches
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(rule, _)| rule)
            .collect()
    }
}
