pub mod binding;

pub use binding::{BindingResolver, MatchMiss};

use std::collections::BTreeMap;

use crate::normalizer::SourceIndex;
use crate::types::{Fixture, SourceId};

/// Per-cycle tally of why canonical fixtures were dropped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchStats {
    pub canonical_fixtures: usize,
    pub matched: usize,
    pub missing_start_time: usize,
    pub no_team_mapping: usize,
    pub no_candidates: usize,
    pub no_index_hit: usize,
    pub empty_common_set: usize,
}

impl MatchStats {
    pub fn record_miss(&mut self, miss: MatchMiss) {
        match miss {
            MatchMiss::NoTeamMapping(_) => self.no_team_mapping += 1,
            MatchMiss::NoCandidates(_) => self.no_candidates += 1,
            MatchMiss::NoIndexHit(_) => self.no_index_hit += 1,
        }
    }

    pub fn merge(&mut self, other: &MatchStats) {
        self.canonical_fixtures += other.canonical_fixtures;
        self.matched += other.matched;
        self.missing_start_time += other.missing_start_time;
        self.no_team_mapping += other.no_team_mapping;
        self.no_candidates += other.no_candidates;
        self.no_index_hit += other.no_index_hit;
        self.empty_common_set += other.empty_common_set;
    }
}

/// Locates a canonical fixture in every required source. The first missing source aborts.
pub fn resolve_fixture<'a>(
    canonical: &Fixture,
    resolver: &BindingResolver,
    indices: &'a BTreeMap<SourceId, SourceIndex>,
) -> Result<BTreeMap<SourceId, &'a Fixture>, MatchMiss> {
    let mut found = BTreeMap::new();
    for (&source, index) in indices {
        let fixture = resolver.probe(&canonical.key, index)?;
        found.insert(source, fixture);
    }
    Ok(found)
}
