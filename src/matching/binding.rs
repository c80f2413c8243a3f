use std::collections::HashMap;

use crate::db::models::BindingRow;
use crate::normalizer::SourceIndex;
use crate::types::{Fixture, FixtureKey, SourceId};

/// Max counterpart league names tried per canonical league.
pub const MAX_CANDIDATES: usize = 3;

/// Why a canonical fixture could not be found in another source this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMiss {
    NoTeamMapping(SourceId),
    NoCandidates(SourceId),
    NoIndexHit(SourceId),
}

impl std::fmt::Display for MatchMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchMiss::NoTeamMapping(s) => write!(f, "no team mapping for source {s}"),
            MatchMiss::NoCandidates(s) => write!(f, "no league candidates for source {s}"),
            MatchMiss::NoIndexHit(s) => write!(f, "no candidate hit in source {s}"),
        }
    }
}

/// Name equivalences derived from the binding rows of one cycle.
#[derive(Debug, Clone, Default)]
pub struct BindingResolver {
    canonical: SourceId,
    /// counterpart source → canonical league → ordered counterpart league names
    candidates: HashMap<SourceId, HashMap<String, Vec<String>>>,
    /// counterpart source → canonical team → counterpart team
    teams: HashMap<SourceId, HashMap<String, String>>,
}

impl BindingResolver {
    pub fn from_rows(canonical: SourceId, counterparts: &[SourceId], rows: &[BindingRow]) -> Self {
        let mut candidates = HashMap::new();
        let mut teams = HashMap::new();

        for &source in counterparts.iter().filter(|&&s| s != canonical) {
            let mut counts: HashMap<String, HashMap<String, usize>> = HashMap::new();
            let mut team_map: HashMap<String, String> = HashMap::new();

            for row in rows {
                let canon = row.names(canonical);
                let other = row.names(source);
                let (Some(canon_league), Some(other_league)) = (canon.league, other.league) else {
                    continue;
                };
                *counts
                    .entry(canon_league.to_string())
                    .or_default()
                    .entry(other_league.to_string())
                    .or_default() += 1;

                for (canon_team, other_team) in [(canon.home, other.home), (canon.away, other.away)] {
                    if let (Some(c), Some(o)) = (canon_team, other_team) {
                        team_map.entry(c.to_string()).or_insert_with(|| o.to_string());
                    }
                }
            }

            let per_league = counts
                .into_iter()
                .map(|(league, c)| (league, select_candidates(&c)))
                .collect();
            candidates.insert(source, per_league);
            teams.insert(source, team_map);
        }

        Self { canonical, candidates, teams }
    }

    pub fn canonical(&self) -> SourceId {
        self.canonical
    }

    pub fn candidates(&self, source: SourceId, canonical_league: &str) -> &[String] {
        self.candidates
            .get(&source)
            .and_then(|m| m.get(canonical_league))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn counterpart_team(&self, source: SourceId, canonical_team: &str) -> Option<&str> {
        self.teams.get(&source)?.get(canonical_team).map(String::as_str)
    }

    /// Finds the fixture for `key` (canonical naming) in `index`.
    ///
    /// The canonical source is looked up directly. Other sources are probed with each league
    /// candidate in order and the first hit wins.
    pub fn probe<'a>(&self, key: &FixtureKey, index: &'a SourceIndex) -> Result<&'a Fixture, MatchMiss> {
        let source = index.source();
        if source == self.canonical {
            return index.get(key).ok_or(MatchMiss::NoIndexHit(source));
        }

        let home = self
            .counterpart_team(source, &key.home)
            .ok_or(MatchMiss::NoTeamMapping(source))?;
        let away = self
            .counterpart_team(source, &key.away)
            .ok_or(MatchMiss::NoTeamMapping(source))?;

        let candidates = self.candidates(source, &key.league);
        if candidates.is_empty() {
            return Err(MatchMiss::NoCandidates(source));
        }
        candidates
            .iter()
            .find_map(|league| index.get(&FixtureKey::new(league, home, away)))
            .ok_or(MatchMiss::NoIndexHit(source))
    }
}

/// Top counterpart league names by frequency; ties are ordered by name.
pub fn select_candidates(counts: &HashMap<String, usize>) -> Vec<String> {
    let mut ranked: Vec<(&String, usize)> = counts.iter().map(|(name, &n)| (name, n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|(name, _)| name.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::SourceIndex;
    use crate::types::QuoteBook;

    fn row(s1: (&str, &str, &str), s3: (&str, &str, &str)) -> BindingRow {
        BindingRow {
            source1_league: Some(s1.0.to_string()),
            source1_home_team: Some(s1.1.to_string()),
            source1_away_team: Some(s1.2.to_string()),
            source3_league: Some(s3.0.to_string()),
            source3_home_team: Some(s3.1.to_string()),
            source3_away_team: Some(s3.2.to_string()),
            ..Default::default()
        }
    }

    fn fixture(source: SourceId, league: &str, home: &str, away: &str) -> Fixture {
        Fixture {
            source,
            key: FixtureKey::new(league, home, away),
            start_time: None,
            event_id: None,
            line_id: None,
            league_id: None,
            quotes: QuoteBook::default(),
        }
    }

    #[test]
    fn candidates_ranked_by_count() {
        let counts = HashMap::from([("A".to_string(), 8), ("B".to_string(), 2)]);
        assert_eq!(select_candidates(&counts), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn candidates_ties_broken_by_name_and_capped() {
        let counts = HashMap::from([
            ("Zeta".to_string(), 2),
            ("Alpha".to_string(), 2),
            ("Mid".to_string(), 5),
            ("Beta".to_string(), 2),
        ]);
        assert_eq!(
            select_candidates(&counts),
            vec!["Mid".to_string(), "Alpha".to_string(), "Beta".to_string()]
        );
    }

    #[test]
    fn team_mapping_requires_counterpart_league_and_team() {
        let mut no_league = row(("", "Gunners", "Blues"), ("EPL", "Arsenal", "Chelsea"));
        no_league.source1_league = None;
        let mut no_team = row(("England 1", "", "Blues"), ("EPL", "Spurs", "Chelsea"));
        no_team.source1_home_team = Some("  ".to_string());

        let r = BindingResolver::from_rows(3, &[1, 3], &[no_league, no_team]);
        assert_eq!(r.counterpart_team(1, "Arsenal"), None);
        assert_eq!(r.counterpart_team(1, "Spurs"), None);
        assert_eq!(r.counterpart_team(1, "Chelsea"), Some("Blues"));
    }

    #[test]
    fn probe_tries_candidates_in_order() {
        let rows = vec![
            row(("England Premier", "Gunners", "Blues"), ("EPL", "Arsenal", "Chelsea")),
            row(("England Premier", "Reds", "Toffees"), ("EPL", "Liverpool", "Everton")),
            row(("ENG PL", "Gunners", "Blues"), ("EPL", "Arsenal", "Chelsea")),
        ];
        let resolver = BindingResolver::from_rows(3, &[1, 3], &rows);
        assert_eq!(resolver.candidates(1, "EPL"), ["England Premier", "ENG PL"]);

        // Only the second candidate exists in source 1 this cycle.
        let (index, _) = SourceIndex::build(1, vec![fixture(1, "ENG PL", "Gunners", "Blues")]);
        let hit = resolver
            .probe(&FixtureKey::new("EPL", "Arsenal", "Chelsea"), &index)
            .unwrap();
        assert_eq!(hit.key.league, "ENG PL");

        let miss = resolver.probe(&FixtureKey::new("EPL", "Liverpool", "Everton"), &index);
        assert_eq!(miss.unwrap_err(), MatchMiss::NoIndexHit(1));

        let unmapped = resolver.probe(&FixtureKey::new("EPL", "Arsenal", "Fulham"), &index);
        assert_eq!(unmapped.unwrap_err(), MatchMiss::NoTeamMapping(1));
    }

    #[test]
    fn canonical_source_is_keyed_directly() {
        let resolver = BindingResolver::from_rows(3, &[1, 3], &[]);
        let (index, _) = SourceIndex::build(3, vec![fixture(3, "EPL", "Arsenal", "Chelsea")]);
        let key = FixtureKey::new("EPL", "Arsenal", "Chelsea");
        assert!(resolver.probe(&key, &index).is_ok());
    }

    #[test]
    fn league_without_rows_has_no_candidates() {
        let rows = vec![row(("England Premier", "Gunners", "Blues"), ("EPL", "Arsenal", "Chelsea"))];
        let resolver = BindingResolver::from_rows(3, &[1, 3], &rows);
        let (index, _) = SourceIndex::build(1, vec![]);
        let err = resolver
            .probe(&FixtureKey::new("Serie A", "Arsenal", "Chelsea"), &index)
            .unwrap_err();
        assert_eq!(err, MatchMiss::NoCandidates(1));
    }
}
