//! League table computation.
//!
//! The table is rebuilt from scratch on every pass: roster seeding, one fold
//! over played matches, one sort with a composite comparator, then rank tags
//! assigned from final positions.
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::storage::{Match, RankTag, StandingsRow, StandingsSnapshot};

const POINTS_WIN: u32 = 3;
const POINTS_DRAW: u32 = 1;

/// Which positions get highlighted in a league's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankRules {
    /// Rows `0..leader_count` are tagged [`RankTag::Leader`]
    pub leader_count: usize,
    /// The last `relegation_count` rows are tagged [`RankTag::Relegation`]
    pub relegation_count: usize,
    /// Relegation tags are only applied to tables at least this long
    pub relegation_min_teams: usize,
}

impl Default for RankRules {
    fn default() -> Self {
        Self {
            leader_count: 1,
            relegation_count: 0,
            relegation_min_teams: 3,
        }
    }
}

impl RankRules {
    /// Tag for position `index` (0-based) in a table of `len` rows.
    ///
    /// Leader positions win over relegation ones, so a short table is never
    /// double-tagged.
    pub fn tag_for(&self, index: usize, len: usize) -> RankTag {
        if index < self.leader_count {
            return RankTag::Leader;
        }
        if len >= self.relegation_min_teams && index + self.relegation_count >= len {
            return RankTag::Relegation;
        }
        RankTag::None
    }
}

/// Total order used for the table: points, goal difference and goals for
/// (all descending), then team name ascending.
pub fn compare_rows(a: &StandingsRow, b: &StandingsRow) -> Ordering {
    b.points
        .cmp(&a.points)
        .then_with(|| b.goal_difference().cmp(&a.goal_difference()))
        .then_with(|| b.goals_for.cmp(&a.goals_for))
        .then_with(|| a.team.cmp(&b.team))
}

/// Compute the sorted table for one league.
///
/// Every roster team appears even without a played match. Matches without a
/// parsed score are ignored.
pub fn aggregate<S: AsRef<str>>(roster: &[S], matches: &[Match], rules: &RankRules) -> Vec<StandingsRow> {
    let mut table: HashMap<String, StandingsRow> = roster
        .iter()
        .map(|team| team.as_ref().trim())
        .filter(|team| !team.is_empty())
        .map(|team| (team.to_string(), StandingsRow::new(team)))
        .collect();

    for m in matches {
        let Some(score) = m.parsed_score else {
            continue;
        };

        let home = table
            .entry(m.home_team.clone())
            .or_insert_with(|| StandingsRow::new(m.home_team.as_str()));
        record(home, score.home, score.away);

        let away = table
            .entry(m.away_team.clone())
            .or_insert_with(|| StandingsRow::new(m.away_team.as_str()));
        record(away, score.away, score.home);
    }

    let mut rows: Vec<StandingsRow> = table.into_values().collect();
    rows.sort_by(compare_rows);

    let len = rows.len();
    for (index, row) in rows.iter_mut().enumerate() {
        row.rank_tag = rules.tag_for(index, len);
    }
    rows
}

fn record(row: &mut StandingsRow, scored: u32, conceded: u32) {
    row.played += 1;
    row.goals_for += scored;
    row.goals_against += conceded;
    match scored.cmp(&conceded) {
        Ordering::Greater => {
            row.won += 1;
            row.points += POINTS_WIN;
        }
        Ordering::Equal => {
            row.drawn += 1;
            row.points += POINTS_DRAW;
        }
        Ordering::Less => row.lost += 1,
    }
}

/// SHA-256 over the sorted `unique_id`/score pairs of a match set.
///
/// Input order does not affect the result.
pub fn source_hash(matches: &[Match]) -> String {
    let mut keys: Vec<(&str, &str)> = matches
        .iter()
        .map(|m| (m.unique_id.as_str(), m.score_text.as_str()))
        .collect();
    keys.sort_unstable();

    let mut hasher = Sha256::new();
    for (id, score) in keys {
        hasher.update(id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(score.as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Aggregate and wrap the result with its provenance.
pub fn snapshot<S: AsRef<str>>(
    league: &str,
    roster: &[S],
    matches: &[Match],
    rules: &RankRules,
    calculated_at: i64,
) -> StandingsSnapshot {
    let rows = aggregate(roster, matches, rules);
    tracing::debug!(league = %league, teams = rows.len(), matches = matches.len(), "Computed standings");
    StandingsSnapshot {
        league: league.to_string(),
        rows,
        source_hash: source_hash(matches),
        calculated_at,
    }
}
