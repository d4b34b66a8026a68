use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store errors. Every variant is fatal to an ingestion run: the cache is the
/// source of truth for what has already been harvested.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another matchday process appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// The store could not be reached or rejected a statement
    #[error("Cache store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// A cached JSON payload could not be encoded or decoded
    #[error("Corrupt cache payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Unavailable(err)
    }
}

// ============================================================================
// Records
// ============================================================================

/// One slate of fixtures as advertised by the round selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub label: String,
    pub source_url: String,
    pub opaque_id: Option<String>,
}

/// A played result. Unplayed fixtures carry no `Score` at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

/// Canonical fixture/result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub unique_id: String,
    pub league: String,
    pub round_label: String,
    pub round_url: String,
    /// Date heading exactly as the page printed it
    pub date_text: String,
    pub date: Option<NaiveDate>,
    pub time_text: String,
    pub home_team: String,
    pub away_team: String,
    pub score_text: String,
    pub parsed_score: Option<Score>,
    pub venue: String,
    /// Unix seconds
    pub fetched_at: i64,
}

/// Identity of a fixture across page loads, independent of league and fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub home_team: String,
    pub away_team: String,
    pub round_label: String,
    pub date_text: String,
}

impl Match {
    /// Composite primary key used by the store.
    pub fn unique_id_for(
        league: &str,
        home_team: &str,
        away_team: &str,
        round_label: &str,
        date_text: &str,
    ) -> String {
        format!("{league}_{home_team}_{away_team}_{round_label}_{date_text}")
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            round_label: self.round_label.clone(),
            date_text: self.date_text.clone(),
        }
    }

    pub fn is_played(&self) -> bool {
        self.parsed_score.is_some()
    }
}

/// Display tag attached to a standings row after sorting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankTag {
    #[default]
    None,
    Leader,
    Relegation,
}

impl RankTag {
    /// CSS class the results page uses for this tag.
    pub fn css_class(self) -> &'static str {
        match self {
            RankTag::None => "",
            RankTag::Leader => "top-place",
            RankTag::Relegation => "last-place",
        }
    }
}

/// One team's line in the league table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsRow {
    pub team: String,
    pub played: u32,
    pub won: u32,
    pub drawn: u32,
    pub lost: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    pub points: u32,
    #[serde(default)]
    pub rank_tag: RankTag,
}

impl StandingsRow {
    pub fn new(team: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            played: 0,
            won: 0,
            drawn: 0,
            lost: 0,
            goals_for: 0,
            goals_against: 0,
            points: 0,
            rank_tag: RankTag::None,
        }
    }

    pub fn goal_difference(&self) -> i64 {
        i64::from(self.goals_for) - i64::from(self.goals_against)
    }
}

/// Computed table plus the hash of the match set it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsSnapshot {
    pub league: String,
    pub rows: Vec<StandingsRow>,
    pub source_hash: String,
    /// Unix seconds
    pub calculated_at: i64,
}

/// Round list for a league together with the round the landing page defaults to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundList {
    pub rounds: Vec<Round>,
    pub default_round: Option<Round>,
}

// ============================================================================
// Cache Metadata
// ============================================================================

/// The three persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Rounds,
    RoundMatches,
    Standings,
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CacheKind::Rounds => "rounds",
            CacheKind::RoundMatches => "round_matches",
            CacheKind::Standings => "standings",
        })
    }
}

/// A cached value with the time it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub kind: CacheKind,
    pub key: String,
    pub payload: T,
    /// Unix seconds; for round matches this is the oldest row of the round
    pub fetched_at: i64,
}

/// Per-league cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub has_rounds: bool,
    pub rounds_fetched_at: Option<i64>,
    pub match_count: i64,
    pub oldest_match: Option<i64>,
    pub newest_match: Option<i64>,
    pub has_standings: bool,
    pub standings_calculated_at: Option<i64>,
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for match queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MatchDbRow {
    pub unique_id: String,
    pub league_id: String,
    pub round_label: String,
    pub round_url: String,
    pub date_text: String,
    pub match_date: Option<String>,
    pub time_text: String,
    pub home_team: String,
    pub away_team: String,
    pub score_text: String,
    pub home_goals: Option<i64>,
    pub away_goals: Option<i64>,
    pub venue: String,
    pub fetched_at: i64,
}

impl MatchDbRow {
    pub(crate) fn into_match(self) -> Match {
        let parsed_score = match (self.home_goals, self.away_goals) {
            (Some(home), Some(away)) => Some(Score {
                home: u32::try_from(home).unwrap_or(0),
                away: u32::try_from(away).unwrap_or(0),
            }),
            _ => None,
        };

        Match {
            unique_id: self.unique_id,
            league: self.league_id,
            round_label: self.round_label,
            round_url: self.round_url,
            date_text: self.date_text,
            date: self
                .match_date
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            time_text: self.time_text,
            home_team: self.home_team,
            away_team: self.away_team,
            score_text: self.score_text,
            parsed_score,
            venue: self.venue,
            fetched_at: self.fetched_at,
        }
    }
}
