use std::time::Duration;

use super::schema::Database;
use super::types::{
    CacheEntry, CacheKind, CacheStats, DatabaseError, Match, RoundList, StandingsSnapshot,
};

/// Default TTL for round lists (7 days)
const DEFAULT_ROUNDS_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Default TTL for a round's match set (24 hours)
const DEFAULT_ROUND_MATCHES_TTL: Duration = Duration::from_secs(24 * 3600);
/// Default TTL for computed standings (6 hours)
const DEFAULT_STANDINGS_TTL: Duration = Duration::from_secs(6 * 3600);

/// TTL per cache kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub rounds: Duration,
    pub round_matches: Duration,
    pub standings: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS_TTL,
            round_matches: DEFAULT_ROUND_MATCHES_TTL,
            standings: DEFAULT_STANDINGS_TTL,
        }
    }
}

impl CachePolicy {
    pub fn ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Rounds => self.rounds,
            CacheKind::RoundMatches => self.round_matches,
            CacheKind::Standings => self.standings,
        }
    }

    /// An entry is fresh iff `now - fetched_at < ttl(kind)`.
    ///
    /// Timestamps from the future (clock skew) count as age zero.
    pub fn is_fresh(&self, kind: CacheKind, fetched_at: i64, now: i64) -> bool {
        let age = now.saturating_sub(fetched_at).max(0);
        let ttl = i64::try_from(self.ttl(kind).as_secs()).unwrap_or(i64::MAX);
        age < ttl
    }

    fn cutoff(&self, kind: CacheKind, now: i64) -> i64 {
        let ttl = i64::try_from(self.ttl(kind).as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(ttl)
    }
}

/// TTL-gated view over the store. Every read takes the caller's notion of
/// "now" so freshness decisions are reproducible.
///
/// Store failures propagate as [`DatabaseError`]; a miss is `Ok(None)`.
#[derive(Clone)]
pub struct StalenessCache {
    db: Database,
    policy: CachePolicy,
}

impl StalenessCache {
    pub fn new(db: Database, policy: CachePolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ------------------------------------------------------------------------
    // Round lists
    // ------------------------------------------------------------------------

    pub async fn get_rounds(
        &self,
        league: &str,
        now: i64,
    ) -> Result<Option<CacheEntry<RoundList>>, DatabaseError> {
        let Some((list, fetched_at)) = self.db.get_round_list(league).await? else {
            tracing::debug!(league = %league, kind = %CacheKind::Rounds, "Cache miss (absent)");
            return Ok(None);
        };

        if !self.policy.is_fresh(CacheKind::Rounds, fetched_at, now) {
            tracing::debug!(league = %league, kind = %CacheKind::Rounds, fetched_at, "Cache miss (stale)");
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            kind: CacheKind::Rounds,
            key: league.to_string(),
            payload: list,
            fetched_at,
        }))
    }

    pub async fn put_rounds(
        &self,
        league: &str,
        list: &RoundList,
        fetched_at: i64,
    ) -> Result<(), DatabaseError> {
        self.db.put_round_list(league, list, fetched_at).await?;
        tracing::debug!(league = %league, rounds = list.rounds.len(), "Cached round list");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Round matches
    // ------------------------------------------------------------------------

    /// Cached matches for one round.
    ///
    /// Freshness is judged on the oldest row of the round: a single stale
    /// row makes the whole round a miss, never a partially stale mix.
    pub async fn get_round_matches(
        &self,
        league: &str,
        round_url: &str,
        now: i64,
    ) -> Result<Option<CacheEntry<Vec<Match>>>, DatabaseError> {
        let Some((matches, oldest)) = self.db.get_round_matches(league, round_url).await? else {
            tracing::debug!(league = %league, round_url = %round_url, "Round cache miss (absent)");
            return Ok(None);
        };

        if !self.policy.is_fresh(CacheKind::RoundMatches, oldest, now) {
            tracing::debug!(
                league = %league,
                round_url = %round_url,
                oldest,
                "Round cache miss (stale)"
            );
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            kind: CacheKind::RoundMatches,
            key: format!("{league}|{round_url}"),
            payload: matches,
            fetched_at: oldest,
        }))
    }

    /// Upsert a batch of matches (any mix of rounds). Returns rows written.
    pub async fn put_matches(&self, matches: &[Match]) -> Result<u64, DatabaseError> {
        let written = self.db.upsert_matches(matches).await?;
        tracing::debug!(written, "Cached matches");
        Ok(written)
    }

    /// Every stored match of a league, fresh or not.
    pub async fn league_matches(&self, league: &str) -> Result<Vec<Match>, DatabaseError> {
        self.db.get_league_matches(league).await
    }

    pub async fn league_teams(&self, league: &str) -> Result<Vec<String>, DatabaseError> {
        self.db.get_league_teams(league).await
    }

    // ------------------------------------------------------------------------
    // Standings
    // ------------------------------------------------------------------------

    pub async fn get_standings(
        &self,
        league: &str,
        now: i64,
    ) -> Result<Option<CacheEntry<StandingsSnapshot>>, DatabaseError> {
        let Some(snapshot) = self.db.get_standings(league).await? else {
            return Ok(None);
        };

        if !self
            .policy
            .is_fresh(CacheKind::Standings, snapshot.calculated_at, now)
        {
            tracing::debug!(league = %league, calculated_at = snapshot.calculated_at, "Standings cache stale");
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            kind: CacheKind::Standings,
            key: league.to_string(),
            fetched_at: snapshot.calculated_at,
            payload: snapshot,
        }))
    }

    pub async fn put_standings(&self, snapshot: &StandingsSnapshot) -> Result<(), DatabaseError> {
        self.db.put_standings(snapshot).await
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Drop every entry whose key starts with `key_prefix` (a league id or a
    /// prefix of one).
    pub async fn invalidate(&self, key_prefix: &str) -> Result<u64, DatabaseError> {
        let removed = self.db.invalidate_prefix(key_prefix).await?;
        tracing::info!(prefix = %key_prefix, removed, "Invalidated cache entries");
        Ok(removed)
    }

    /// Delete every entry that is no longer fresh at `now`.
    pub async fn evict_stale(&self, now: i64) -> Result<u64, DatabaseError> {
        self.db
            .evict_older_than(
                self.policy.cutoff(CacheKind::Rounds, now),
                self.policy.cutoff(CacheKind::RoundMatches, now),
                self.policy.cutoff(CacheKind::Standings, now),
            )
            .await
    }

    pub async fn stats(&self, league: &str) -> Result<CacheStats, DatabaseError> {
        self.db.cache_stats(league).await
    }
}
