use super::schema::Database;
use super::types::{CacheStats, DatabaseError, StandingsRow, StandingsSnapshot};

impl Database {
    // ========================================================================
    // Standings Operations
    // ========================================================================

    /// Store a computed table, replacing the previous one for the league.
    pub async fn put_standings(&self, snapshot: &StandingsSnapshot) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(&snapshot.rows)?;

        sqlx::query(
            r#"
            INSERT INTO standings (league_id, standings_json, source_hash, last_calculated)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(league_id) DO UPDATE SET
                standings_json = excluded.standings_json,
                source_hash = excluded.source_hash,
                last_calculated = excluded.last_calculated
        "#,
        )
        .bind(&snapshot.league)
        .bind(&json)
        .bind(&snapshot.source_hash)
        .bind(snapshot.calculated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the stored table regardless of age.
    pub async fn get_standings(
        &self,
        league_id: &str,
    ) -> Result<Option<StandingsSnapshot>, DatabaseError> {
        let row: Option<(String, String, i64)> = sqlx::query_as(
            "SELECT standings_json, source_hash, last_calculated FROM standings WHERE league_id = ?",
        )
        .bind(league_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((json, source_hash, calculated_at)) = row else {
            return Ok(None);
        };
        let rows: Vec<StandingsRow> = serde_json::from_str(&json)?;

        Ok(Some(StandingsSnapshot {
            league: league_id.to_string(),
            rows,
            source_hash,
            calculated_at,
        }))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete every cached row whose league id starts with `prefix`.
    ///
    /// All three collections are cleared in one transaction. Returns the
    /// number of rows removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, DatabaseError> {
        let pattern = format!("{}%", escape_like(prefix));
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for table in ["leagues_meta", "matches", "standings"] {
            removed += sqlx::query(&format!(
                "DELETE FROM {table} WHERE league_id LIKE ? ESCAPE '\\'"
            ))
            .bind(&pattern)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Delete rows older than the given per-collection cutoffs (unix seconds).
    ///
    /// Returns the number of rows removed.
    pub async fn evict_older_than(
        &self,
        rounds_cutoff: i64,
        matches_cutoff: i64,
        standings_cutoff: i64,
    ) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for (sql, cutoff) in [
            ("DELETE FROM leagues_meta WHERE last_fetched <= ?", rounds_cutoff),
            ("DELETE FROM matches WHERE fetched_at <= ?", matches_cutoff),
            ("DELETE FROM standings WHERE last_calculated <= ?", standings_cutoff),
        ] {
            removed += sqlx::query(sql)
                .bind(cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Aggregate statistics over the cached collections of one league.
    pub async fn cache_stats(&self, league_id: &str) -> Result<CacheStats, DatabaseError> {
        let rounds: Option<(i64,)> =
            sqlx::query_as("SELECT last_fetched FROM leagues_meta WHERE league_id = ?")
                .bind(league_id)
                .fetch_optional(&self.pool)
                .await?;

        let (match_count, oldest_match, newest_match): (i64, Option<i64>, Option<i64>) =
            sqlx::query_as(
                "SELECT COUNT(*), MIN(fetched_at), MAX(fetched_at) FROM matches WHERE league_id = ?",
            )
            .bind(league_id)
            .fetch_one(&self.pool)
            .await?;

        let standings: Option<(i64,)> =
            sqlx::query_as("SELECT last_calculated FROM standings WHERE league_id = ?")
                .bind(league_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(CacheStats {
            has_rounds: rounds.is_some(),
            rounds_fetched_at: rounds.map(|(t,)| t),
            match_count,
            oldest_match,
            newest_match,
            has_standings: standings.is_some(),
            standings_calculated_at: standings.map(|(t,)| t),
        })
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
