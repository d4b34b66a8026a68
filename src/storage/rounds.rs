use super::schema::Database;
use super::types::{DatabaseError, Round, RoundList};

impl Database {
    // ========================================================================
    // Round List Operations
    // ========================================================================

    /// Store the round list for a league, replacing any previous list.
    pub async fn put_round_list(
        &self,
        league_id: &str,
        list: &RoundList,
        fetched_at: i64,
    ) -> Result<(), DatabaseError> {
        let rounds_json = serde_json::to_string(&list.rounds)?;
        let default_json = list
            .default_round
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO leagues_meta (league_id, rounds_json, default_round_json, last_fetched)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(league_id) DO UPDATE SET
                rounds_json = excluded.rounds_json,
                default_round_json = excluded.default_round_json,
                last_fetched = excluded.last_fetched
        "#,
        )
        .bind(league_id)
        .bind(&rounds_json)
        .bind(&default_json)
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the stored round list regardless of age.
    ///
    /// Returns the list and its `last_fetched` timestamp.
    pub async fn get_round_list(
        &self,
        league_id: &str,
    ) -> Result<Option<(RoundList, i64)>, DatabaseError> {
        let row: Option<(String, Option<String>, i64)> = sqlx::query_as(
            "SELECT rounds_json, default_round_json, last_fetched FROM leagues_meta WHERE league_id = ?",
        )
        .bind(league_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((rounds_json, default_json, last_fetched)) = row else {
            return Ok(None);
        };

        let rounds: Vec<Round> = serde_json::from_str(&rounds_json)?;
        let default_round: Option<Round> = default_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Some((
            RoundList {
                rounds,
                default_round,
            },
            last_fetched,
        )))
    }
}
