use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Match, MatchDbRow};

const MATCH_COLUMNS: &str = "unique_id, league_id, round_label, round_url, date_text, match_date, \
     time_text, home_team, away_team, score_text, home_goals, away_goals, venue, fetched_at";

impl Database {
    // ========================================================================
    // Match Operations
    // ========================================================================

    /// Upsert matches keyed by `unique_id`.
    ///
    /// New ids are inserted whole. An existing id only has its mutable fields
    /// (round URL, score text, parsed goals, fetched_at) replaced; descriptive
    /// columns keep their first-seen values. A fixture always belongs to the
    /// round page it was last seen on. The whole batch commits in one
    /// transaction so a concurrent reader never sees half a round.
    ///
    /// Returns the number of rows written.
    pub async fn upsert_matches(&self, matches: &[Match]) -> Result<u64, DatabaseError> {
        if matches.is_empty() {
            return Ok(0);
        }

        // 14 columns * 50 rows stays under SQLite's 999 bind limit
        const BATCH_SIZE: usize = 50;
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in matches.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new(format!("INSERT INTO matches ({MATCH_COLUMNS}) "));

            builder.push_values(chunk, |mut b, m| {
                let (home_goals, away_goals) = match m.parsed_score {
                    Some(score) => (Some(i64::from(score.home)), Some(i64::from(score.away))),
                    None => (None, None),
                };
                b.push_bind(&m.unique_id)
                    .push_bind(&m.league)
                    .push_bind(&m.round_label)
                    .push_bind(&m.round_url)
                    .push_bind(&m.date_text)
                    .push_bind(m.date.map(|d| d.format("%Y-%m-%d").to_string()))
                    .push_bind(&m.time_text)
                    .push_bind(&m.home_team)
                    .push_bind(&m.away_team)
                    .push_bind(&m.score_text)
                    .push_bind(home_goals)
                    .push_bind(away_goals)
                    .push_bind(&m.venue)
                    .push_bind(m.fetched_at);
            });

            builder.push(
                " ON CONFLICT(unique_id) DO UPDATE SET \
                 round_url = excluded.round_url, \
                 score_text = excluded.score_text, \
                 home_goals = excluded.home_goals, \
                 away_goals = excluded.away_goals, \
                 fetched_at = excluded.fetched_at",
            );

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Load every stored match of one round together with the oldest
    /// `fetched_at` among them.
    ///
    /// Both reads happen inside one transaction so the timestamp always
    /// describes the rows that are returned.
    pub async fn get_round_matches(
        &self,
        league_id: &str,
        round_url: &str,
    ) -> Result<Option<(Vec<Match>, i64)>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let (oldest,): (Option<i64>,) = sqlx::query_as(
            "SELECT MIN(fetched_at) FROM matches WHERE league_id = ? AND round_url = ?",
        )
        .bind(league_id)
        .bind(round_url)
        .fetch_one(&mut *tx)
        .await?;

        let Some(oldest) = oldest else {
            tx.commit().await?;
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, MatchDbRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE league_id = ? AND round_url = ? \
             ORDER BY match_date, time_text, unique_id"
        ))
        .bind(league_id)
        .bind(round_url)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some((
            rows.into_iter().map(MatchDbRow::into_match).collect(),
            oldest,
        )))
    }

    /// Every stored match of a league, oldest fixtures first.
    pub async fn get_league_matches(&self, league_id: &str) -> Result<Vec<Match>, DatabaseError> {
        let rows = sqlx::query_as::<_, MatchDbRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE league_id = ? \
             ORDER BY match_date, time_text, unique_id"
        ))
        .bind(league_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MatchDbRow::into_match).collect())
    }

    /// Distinct team names appearing on either side of a stored match.
    pub async fn get_league_teams(&self, league_id: &str) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT home_team AS team FROM matches WHERE league_id = ?
            UNION
            SELECT away_team AS team FROM matches WHERE league_id = ?
            ORDER BY team
        "#,
        )
        .bind(league_id)
        .bind(league_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(team,)| team).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Match, Score};
    use chrono::NaiveDate;

    fn fixture(home: &str, away: &str, score: Option<(u32, u32)>, fetched_at: i64) -> Match {
        let date_text = "Sobota, 12.10.2024".to_string();
        Match {
            unique_id: Match::unique_id_for("liga_a", home, away, "1. krog", &date_text),
            league: "liga_a".into(),
            round_label: "1. krog".into(),
            round_url: "https://x.si/r/1".into(),
            date_text,
            date: NaiveDate::from_ymd_opt(2024, 10, 12),
            time_text: "18:00".into(),
            home_team: home.into(),
            away_team: away.into(),
            score_text: score
                .map(|(h, a)| format!("{h} - {a}"))
                .unwrap_or_else(|| "N/P".into()),
            parsed_score: score.map(|(home, away)| Score { home, away }),
            venue: "Igrišče".into(),
            fetched_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_then_read_round() {
        let db = Database::open(":memory:").await.unwrap();
        let matches = vec![
            fixture("A", "B", Some((2, 1)), 100),
            fixture("C", "D", None, 90),
        ];
        assert_eq!(db.upsert_matches(&matches).await.unwrap(), 2);

        let (stored, oldest) = db
            .get_round_matches("liga_a", "https://x.si/r/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(oldest, 90);
        let ab = stored.iter().find(|m| m.home_team == "A").unwrap();
        assert_eq!(ab.parsed_score, Some(Score { home: 2, away: 1 }));
        assert_eq!(ab.date, NaiveDate::from_ymd_opt(2024, 10, 12));
        let cd = stored.iter().find(|m| m.home_team == "C").unwrap();
        assert_eq!(cd.parsed_score, None);
    }

    #[tokio::test]
    async fn test_upsert_same_id_updates_score_only() {
        let db = Database::open(":memory:").await.unwrap();
        db.upsert_matches(&[fixture("A", "B", None, 100)])
            .await
            .unwrap();

        let mut later = fixture("A", "B", Some((3, 0)), 200);
        later.venue = "Drugo igrišče".into();
        db.upsert_matches(&[later]).await.unwrap();

        let all = db.get_league_matches("liga_a").await.unwrap();
        assert_eq!(all.len(), 1, "same unique_id must not duplicate");
        assert_eq!(all[0].parsed_score, Some(Score { home: 3, away: 0 }));
        assert_eq!(all[0].score_text, "3 - 0");
        assert_eq!(all[0].fetched_at, 200);
        assert_eq!(all[0].venue, "Igrišče", "descriptive fields keep first-seen values");
    }

    #[tokio::test]
    async fn test_upsert_moves_fixture_to_latest_round_url() {
        let db = Database::open(":memory:").await.unwrap();
        let mut first = fixture("A", "B", None, 100);
        first.round_url = "https://x.si/liga-a".into();
        db.upsert_matches(&[first]).await.unwrap();

        db.upsert_matches(&[fixture("A", "B", Some((2, 0)), 200)])
            .await
            .unwrap();

        let (stored, oldest) = db
            .get_round_matches("liga_a", "https://x.si/r/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].round_url, "https://x.si/r/1");
        assert_eq!(oldest, 200);
        assert!(db
            .get_round_matches("liga_a", "https://x.si/liga-a")
            .await
            .unwrap()
            .is_none());
        assert_eq!(db.get_league_matches("liga_a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_round_is_none() {
        let db = Database::open(":memory:").await.unwrap();
        assert!(db
            .get_round_matches("liga_a", "https://x.si/r/404")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_league_teams_union() {
        let db = Database::open(":memory:").await.unwrap();
        db.upsert_matches(&[
            fixture("B", "A", Some((1, 1)), 1),
            fixture("C", "A", None, 1),
        ])
        .await
        .unwrap();

        assert_eq!(db.get_league_teams("liga_a").await.unwrap(), vec!["A", "B", "C"]);
        assert!(db.get_league_teams("liga_b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_batch_crosses_chunk_boundary() {
        let db = Database::open(":memory:").await.unwrap();
        let matches: Vec<Match> = (0..120)
            .map(|i| fixture(&format!("H{i}"), &format!("G{i}"), Some((i % 4, 1)), 10))
            .collect();
        assert_eq!(db.upsert_matches(&matches).await.unwrap(), 120);
        assert_eq!(db.get_league_matches("liga_a").await.unwrap().len(), 120);
    }
}
