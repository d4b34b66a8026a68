//! Cache-backed operations exposed to the request layer.
//!
//! An [`IngestContext`] owns everything a run needs (configuration, the
//! staleness cache and a cancellation signal). HTTP sessions are opened per
//! operation and only when the cache cannot answer.

mod resolver;
mod session;

use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

use crate::config::{Config, ConfigError, LeagueConfig};
use crate::scrape::{harvest_all, parse_page, ParseContext, UNKNOWN_ROUND};
use crate::standings;
use crate::storage::{
    CacheStats, DatabaseError, Match, Round, RoundList, StalenessCache, StandingsSnapshot,
};
use crate::util::{numeric_segment, validate_same_origin, UrlValidationError};

pub use resolver::{Resolution, ResolvedBy};
use resolver::RoundResolver;
use session::SessionSlot;

/// Round label shown when matches come from cache but the round list does
/// not name the round.
pub const CACHED_ROUND_LABEL: &str = "Krog (iz predpomn.)";
/// Round label shown when the round could not be loaded at all.
pub const UNAVAILABLE_ROUND_LABEL: &str = "Napaka pri nalaganju";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unknown league: {0}")]
    UnknownLeague(String),

    #[error("Invalid round URL: {0}")]
    InvalidRoundUrl(#[from] UrlValidationError),

    #[error("Invalid landing path for league: {0}")]
    InvalidLanding(#[from] url::ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The cache store failed; nothing this run produced can be trusted
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Where a round's matches came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundSource {
    Cache,
    Fresh,
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundMetadata {
    pub label: String,
    pub url: String,
    pub opaque_id: Option<String>,
    pub source: RoundSource,
    pub resolved_by: ResolvedBy,
    /// Unix seconds; oldest row for cached rounds
    pub fetched_at: Option<i64>,
}

/// One round's fixtures together with the round selector contents.
#[derive(Debug, Clone, Serialize)]
pub struct RoundData {
    pub matches: Vec<Match>,
    pub rounds: Vec<Round>,
    pub metadata: RoundMetadata,
}

impl RoundData {
    /// Matches grouped under their date heading, headings in order of first
    /// appearance.
    pub fn grouped_by_date(&self) -> Vec<(&str, Vec<&Match>)> {
        let mut groups: Vec<(&str, Vec<&Match>)> = Vec::new();
        for m in &self.matches {
            match groups.iter_mut().find(|(date, _)| *date == m.date_text) {
                Some((_, list)) => list.push(m),
                None => groups.push((m.date_text.as_str(), vec![m])),
            }
        }
        groups
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.metadata.source, RoundSource::Unavailable { .. })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn restamp(matches: Vec<Match>, round_url: &Url) -> Vec<Match> {
    matches
        .into_iter()
        .map(|mut m| {
            m.round_url = round_url.to_string();
            m
        })
        .collect()
}

pub struct IngestContext {
    config: Config,
    source_root: Url,
    cache: StalenessCache,
    cancel: watch::Receiver<bool>,
}

impl IngestContext {
    pub fn new(config: Config, cache: StalenessCache) -> Result<Self, IngestError> {
        let source_root = config.source_root()?;
        Ok(Self {
            config,
            source_root,
            cache,
            cancel: watch::channel(false).1,
        })
    }

    /// Harvests abort once `cancel` flips to `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cache(&self) -> &StalenessCache {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn league(&self, league: &str) -> Result<&LeagueConfig, IngestError> {
        self.config
            .leagues
            .get(league)
            .ok_or_else(|| IngestError::UnknownLeague(league.to_string()))
    }

    fn landing_url(&self, league: &LeagueConfig) -> Result<Url, IngestError> {
        Ok(self.source_root.join(&league.landing_path)?)
    }

    fn session(&self) -> SessionSlot {
        SessionSlot::new(self.source_root.clone(), self.config.fetch_policy())
    }

    // ========================================================================
    // Round data
    // ========================================================================

    /// Matches and round list for one round, cache first.
    ///
    /// Without `explicit_round_url` the league's current round is resolved.
    /// A round that cannot be fetched comes back with
    /// [`RoundSource::Unavailable`] rather than an error.
    ///
    /// # Errors
    ///
    /// - [`IngestError::UnknownLeague`] - league is not configured
    /// - [`IngestError::InvalidRoundUrl`] - explicit URL points off-site
    /// - [`IngestError::Store`] - cache store failure
    pub async fn get_round_data(
        &self,
        league: &str,
        explicit_round_url: Option<&str>,
    ) -> Result<RoundData, IngestError> {
        let league_cfg = self.league(league)?;
        let landing = self.landing_url(league_cfg)?;
        let explicit = explicit_round_url
            .map(|url| validate_same_origin(&self.source_root, url))
            .transpose()?;

        let now = now();
        let session = self.session();
        let resolver = RoundResolver {
            cache: &self.cache,
            league,
            landing: &landing,
        };
        let Resolution {
            target,
            resolved_by,
            round_list,
            landing_page,
            detection_error,
        } = resolver.resolve(explicit, &session, now).await?;

        let cached_rounds = round_list.as_ref().map(|l| l.rounds.clone());
        let metadata = |label: String, source: RoundSource, fetched_at: Option<i64>| RoundMetadata {
            label,
            url: target.to_string(),
            opaque_id: numeric_segment(&target),
            source,
            resolved_by,
            fetched_at,
        };

        if let Some(entry) = self
            .cache
            .get_round_matches(league, target.as_str(), now)
            .await?
        {
            let rounds = cached_rounds.unwrap_or_default();
            let label = rounds
                .iter()
                .find(|r| r.source_url == target.as_str())
                .map(|r| r.label.clone())
                .unwrap_or_else(|| CACHED_ROUND_LABEL.to_string());
            tracing::debug!(league = %league, round = %target, matches = entry.payload.len(), "Round served from cache");
            return Ok(RoundData {
                matches: entry.payload,
                rounds,
                metadata: metadata(label, RoundSource::Cache, Some(entry.fetched_at)),
            });
        }

        // Detection already tried (and failed) to load this very page
        if let Some(reason) = detection_error.filter(|_| target == landing) {
            return Ok(RoundData {
                matches: Vec::new(),
                rounds: cached_rounds.unwrap_or_default(),
                metadata: metadata(
                    UNAVAILABLE_ROUND_LABEL.to_string(),
                    RoundSource::Unavailable { reason },
                    None,
                ),
            });
        }

        let page = match landing_page.filter(|p| p.has_results_table || target == landing) {
            // The landing page shows the default round's fixtures
            Some(page) => page,
            None => {
                let known_label = cached_rounds
                    .as_ref()
                    .and_then(|rounds| rounds.iter().find(|r| r.source_url == target.as_str()))
                    .map(|r| r.label.as_str());
                let fetched = match session.get().await {
                    Ok(s) => s.fetch(&target).await,
                    Err(e) => Err(e),
                };
                match fetched {
                    Ok(doc) => parse_page(
                        &doc.body,
                        &ParseContext {
                            league,
                            page_url: &target,
                            known_label,
                            fetched_at: now,
                        },
                    ),
                    Err(e) => {
                        tracing::warn!(league = %league, round = %target, error = %e, "Round unavailable");
                        return Ok(RoundData {
                            matches: Vec::new(),
                            rounds: cached_rounds.unwrap_or_default(),
                            metadata: metadata(
                                UNAVAILABLE_ROUND_LABEL.to_string(),
                                RoundSource::Unavailable {
                                    reason: e.to_string(),
                                },
                                None,
                            ),
                        });
                    }
                }
            }
        };

        let rounds = match cached_rounds {
            Some(rounds) => rounds,
            None => {
                if !page.rounds.is_empty() {
                    let list = RoundList {
                        rounds: page.rounds.clone(),
                        default_round: None,
                    };
                    self.cache.put_rounds(league, &list, now).await?;
                }
                page.rounds.clone()
            }
        };

        let matches = restamp(page.matches, &target);
        if page.round_label == UNKNOWN_ROUND {
            // Rows that cannot be tied to a round would never match their
            // harvested copies
            tracing::debug!(league = %league, url = %target, "Page names no round, matches not cached");
        } else {
            self.cache.put_matches(&matches).await?;
        }
        tracing::info!(
            league = %league,
            round = %page.round_label,
            matches = matches.len(),
            skipped_rows = page.skipped_rows,
            "Round fetched"
        );

        Ok(RoundData {
            matches,
            rounds,
            metadata: metadata(page.round_label, RoundSource::Fresh, Some(now)),
        })
    }

    // ========================================================================
    // Standings
    // ========================================================================

    /// League table, cache first unless `force_refresh`.
    ///
    /// On a miss every round without fresh cached matches is harvested, the
    /// results stored, and the table rebuilt from all stored matches of the
    /// league. The table is only cached when the harvest was complete.
    pub async fn get_standings(
        &self,
        league: &str,
        force_refresh: bool,
    ) -> Result<StandingsSnapshot, IngestError> {
        let league_cfg = self.league(league)?;
        let now = now();

        if !force_refresh {
            if let Some(entry) = self.cache.get_standings(league, now).await? {
                tracing::debug!(league = %league, calculated_at = entry.fetched_at, "Standings served from cache");
                return Ok(entry.payload);
            }
        }

        let landing = self.landing_url(league_cfg)?;
        let session = self.session();
        let resolver = RoundResolver {
            cache: &self.cache,
            league,
            landing: &landing,
        };

        let cached_rounds = if force_refresh {
            None
        } else {
            self.cache.get_rounds(league, now).await?.map(|e| e.payload)
        };
        // `covered` is the round whose fixtures the seed already holds
        let (round_list, seed, covered) = match cached_rounds {
            Some(list) => (Some(list), Vec::new(), None),
            None => match resolver.detect(&session, now).await? {
                Ok((list, page)) => {
                    let default_round = list
                        .default_round
                        .as_ref()
                        .and_then(|r| Url::parse(&r.source_url).ok().map(|url| (url, r.source_url.clone())))
                        .filter(|_| page.has_results_table && page.round_label != UNKNOWN_ROUND);
                    match default_round {
                        Some((url, source_url)) => {
                            let seed = restamp(page.matches, &url);
                            (Some(list), seed, Some(source_url))
                        }
                        None => (Some(list), Vec::new(), None),
                    }
                }
                Err(reason) => {
                    tracing::warn!(league = %league, reason = %reason, "No round list available, using stored matches only");
                    (None, Vec::new(), None)
                }
            },
        };

        let mut complete = round_list.is_some();
        let mut pending: Vec<Round> = Vec::new();
        for round in round_list.map(|l| l.rounds).unwrap_or_default() {
            if covered.as_deref() == Some(round.source_url.as_str()) {
                continue;
            }
            let fresh = !force_refresh
                && self
                    .cache
                    .get_round_matches(league, &round.source_url, now)
                    .await?
                    .is_some();
            if !fresh {
                pending.push(round);
            }
        }

        if pending.is_empty() {
            self.cache.put_matches(&seed).await?;
        } else {
            match session.get().await {
                Ok(s) => {
                    let report = harvest_all(
                        s,
                        league,
                        &pending,
                        seed,
                        self.config.harvest_options(),
                        self.cancel.clone(),
                    )
                    .await;
                    self.cache.put_matches(&report.matches).await?;
                    complete &= report.is_complete();
                }
                Err(e) => {
                    tracing::warn!(league = %league, error = %e, "Could not open session for harvest");
                    self.cache.put_matches(&seed).await?;
                    complete = false;
                }
            }
        }

        let matches = self.cache.league_matches(league).await?;
        let roster: BTreeSet<String> = league_cfg
            .roster
            .iter()
            .cloned()
            .chain(self.cache.league_teams(league).await?)
            .collect();
        let roster: Vec<String> = roster.into_iter().collect();

        let snapshot = standings::snapshot(league, &roster, &matches, &league_cfg.rank_rules(), now);
        if complete {
            self.cache.put_standings(&snapshot).await?;
        } else {
            tracing::warn!(league = %league, "Harvest incomplete, standings not cached");
        }

        tracing::info!(
            league = %league,
            teams = snapshot.rows.len(),
            matches = matches.len(),
            harvested = pending.len(),
            network = session.is_open(),
            "Standings recomputed"
        );
        Ok(snapshot)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop every cached entry of a league. Returns rows removed.
    pub async fn invalidate_league_cache(&self, league: &str) -> Result<u64, IngestError> {
        self.league(league)?;
        Ok(self.cache.invalidate(league).await?)
    }

    pub async fn cache_stats(&self, league: &str) -> Result<CacheStats, IngestError> {
        self.league(league)?;
        Ok(self.cache.stats(league).await?)
    }

    /// Delete everything that is no longer fresh.
    pub async fn evict_stale(&self) -> Result<u64, IngestError> {
        Ok(self.cache.evict_stale(now()).await?)
    }
}
