use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use super::fetcher::{FetchError, Session};
use super::parser::{parse_page, ParseContext, ParsedPage};
use crate::storage::{DedupKey, Match, Round};

/// Worker count and overall time budget for one harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestOptions {
    pub concurrency: usize,
    pub deadline: Duration,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            deadline: Duration::from_secs(180),
        }
    }
}

/// A round whose page could not be obtained.
#[derive(Debug)]
pub struct RoundFailure {
    pub round: Round,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct HarvestReport {
    /// Seed matches plus everything harvested, deduplicated
    pub matches: Vec<Match>,
    /// Rounds whose page was fetched and parsed
    pub fetched: Vec<Round>,
    pub failures: Vec<RoundFailure>,
    /// Rounds whose page had no fixtures table
    pub empty_rounds: usize,
    pub skipped_rows: usize,
    pub duplicates: usize,
    pub cancelled: bool,
    pub timed_out: bool,
}

impl HarvestReport {
    /// True when every requested round was fetched.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled && !self.timed_out
    }
}

/// Fetch and parse every round with at most `options.concurrency` requests
/// in flight.
///
/// `seed` holds matches already obtained in this run (e.g. from the current
/// round's page); harvested rows with the same [`DedupKey`] are dropped. A
/// failing round is recorded in the report and never aborts its siblings.
///
/// The harvest stops early when `options.deadline` passes or `cancel` flips
/// to `true`. Outstanding requests are dropped at that point; whatever was
/// already collected is returned.
pub async fn harvest_all(
    session: &Session,
    league: &str,
    rounds: &[Round],
    seed: Vec<Match>,
    options: HarvestOptions,
    mut cancel: watch::Receiver<bool>,
) -> HarvestReport {
    let mut report = HarvestReport::default();
    let mut pages: Vec<(usize, Round, ParsedPage)> = Vec::with_capacity(rounds.len());

    if *cancel.borrow() {
        report.cancelled = true;
    } else if !rounds.is_empty() {
        let mut tasks = stream::iter(rounds.iter().cloned().enumerate())
            .map(|(index, round)| async move {
                let result = harvest_round(session, league, &round).await;
                (index, round, result)
            })
            .buffer_unordered(options.concurrency.max(1));

        let deadline = tokio::time::sleep(options.deadline);
        tokio::pin!(deadline);
        let mut watching = true;

        loop {
            tokio::select! {
                next = tasks.next() => match next {
                    None => break,
                    Some((index, round, Ok(page))) => pages.push((index, round, page)),
                    Some((_, round, Err(error))) => {
                        tracing::warn!(league = %league, round = %round.label, error = %error, "Round unavailable, skipping");
                        report.failures.push(RoundFailure { round, error });
                    }
                },
                _ = &mut deadline => {
                    tracing::warn!(league = %league, deadline_secs = options.deadline.as_secs(), "Harvest deadline reached, abandoning outstanding rounds");
                    report.timed_out = true;
                    break;
                }
                changed = cancel.changed(), if watching => match changed {
                    Ok(()) if *cancel.borrow() => {
                        tracing::info!(league = %league, "Harvest cancelled");
                        report.cancelled = true;
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => watching = false,
                },
            }
        }
    }

    // Merge in round order so the result does not depend on completion order
    pages.sort_by_key(|(index, _, _)| *index);

    let mut seen: HashSet<DedupKey> = HashSet::with_capacity(seed.len());
    for m in seed {
        if seen.insert(m.dedup_key()) {
            report.matches.push(m);
        }
    }
    for (_, round, page) in pages {
        if !page.has_results_table {
            report.empty_rounds += 1;
        }
        report.skipped_rows += page.skipped_rows;
        for m in page.matches {
            if seen.insert(m.dedup_key()) {
                report.matches.push(m);
            } else {
                report.duplicates += 1;
            }
        }
        report.fetched.push(round);
    }

    tracing::info!(
        league = %league,
        rounds = rounds.len(),
        fetched = report.fetched.len(),
        failed = report.failures.len(),
        matches = report.matches.len(),
        duplicates = report.duplicates,
        skipped_rows = report.skipped_rows,
        "Harvest finished"
    );
    report
}

async fn harvest_round(
    session: &Session,
    league: &str,
    round: &Round,
) -> Result<ParsedPage, FetchError> {
    let url = Url::parse(&round.source_url)?;
    let doc = session.fetch(&url).await?;
    let ctx = ParseContext {
        league,
        page_url: &url,
        known_label: Some(&round.label),
        fetched_at: chrono::Utc::now().timestamp(),
    };
    let page = parse_page(&doc.body, &ctx);
    if !page.has_results_table {
        tracing::debug!(league = %league, round = %round.label, "No fixtures table on round page");
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::{FetchPolicy, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn round_page(label: &str, home: &str, away: &str, score: &str) -> String {
        format!(
            r#"<html><body>
            <select id="select-round"><option value="/r/{label}" selected>{label}. krog</option></select>
            <table class="fixtures-results"><tbody>
            <tr class="sectiontableheader"><th>Sobota, 12.10.2024</th></tr>
            <tr class="sectiontableentry1">
                <td></td><td><abbr class="dtstart">18:00</abbr></td><td></td>
                <td><span>{home}</span></td><td></td>
                <td><a href="/m"><span class="score">{score}</span></a></td><td></td>
                <td><span>{away}</span></td><td></td><td><a href="/v">Igrišče</a></td>
            </tr>
            </tbody></table></body></html>"#
        )
    }

    fn policy() -> FetchPolicy {
        FetchPolicy {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(10),
                jitter: Duration::ZERO,
                budget: Duration::from_secs(5),
            },
            request_timeout: Duration::from_secs(30),
            min_body_bytes: 64,
            warm_up: false,
            ..FetchPolicy::default()
        }
    }

    fn rounds(server: &MockServer, labels: &[&str]) -> Vec<Round> {
        labels
            .iter()
            .map(|l| Round {
                label: format!("{l}. krog"),
                source_url: format!("{}/r/{l}", server.uri()),
                opaque_id: Some(l.to_string()),
            })
            .collect()
    }

    async fn mount_round(server: &MockServer, label: &str, home: &str, away: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/r/{label}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(round_page(label, home, away, "2 - 1"), "text/html"),
            )
            .mount(server)
            .await;
    }

    async fn session(server: &MockServer) -> Session {
        Session::start(Url::parse(&server.uri()).unwrap(), policy())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_round_does_not_abort_siblings() {
        let server = MockServer::start().await;
        mount_round(&server, "1", "A", "B").await;
        mount_round(&server, "3", "C", "D").await;
        Mock::given(path("/r/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let session = session(&server).await;
        let (_tx, rx) = watch::channel(false);
        let report = harvest_all(
            &session,
            "liga_a",
            &rounds(&server, &["1", "2", "3"]),
            Vec::new(),
            HarvestOptions::default(),
            rx,
        )
        .await;

        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.fetched.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].round.label, "2. krog");
        assert!(matches!(report.failures[0].error, FetchError::HttpStatus(404)));
        assert!(!report.is_complete());
        // Round order, not completion order
        assert_eq!(report.matches[0].home_team, "A");
        assert_eq!(report.matches[1].home_team, "C");
    }

    #[tokio::test]
    async fn test_seed_matches_are_not_duplicated() {
        let server = MockServer::start().await;
        mount_round(&server, "1", "A", "B").await;
        mount_round(&server, "2", "C", "D").await;

        let session = session(&server).await;
        let first_round = rounds(&server, &["1"]);
        let seed = harvest_all(
            &session,
            "liga_a",
            &first_round,
            Vec::new(),
            HarvestOptions::default(),
            watch::channel(false).1,
        )
        .await
        .matches;
        assert_eq!(seed.len(), 1);

        let report = harvest_all(
            &session,
            "liga_a",
            &rounds(&server, &["1", "2"]),
            seed.clone(),
            HarvestOptions::default(),
            watch::channel(false).1,
        )
        .await;

        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.duplicates, 1);
        let ids: HashSet<_> = report.matches.iter().map(|m| m.unique_id.clone()).collect();
        assert!(ids.contains(&seed[0].unique_id));
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_cancellation_stops_outstanding_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(round_page("1", "A", "B", "1 - 0"), "text/html")
                    .set_delay(Duration::from_secs(20)),
            )
            .mount(&server)
            .await;

        let session = session(&server).await;
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        let started = std::time::Instant::now();
        let report = harvest_all(
            &session,
            "liga_a",
            &rounds(&server, &["1", "2", "3"]),
            Vec::new(),
            HarvestOptions::default(),
            rx,
        )
        .await;

        assert!(report.cancelled);
        assert!(report.matches.is_empty());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_results() {
        let server = MockServer::start().await;
        mount_round(&server, "1", "A", "B").await;
        Mock::given(path("/r/2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(round_page("2", "C", "D", "0 - 0"), "text/html")
                    .set_delay(Duration::from_secs(20)),
            )
            .mount(&server)
            .await;

        let session = session(&server).await;
        let options = HarvestOptions {
            concurrency: 2,
            deadline: Duration::from_millis(500),
        };
        let report = harvest_all(
            &session,
            "liga_a",
            &rounds(&server, &["1", "2"]),
            Vec::new(),
            options,
            watch::channel(false).1,
        )
        .await;

        assert!(report.timed_out);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].home_team, "A");
    }

    /// Serves every request after `delay`, tracking how many were in flight.
    ///
    /// A request counts as in flight for `delay` after it arrived, which is
    /// exact here because every response carries that delay.
    struct InFlight {
        delay: Duration,
        body: String,
        arrivals: Arc<Mutex<Vec<Instant>>>,
        peak: Arc<AtomicUsize>,
    }

    impl Respond for InFlight {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let now = Instant::now();
            let mut arrivals = self.arrivals.lock().unwrap();
            arrivals.push(now);
            let active = arrivals
                .iter()
                .filter(|t| now.duration_since(**t) < self.delay)
                .count();
            self.peak.fetch_max(active, Ordering::SeqCst);
            ResponseTemplate::new(200)
                .set_body_raw(self.body.clone(), "text/html")
                .set_delay(self.delay)
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let server = MockServer::start().await;
        let peak = Arc::new(AtomicUsize::new(0));
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        Mock::given(method("GET"))
            .respond_with(InFlight {
                delay: Duration::from_millis(200),
                body: round_page("1", "A", "B", "1 - 0"),
                arrivals: Arc::clone(&arrivals),
                peak: Arc::clone(&peak),
            })
            .expect(6)
            .mount(&server)
            .await;

        let session = session(&server).await;
        let options = HarvestOptions {
            concurrency: 2,
            deadline: Duration::from_secs(30),
        };
        let report = harvest_all(
            &session,
            "liga_a",
            &rounds(&server, &["1", "2", "3", "4", "5", "6"]),
            Vec::new(),
            options,
            watch::channel(false).1,
        )
        .await;

        assert_eq!(report.fetched.len(), 6);
        assert!(report.is_complete());
        assert_eq!(arrivals.lock().unwrap().len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        let (_tx, rx) = watch::channel(true);
        let report = harvest_all(
            &session,
            "liga_a",
            &rounds(&server, &["1"]),
            Vec::new(),
            HarvestOptions::default(),
            rx,
        )
        .await;
        assert!(report.cancelled);
        assert!(report.fetched.is_empty());
    }
}
