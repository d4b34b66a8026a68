use futures::StreamExt;
use reqwest::redirect::Policy;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use super::identity::{Identity, IdentityPool};
use super::retry::{Classification, Decision, RetryPolicy, RetryState};

/// Why the origin's answer was not accepted as a real document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// Body contained an anti-automation interstitial signature
    ChallengeMarker(String),
    /// Status code associated with bot blocking (403/415/429/503)
    Status(u16),
    /// Body shorter than any real results page
    UndersizedBody(usize),
    /// Content-Type was not HTML
    NotHtml(String),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::ChallengeMarker(m) => write!(f, "challenge page ({m:?})"),
            BlockReason::Status(s) => write!(f, "blocking status {s}"),
            BlockReason::UndersizedBody(n) => write!(f, "undersized body ({n} bytes)"),
            BlockReason::NotHtml(ct) => write!(f, "non-HTML content type {ct:?}"),
        }
    }
}

/// Last observed cause of a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Blocked(BlockReason),
    Timeout,
    Network(String),
    ServerError(u16),
    Incomplete { expected: u64, received: usize },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Blocked(reason) => write!(f, "blocked by origin: {reason}"),
            FailureCause::Timeout => f.write_str("request timed out"),
            FailureCause::Network(e) => write!(f, "network error: {e}"),
            FailureCause::ServerError(s) => write!(f, "server error {s}"),
            FailureCause::Incomplete { expected, received } => {
                write!(f, "incomplete body ({received} of {expected} bytes)")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed or the request was malformed
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Non-retryable HTTP status (e.g. 404)
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Every attempt failed; carries the last cause
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FailureCause },
}

impl FetchError {
    /// True when the origin was still refusing us on the final attempt.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            FetchError::Exhausted {
                last: FailureCause::Blocked(_),
                ..
            }
        )
    }
}

/// Everything that shapes a single fetch sequence.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub min_body_bytes: usize,
    pub max_body_bytes: usize,
    pub challenge_markers: Vec<String>,
    pub warm_up: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(20),
            min_body_bytes: 512,
            max_body_bytes: 5 * 1024 * 1024,
            challenge_markers: vec![
                "One moment, please".to_string(),
                "cf-browser-verification".to_string(),
                "challenge-platform".to_string(),
                "Just a moment...".to_string(),
            ],
            warm_up: true,
        }
    }
}

/// A document the origin actually served.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// URL that was requested
    pub url: Url,
    /// URL after redirects
    pub final_url: Url,
    pub body: String,
    pub attempts: u32,
}

/// Outcome of one HTTP request.
enum Attempt {
    Document(RawDocument),
    Retry(FailureCause),
    Fatal(FetchError),
}

fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// HTTP session against one origin.
///
/// Holds the cookie jar filled by the warm-up request; every fetch issued
/// through the session shares it. Identity rotation state lives inside each
/// [`Session::fetch`] call and never leaks into the next one.
pub struct Session {
    client: reqwest::Client,
    root: Url,
    policy: FetchPolicy,
    identities: IdentityPool,
    warmed_up: bool,
}

impl Session {
    /// Build the client and, if enabled, perform the warm-up request.
    ///
    /// A failed warm-up is logged and otherwise ignored.
    pub async fn start(root: Url, policy: FetchPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        let mut session = Self {
            client,
            root,
            policy,
            identities: IdentityPool::default(),
            warmed_up: false,
        };

        if session.policy.warm_up {
            session.warmed_up = session.warm_up().await;
        }
        Ok(session)
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    pub fn warmed_up(&self) -> bool {
        self.warmed_up
    }

    async fn warm_up(&self) -> bool {
        let identity = self.identities.get(self.identities.random_index());
        let request = self
            .client
            .get(self.root.clone())
            .headers(identity.headers(None))
            .send();

        match tokio::time::timeout(self.policy.request_timeout, request).await {
            Ok(Ok(response)) if response.status().is_success() => {
                tracing::debug!(root = %self.root, identity = identity.label, "Warm-up request succeeded");
                true
            }
            Ok(Ok(response)) => {
                tracing::warn!(root = %self.root, status = %response.status(), "Warm-up request rejected, continuing without session");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(root = %self.root, error = %e, "Warm-up request failed, continuing without session");
                false
            }
            Err(_) => {
                tracing::warn!(root = %self.root, "Warm-up request timed out, continuing without session");
                false
            }
        }
    }

    /// Fetch one page, rotating identities and backing off between attempts.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Exhausted`] - every attempt was blocked or failed transiently
    /// - [`FetchError::HttpStatus`] - the origin answered with a non-retryable status
    /// - [`FetchError::ResponseTooLarge`] - body exceeded `max_body_bytes`
    pub async fn fetch(&self, url: &Url) -> Result<RawDocument, FetchError> {
        let started = Instant::now();
        let mut state = RetryState {
            attempt: 0,
            identity: self.identities.random_index(),
            elapsed: Duration::ZERO,
        };

        loop {
            let identity = self.identities.get(state.identity);
            state.attempt += 1;

            let cause = match self.attempt(url, identity).await {
                Attempt::Document(mut doc) => {
                    doc.attempts = state.attempt;
                    tracing::debug!(url = %url, attempts = state.attempt, bytes = doc.body.len(), "Fetched page");
                    return Ok(doc);
                }
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(cause) => cause,
            };
            state.elapsed = started.elapsed();

            let decision = self.policy.retry.decide(
                &state,
                Classification::Retryable,
                self.identities.size(),
                rand::random(),
            );
            match decision {
                Decision::RetryWith { identity, delay } => {
                    tracing::warn!(
                        url = %url,
                        attempt = state.attempt,
                        cause = %cause,
                        next_identity = self.identities.get(identity).label,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    state.identity = identity;
                }
                Decision::Succeed | Decision::Fail => {
                    tracing::warn!(url = %url, attempts = state.attempt, cause = %cause, "Fetch exhausted");
                    return Err(FetchError::Exhausted {
                        attempts: state.attempt,
                        last: cause,
                    });
                }
            }
        }
    }

    async fn attempt(&self, url: &Url, identity: &Identity) -> Attempt {
        let request = async {
            let response = self
                .client
                .get(url.clone())
                .headers(identity.headers(Some(self.root.as_str())))
                .send()
                .await?;
            let final_url = response.url().clone();
            let status = response.status();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = if status.is_success() {
                Some(read_limited_bytes(response, self.policy.max_body_bytes).await)
            } else {
                None
            };
            Ok::<_, reqwest::Error>((final_url, status, content_type, body))
        };

        let (final_url, status, content_type, body) =
            match tokio::time::timeout(self.policy.request_timeout, request).await {
                Err(_) => return Attempt::Retry(FailureCause::Timeout),
                Ok(Err(e)) if e.is_builder() => return Attempt::Fatal(FetchError::Network(e)),
                Ok(Err(e)) => return Attempt::Retry(FailureCause::Network(e.to_string())),
                Ok(Ok(parts)) => parts,
            };

        match status.as_u16() {
            403 | 415 | 429 | 503 => {
                return Attempt::Retry(FailureCause::Blocked(BlockReason::Status(status.as_u16())))
            }
            s if status.is_server_error() => return Attempt::Retry(FailureCause::ServerError(s)),
            s if !status.is_success() => return Attempt::Fatal(FetchError::HttpStatus(s)),
            _ => {}
        }

        let bytes = match body {
            Some(Ok(bytes)) => bytes,
            Some(Err(BodyError::TooLarge)) => return Attempt::Fatal(FetchError::ResponseTooLarge),
            Some(Err(BodyError::Incomplete { expected, received })) => {
                return Attempt::Retry(FailureCause::Incomplete { expected, received })
            }
            Some(Err(BodyError::Network(e))) => {
                return Attempt::Retry(FailureCause::Network(e.to_string()))
            }
            None => return Attempt::Fatal(FetchError::HttpStatus(status.as_u16())),
        };

        if let Some(ct) = content_type.filter(|ct| !ct.to_ascii_lowercase().contains("html")) {
            return Attempt::Retry(FailureCause::Blocked(BlockReason::NotHtml(ct)));
        }

        let body = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(marker) = self.detect_challenge(&body) {
            return Attempt::Retry(FailureCause::Blocked(BlockReason::ChallengeMarker(
                marker.to_string(),
            )));
        }
        if body.len() < self.policy.min_body_bytes {
            return Attempt::Retry(FailureCause::Blocked(BlockReason::UndersizedBody(
                body.len(),
            )));
        }

        Attempt::Document(RawDocument {
            url: url.clone(),
            final_url,
            body,
            attempts: 0,
        })
    }

    fn detect_challenge(&self, body: &str) -> Option<&str> {
        self.policy
            .challenge_markers
            .iter()
            .map(String::as_str)
            .find(|marker| !marker.is_empty() && body.contains(marker))
    }
}

enum BodyError {
    TooLarge,
    Incomplete { expected: u64, received: usize },
    Network(reqwest::Error),
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, BodyError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(BodyError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(BodyError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
