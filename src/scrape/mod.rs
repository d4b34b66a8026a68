//! Talking to the upstream results site.
//!
//! - `fetcher` - one adversarial-resilient page fetch per call, sharing a
//!   warmed-up [`Session`]
//! - `retry` - the pure backoff/rotation state machine the fetcher drives
//! - `parser` - round selector and fixtures table extraction
//! - `harvest` - bounded concurrent fetch+parse over every round

mod fetcher;
mod harvest;
mod identity;
mod parser;
mod retry;

pub use fetcher::{BlockReason, FailureCause, FetchError, FetchPolicy, RawDocument, Session};
pub use harvest::{harvest_all, HarvestOptions, HarvestReport, RoundFailure};
pub use identity::{Identity, IdentityPool};
pub use parser::{
    parse_date, parse_page, parse_score, ParseContext, ParsedPage, NOT_PLAYED, UNDATED,
    UNKNOWN_ROUND,
};
pub use retry::{Classification, Decision, RetryPolicy, RetryState};
