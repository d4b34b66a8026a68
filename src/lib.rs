//! Fixture and result ingestion for a hostile league results site.
//!
//! Pages are fetched through an identity-rotating, backoff-aware
//! [`scrape::Session`], parsed into canonical [`storage::Match`] records,
//! cached behind TTL-gated [`storage::StalenessCache`] reads, and folded into
//! a deterministic league table by [`standings::aggregate`].
//!
//! The request layer talks to [`ingest::IngestContext`]:
//!
//! ```ignore
//! let cache = StalenessCache::new(Database::open("matchday.db").await?, config.cache_policy());
//! let ctx = IngestContext::new(config, cache)?;
//! let round = ctx.get_round_data("liga_a", None).await?;
//! let table = ctx.get_standings("liga_a", false).await?;
//! ```

pub mod config;
pub mod ingest;
pub mod scrape;
pub mod standings;
pub mod storage;
pub mod util;

pub use config::Config;
pub use ingest::{IngestContext, IngestError, RoundData, RoundMetadata, RoundSource};
pub use standings::RankRules;
