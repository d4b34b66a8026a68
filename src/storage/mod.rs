//! Persistent store and the staleness cache built on top of it.
//!
//! Three logical collections are kept per league: the round list, match
//! records keyed by `unique_id`, and the last computed standings table.

mod cache;
mod matches;
mod rounds;
mod schema;
mod standings;
mod types;

pub use cache::{CachePolicy, StalenessCache};
pub use schema::Database;
pub use types::{
    CacheEntry, CacheKind, CacheStats, DatabaseError, DedupKey, Match, RankTag, Round, RoundList,
    Score, StandingsRow, StandingsSnapshot,
};
