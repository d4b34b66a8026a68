//! Utility functions shared by the scraper and the ingest layer.
//!
//! - **Text**: normalization of hostile cell text (NBSP, control chars, whitespace runs)
//! - **URLs**: link resolution against the page, same-origin validation for caller input

mod text;
mod links;

pub use self::text::{normalize_text, strip_control_chars};
pub use self::links::{numeric_segment, resolve_link, validate_same_origin, UrlValidationError};
