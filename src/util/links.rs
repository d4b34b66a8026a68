use thiserror::Error;
use url::Url;

/// Errors raised when a caller-supplied link cannot be used against the source.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed, even relative to the source root.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points at a different origin than the configured source.
    #[error("Foreign origin: {0} (expected {1})")]
    ForeignOrigin(String, String),
}

/// Resolves an `href`/`value` attribute against the page it was found on.
///
/// Returns `None` for empty values, fragments-only links and anything the
/// `url` crate refuses to join.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    base.join(href).ok()
}

/// Validates a round URL handed in by a caller.
///
/// Relative links are resolved against `source_root`. Absolute links must
/// share scheme, host and port with the source, so a caller can never steer
/// the fetcher at an arbitrary host.
pub fn validate_same_origin(source_root: &Url, candidate: &str) -> Result<Url, UrlValidationError> {
    let url = source_root.join(candidate.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.origin() != source_root.origin() {
        return Err(UrlValidationError::ForeignOrigin(
            url.origin().ascii_serialization(),
            source_root.origin().ascii_serialization(),
        ));
    }

    Ok(url)
}

/// Extracts the last purely numeric path segment (`/.../587/...` → `587`).
pub fn numeric_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .last()
        .map(str::to_owned)
}
