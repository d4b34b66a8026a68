use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};

/// One browser "identity": the headers a real client of that kind would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub label: &'static str,
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
}

const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

const BUILTIN: [Identity; 7] = [
    Identity {
        label: "chrome-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        accept: HTML_ACCEPT,
        accept_language: "sl-SI,sl;q=0.9,en-US;q=0.8,en;q=0.7",
    },
    Identity {
        label: "chrome-mac",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        accept: HTML_ACCEPT,
        accept_language: "sl,en-US;q=0.9,en;q=0.8",
    },
    Identity {
        label: "chrome-linux",
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        accept: HTML_ACCEPT,
        accept_language: "sl-SI,sl;q=0.9,en;q=0.8",
    },
    Identity {
        label: "firefox-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "sl,en-US;q=0.7,en;q=0.3",
    },
    Identity {
        label: "safari-mac",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "sl-SI,sl;q=0.9",
    },
    Identity {
        label: "edge-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
        accept: HTML_ACCEPT,
        accept_language: "sl,en;q=0.9,en-GB;q=0.8,en-US;q=0.7",
    },
    Identity {
        label: "safari-iphone",
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "sl-SI,sl;q=0.9",
    },
];

// The pool indexes modulo its size, so it must never be empty
const _: () = assert!(!BUILTIN.is_empty());

/// Rotating set of client identities spanning desktop and mobile engines.
/// Only built from the non-empty builtin set.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self {
            identities: BUILTIN.to_vec(),
        }
    }
}

impl IdentityPool {
    /// Number of identities, always at least one.
    pub fn size(&self) -> usize {
        self.identities.len()
    }

    /// Identity at `index`, wrapping around the pool.
    pub fn get(&self, index: usize) -> &Identity {
        &self.identities[index % self.identities.len()]
    }

    /// Random starting position so parallel fetch sequences don't all open
    /// with the same browser.
    pub fn random_index(&self) -> usize {
        rand::thread_rng().gen_range(0..self.identities.len())
    }
}

impl Identity {
    /// Request headers for this identity. `referer` is omitted when it is not
    /// a valid header value.
    pub fn headers(&self, referer: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(self.user_agent));
        headers.insert(ACCEPT, HeaderValue::from_static(self.accept));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(self.accept_language),
        );
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        if let Some(value) = referer.and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(REFERER, value);
        }
        headers
    }

    pub fn is_mobile(&self) -> bool {
        self.user_agent.contains("Mobile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_spans_engines_and_form_factors() {
        let pool = IdentityPool::default();
        let agents: Vec<_> = (0..pool.size()).map(|i| pool.get(i).user_agent).collect();
        assert!(agents.iter().any(|ua| ua.contains("Firefox")));
        assert!(agents.iter().any(|ua| ua.contains("Edg/")));
        assert!(agents.iter().any(|ua| ua.contains("Version/") && ua.contains("Safari")));
        assert!((0..pool.size()).any(|i| pool.get(i).is_mobile()));
        assert!((0..pool.size()).any(|i| !pool.get(i).is_mobile()));
    }

    #[test]
    fn test_get_wraps_around() {
        let pool = IdentityPool::default();
        assert_eq!(pool.get(0), pool.get(pool.size()));
        assert!(pool.random_index() < pool.size());
    }

    #[test]
    fn test_default_pool_is_never_empty() {
        let pool = IdentityPool::default();
        assert_eq!(pool.size(), BUILTIN.len());
        assert!(pool.size() > 0);
        // Any index resolves, however far past the end
        assert_eq!(pool.get(usize::MAX).label, BUILTIN[usize::MAX % BUILTIN.len()].label);
    }

    #[test]
    fn test_headers_include_referer_when_valid() {
        let identity = IdentityPool::default().get(0).to_owned();
        let headers = identity.headers(Some("https://www.lmn-radgona.si/"));
        assert_eq!(headers[REFERER], "https://www.lmn-radgona.si/");
        assert!(headers[ACCEPT_LANGUAGE].to_str().unwrap().starts_with("sl"));

        let headers = identity.headers(Some("bad\nvalue"));
        assert!(headers.get(REFERER).is_none());
    }
}
