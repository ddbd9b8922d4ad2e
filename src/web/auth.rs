//! Request authorization

use axum::extract::Query;
use axum::http::{header, HeaderMap, Uri};
use serde::Deserialize;

/// Decides whether a request may reach the web surface
pub trait AccessGate: Send + Sync {
    fn allows(&self, headers: &HeaderMap, uri: &Uri) -> bool;
}

/// Lets every request through
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl AccessGate for OpenAccess {
    fn allows(&self, _headers: &HeaderMap, _uri: &Uri) -> bool {
        true
    }
}

/// Shared-secret gate.
///
/// Accepts `Authorization: Bearer <token>` or a percent-encoded
/// `token=<token>` query parameter; the latter lets `<img>` and `<video>`
/// tags authenticate.
#[derive(Debug, Clone)]
pub struct TokenGate {
    token: String,
}

impl TokenGate {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        let (a, b) = (self.token.as_bytes(), candidate.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl AccessGate for TokenGate {
    fn allows(&self, headers: &HeaderMap, uri: &Uri) -> bool {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if bearer.is_some_and(|t| self.matches(t.trim())) {
            return true;
        }

        Query::<TokenQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .is_some_and(|t| self.matches(&t))
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn open_access_allows_anything() {
        assert!(OpenAccess.allows(&HeaderMap::new(), &uri("/api/logs")));
    }

    #[test]
    fn bearer_header() {
        let gate = TokenGate::new("s3cret");
        let mut headers = HeaderMap::new();
        assert!(!gate.allows(&headers, &uri("/motion_status")));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(gate.allows(&headers, &uri("/motion_status")));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(!gate.allows(&headers, &uri("/motion_status")));
    }

    #[test]
    fn query_token() {
        let gate = TokenGate::new("s3cret");
        let headers = HeaderMap::new();
        assert!(gate.allows(&headers, &uri("/video_feed?token=s3cret")));
        assert!(gate.allows(&headers, &uri("/video_feed?x=1&token=s3cret")));
        assert!(!gate.allows(&headers, &uri("/video_feed?token=s3cre")));
        assert!(!gate.allows(&headers, &uri("/video_feed?tokens3cret")));
        assert!(!gate.allows(&headers, &uri("/video_feed")));
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let gate = TokenGate::new("a&b=c d/+");
        let headers = HeaderMap::new();
        assert!(gate.allows(&headers, &uri("/video_feed?token=a%26b%3Dc%20d%2F%2B")));
        assert!(!gate.allows(&headers, &uri("/video_feed?token=a&b=c")));
    }
}
