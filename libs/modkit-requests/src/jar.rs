//! Thread-safe cookie jar shared by calls on the same transport.
//!
//! Cookies are parsed and represented with the [`cookie`] crate and stored per
//! domain. A cookie set without a `Domain` attribute is host-only: it is sent
//! back to the exact host that set it. Path matching follows RFC 6265 5.1.4.
//! `Secure` cookies are only sent over https. A cookie expires at
//! `Max-Age` after it was stored, or else at its `Expires` date.

use cookie::Cookie;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Uri};
use parking_lot::RwLock;
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
struct StoredCookie {
    cookie: Cookie<'static>,
    host_only: bool,
    expires_at: Option<OffsetDateTime>,
}

impl StoredCookie {
    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.cookie.name() == other.cookie.name() && self.cookie.path() == other.cookie.path()
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cookie storage keyed by domain.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: RwLock<HashMap<String, Vec<StoredCookie>>>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `cookies` as if they had been set by a response from `uri`.
    ///
    /// Missing `Domain` makes the cookie host-only for the URI's host; missing
    /// `Path` defaults to the directory of the URI path. A cookie that is
    /// already expired (non-positive `Max-Age`, past `Expires`) removes any
    /// stored cookie with the same name.
    pub fn set_cookies<I>(&self, uri: &Uri, cookies: I)
    where
        I: IntoIterator<Item = Cookie<'static>>,
    {
        let Some(host) = uri.host().map(str::to_ascii_lowercase) else {
            return;
        };

        let now = OffsetDateTime::now_utc();
        let mut store = self.store.write();
        for mut cookie in cookies {
            let (domain, host_only) = match cookie.domain().map(str::to_ascii_lowercase) {
                Some(domain) if domain_matches(&host, &domain) => (domain, false),
                Some(domain) => {
                    tracing::debug!(%host, %domain, name = cookie.name(), "Rejecting cookie for foreign domain");
                    continue;
                }
                None => (host.clone(), true),
            };
            if cookie.path().is_none_or(|p| !p.starts_with('/')) {
                cookie.set_path(default_path(uri));
            }
            cookie.set_domain(domain.clone());

            let expires_at = expiry(&cookie, now);
            let entry = StoredCookie {
                cookie,
                host_only,
                expires_at,
            };
            let slot = store.entry(domain).or_default();
            slot.retain(|existing| !existing.same_slot(&entry) && !existing.is_expired(now));
            if !entry.is_expired(now) {
                slot.push(entry);
            }
        }
        store.retain(|_, cookies| !cookies.is_empty());
    }

    /// Parse and store every `Set-Cookie` header of a response from `uri`.
    pub fn store_response_cookies(&self, uri: &Uri, headers: &HeaderMap) {
        let parsed = parse_set_cookies(headers);
        if !parsed.is_empty() {
            tracing::trace!(count = parsed.len(), host = ?uri.host(), "Storing response cookies");
            self.set_cookies(uri, parsed);
        }
    }

    /// Cookies that a request to `uri` should carry, longest path first.
    #[must_use]
    pub fn cookies_for(&self, uri: &Uri) -> Vec<Cookie<'static>> {
        let Some(host) = uri.host().map(str::to_ascii_lowercase) else {
            return Vec::new();
        };
        let host = host.as_str();
        let request_path = if uri.path().is_empty() { "/" } else { uri.path() };
        let secure_channel = uri.scheme_str() == Some("https");
        let now = OffsetDateTime::now_utc();

        let store = self.store.read();
        let mut matched: Vec<Cookie<'static>> = store
            .iter()
            .filter(|(domain, _)| domain_matches(host, domain))
            .flat_map(|(domain, cookies)| {
                cookies.iter().filter(move |stored| {
                    (!stored.host_only || domain == host)
                        && (secure_channel || stored.cookie.secure() != Some(true))
                        && !stored.is_expired(now)
                        && path_matches(request_path, stored.cookie.path().unwrap_or("/"))
                })
            })
            .map(|stored| stored.cookie.clone())
            .collect();
        matched.sort_by_key(|c| std::cmp::Reverse(c.path().map_or(0, str::len)));
        matched
    }

    /// `Cookie` header value for a request to `uri`, if any cookie matches.
    #[must_use]
    pub fn header_value(&self, uri: &Uri) -> Option<HeaderValue> {
        let cookies = self.cookies_for(uri);
        if cookies.is_empty() {
            return None;
        }
        let header = cookies
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ");
        match HeaderValue::from_str(&header) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build Cookie header");
                None
            }
        }
    }

    /// Add the matching cookies to `headers`, keeping any `Cookie` header already set.
    pub fn apply_to(&self, uri: &Uri, headers: &mut HeaderMap) {
        let Some(jar_value) = self.header_value(uri) else {
            return;
        };
        let merged = match headers.get(COOKIE).map(HeaderValue::as_bytes) {
            Some(existing) if !existing.is_empty() => {
                let mut combined = existing.to_vec();
                combined.extend_from_slice(b"; ");
                combined.extend_from_slice(jar_value.as_bytes());
                HeaderValue::from_bytes(&combined).unwrap_or(jar_value)
            }
            _ => jar_value,
        };
        headers.insert(COOKIE, merged);
    }

    pub fn clear(&self) {
        self.store.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse the `Set-Cookie` headers of a response, skipping malformed ones.
#[must_use]
pub fn parse_set_cookies(headers: &HeaderMap) -> Vec<Cookie<'static>> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| {
            let raw = value.to_str().ok()?;
            match Cookie::parse(raw) {
                Ok(cookie) => Some(cookie.into_owned()),
                Err(e) => {
                    tracing::warn!(header_value = %raw, error = %e, "Failed to parse Set-Cookie header");
                    None
                }
            }
        })
        .collect()
}

/// `Max-Age` wins over `Expires`; a session cookie never expires.
fn expiry(cookie: &Cookie<'_>, now: OffsetDateTime) -> Option<OffsetDateTime> {
    match cookie.max_age() {
        Some(age) => match now.checked_add(age) {
            Some(at) => Some(at),
            None if age.is_negative() => Some(now),
            None => None,
        },
        None => cookie.expires_datetime(),
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(uri: &Uri) -> String {
    let path = uri.path();
    if !path.starts_with('/') {
        return "/".to_owned();
    }
    match path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => path[..idx].to_owned(),
    }
}
