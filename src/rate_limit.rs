//! Tracks per-category cooldowns parsed from server responses.
//!
//! The header grammar mirrors Relay's `X-Sentry-Rate-Limits`
//! (`retry_after:categories:scope:reason`, comma-separated rules), adapted
//! to a client-side registry keyed purely on [`DataCategory`] — this core has
//! no notion of organization/project scope, so the `scope` field is parsed
//! and discarded.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::category::DataCategory;

pub const RATE_LIMITS_HEADER: &str = "x-sentry-rate-limits";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Sentinel key for a rate limit that applies to every category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Scope {
    Category(DataCategory),
    All,
}

/// Tracks `category -> retry_until` (and a wildcard `all` entry), answering
/// `is_limited` against a caller-supplied `now` so tests can move the clock
/// without sleeping.
#[derive(Debug, Default)]
pub struct RateLimitRegistry {
    entries: RwLock<HashMap<Scope, Instant>>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        RateLimitRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// `true` iff `now` is still before the retry time recorded for
    /// `category`, or before the wildcard `all` entry's retry time.
    pub fn is_limited(&self, category: DataCategory, now: Instant) -> bool {
        let entries = self.entries.read();
        if let Some(until) = entries.get(&Scope::All) {
            if now < *until {
                return true;
            }
        }
        match entries.get(&Scope::Category(category)) {
            Some(until) => now < *until,
            None => false,
        }
    }

    /// Updates (or inserts) the retry time for each of `categories`. An empty
    /// slice means "all categories" (the wildcard entry). Latest expiry wins:
    /// an earlier, still-active entry is only replaced if the new one is
    /// later.
    pub fn update(&self, categories: &[DataCategory], retry_until: Instant) {
        let mut entries = self.entries.write();
        if categories.is_empty() {
            update_if_later(&mut entries, Scope::All, retry_until);
        } else {
            for category in categories {
                update_if_later(&mut entries, Scope::Category(*category), retry_until);
            }
        }
    }

    /// Parses an `X-Sentry-Rate-Limits` header value (or, failing that, a
    /// generic 429 with `Retry-After` or neither) and updates the registry.
    pub fn update_from_headers(&self, headers: &ResponseHeaders<'_>, now: Instant) {
        if let Some(value) = headers.get(RATE_LIMITS_HEADER) {
            self.apply_rate_limits_header(value, now);
            return;
        }

        if headers.status_is_429() {
            if let Some(retry_after) = headers.get(RETRY_AFTER_HEADER) {
                let delay = parse_retry_after(retry_after).unwrap_or(DEFAULT_RETRY_AFTER);
                self.update(&[], now + delay);
            } else {
                self.update(&[], now + DEFAULT_RETRY_AFTER);
            }
        }
    }

    fn apply_rate_limits_header(&self, value: &str, now: Instant) {
        for rule in value.split(',') {
            let rule = rule.trim();
            if rule.is_empty() {
                continue;
            }

            let mut fields = rule.split(':');
            let retry_after_secs: u64 = match fields.next().and_then(|s| s.parse().ok()) {
                Some(v) => v,
                None => continue,
            };

            let categories: Vec<DataCategory> = fields
                .next()
                .unwrap_or("")
                .split([':', ';', ','])
                .filter(|s| !s.is_empty())
                .filter_map(DataCategory::from_name)
                .collect();

            // Remaining fields (scope, reason) are intentionally ignored.
            self.update(&categories, now + Duration::from_secs(retry_after_secs));
        }
    }
}

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

fn update_if_later(entries: &mut HashMap<Scope, Instant>, scope: Scope, retry_until: Instant) {
    entries
        .entry(scope)
        .and_modify(|existing| {
            if retry_until > *existing {
                *existing = retry_until;
            }
        })
        .or_insert(retry_until);
}

/// Parses a `Retry-After` value, which is either an integer number of
/// seconds or an RFC-1123 date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<f64>() {
        return Some(Duration::from_secs_f64(secs.max(0.0)));
    }

    let when = httpdate::parse_http_date(value.trim()).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}

/// A minimal response-header view so `update_from_headers` does not need to
/// depend on any particular HTTP client's header map type.
pub struct ResponseHeaders<'a> {
    status: u16,
    get: Box<dyn Fn(&str) -> Option<&'a str> + 'a>,
}

impl<'a> ResponseHeaders<'a> {
    pub fn new(status: u16, get: impl Fn(&str) -> Option<&'a str> + 'a) -> Self {
        ResponseHeaders {
            status,
            get: Box::new(get),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        (self.get)(key)
    }

    fn status_is_429(&self) -> bool {
        self.status == 429
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn headers_from(status: u16, pairs: &[(&'static str, &'static str)]) -> ResponseHeaders<'static> {
        let map: StdHashMap<&'static str, &'static str> = pairs.iter().copied().collect();
        ResponseHeaders::new(status, move |key| map.get(key).copied())
    }

    #[test]
    fn unlimited_by_default() {
        let registry = RateLimitRegistry::new();
        assert!(!registry.is_limited(DataCategory::Error, Instant::now()));
    }

    #[test]
    fn s3_rate_limit_window() {
        let registry = RateLimitRegistry::new();
        let now = Instant::now();
        let headers = headers_from(
            429,
            &[(RATE_LIMITS_HEADER, "60:error:organization:quota_exceeded")],
        );
        registry.update_from_headers(&headers, now);

        assert!(registry.is_limited(DataCategory::Error, now + Duration::from_secs(30)));
        assert!(!registry.is_limited(DataCategory::Error, now + Duration::from_secs(61)));
        assert!(!registry.is_limited(DataCategory::Transaction, now + Duration::from_secs(30)));
    }

    #[test]
    fn empty_categories_means_wildcard() {
        let registry = RateLimitRegistry::new();
        let now = Instant::now();
        registry.apply_rate_limits_header("30::organization", now);

        assert!(registry.is_limited(DataCategory::Error, now + Duration::from_secs(10)));
        assert!(registry.is_limited(DataCategory::Session, now + Duration::from_secs(10)));
    }

    #[test]
    fn latest_expiry_wins() {
        let registry = RateLimitRegistry::new();
        let now = Instant::now();
        registry.update(&[DataCategory::Error], now + Duration::from_secs(10));
        registry.update(&[DataCategory::Error], now + Duration::from_secs(5));

        // The longer of the two cooldowns must still be in effect.
        assert!(registry.is_limited(DataCategory::Error, now + Duration::from_secs(7)));
    }

    #[test]
    fn generic_429_without_header_applies_default_cooldown() {
        let registry = RateLimitRegistry::new();
        let now = Instant::now();
        let headers = headers_from(429, &[]);
        registry.update_from_headers(&headers, now);

        assert!(registry.is_limited(DataCategory::Error, now + Duration::from_secs(59)));
        assert!(!registry.is_limited(DataCategory::Error, now + Duration::from_secs(61)));
    }

    #[test]
    fn retry_after_integer_seconds() {
        let registry = RateLimitRegistry::new();
        let now = Instant::now();
        let headers = headers_from(429, &[(RETRY_AFTER_HEADER, "5")]);
        registry.update_from_headers(&headers, now);

        assert!(registry.is_limited(DataCategory::Error, now + Duration::from_secs(4)));
        assert!(!registry.is_limited(DataCategory::Error, now + Duration::from_secs(6)));
    }

    #[test]
    fn idempotent_update_from_same_header_and_now() {
        let registry = RateLimitRegistry::new();
        let now = Instant::now();
        let headers = headers_from(429, &[(RATE_LIMITS_HEADER, "60:error:organization:q")]);

        registry.update_from_headers(&headers, now);
        let first = registry.is_limited(DataCategory::Error, now + Duration::from_secs(30));
        registry.update_from_headers(&headers, now);
        let second = registry.is_limited(DataCategory::Error, now + Duration::from_secs(30));

        assert_eq!(first, second);
        assert!(first);
    }
}
