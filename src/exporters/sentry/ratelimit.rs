use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

pub const RATE_LIMITS_HEADER: &str = "x-sentry-rate-limits";

/// Applied when the server answers 429 without saying for how long.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest delay honored from a server header.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    All,
    Error,
    Transaction,
}

impl Category {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "" => Some(Self::All),
            "error" | "default" => Some(Self::Error),
            "transaction" => Some(Self::Transaction),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Error => "error",
            Self::Transaction => "transaction",
        }
    }
}

/// Per-category deadlines before which the server asked us to stop sending.
#[derive(Debug, Clone, Default)]
pub struct RateLimits {
    deadlines: HashMap<Category, Instant>,
}

impl RateLimits {
    /// Extract rate limits from a response received at `now`.
    pub fn from_response(status: StatusCode, headers: &HeaderMap, now: Instant) -> Self {
        if let Some(raw) = headers
            .get(RATE_LIMITS_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            return Self::parse_rate_limits(raw, now);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|raw| parse_retry_after(raw, Utc::now()))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            let mut limits = Self::default();
            if let Some(deadline) = deadline_after(now, retry_after) {
                limits.deadlines.insert(Category::All, deadline);
            }
            return limits;
        }

        Self::default()
    }

    /// Parse `retry_after:categories:scope:reason, ...`. Malformed entries are skipped.
    pub fn parse_rate_limits(raw: &str, now: Instant) -> Self {
        let mut limits = Self::default();

        for entry in raw.split(',') {
            let mut parts = entry.trim().split(':');
            let Some(secs) = parts.next().and_then(|s| s.trim().parse::<f64>().ok()) else {
                continue;
            };
            let Some(deadline) = Duration::try_from_secs_f64(secs)
                .ok()
                .and_then(|delay| deadline_after(now, delay))
            else {
                continue;
            };

            let categories = parts.next().unwrap_or("");
            if categories.is_empty() {
                limits.extend(Category::All, deadline);
                continue;
            }
            for name in categories.split(';') {
                if let Some(category) = Category::parse(name.trim()) {
                    limits.extend(category, deadline);
                }
            }
        }

        limits
    }

    fn extend(&mut self, category: Category, deadline: Instant) {
        self.deadlines
            .entry(category)
            .and_modify(|d| *d = (*d).max(deadline))
            .or_insert(deadline);
    }

    /// Merge `other` into `self`, keeping the later deadline per category.
    pub fn merge(&mut self, other: RateLimits) {
        for (category, deadline) in other.deadlines {
            self.extend(category, deadline);
        }
    }

    pub fn is_limited(&self, category: Category, now: Instant) -> bool {
        let limited = |c: Category| self.deadlines.get(&c).is_some_and(|d| *d > now);
        limited(Category::All) || limited(category)
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// `now + delay`, with `delay` capped at `MAX_RETRY_AFTER`.
fn deadline_after(now: Instant, delay: Duration) -> Option<Instant> {
    now.checked_add(delay.min(MAX_RETRY_AFTER))
}

/// `Retry-After` is either delay-seconds or an HTTP date.
fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
