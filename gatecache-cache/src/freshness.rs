//! Freshness classification of stored entries.

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use chrono::{DateTime, Utc};

/// Where an entry sits in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Servable as-is.
    Fresh,
    /// Servable while a refresh runs in the background.
    Stale,
    /// Must be treated as a miss.
    Expired,
}

/// Classify `entry` at `now`.
pub fn classify(entry: &CacheEntry, now: DateTime<Utc>) -> Freshness {
    if now < entry.expires_at {
        return Freshness::Fresh;
    }
    match entry.stale_until {
        Some(until) if now < until => Freshness::Stale,
        _ => Freshness::Expired,
    }
}

/// Expiry instants for an entry written at `cached_at`:
/// `(expires_at, stale_until)`.
pub fn lifetime(
    config: &CacheConfig,
    cached_at: DateTime<Utc>,
) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
    let expires_at = add(cached_at, config.ttl);
    let stale_until = config
        .stale_while_revalidate
        .map(|window| add(expires_at, window));
    (expires_at, stale_until)
}

fn add(at: DateTime<Utc>, duration: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
