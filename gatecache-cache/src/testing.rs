//! In-process stand-ins for the distributed tier.
//!
//! [`InMemoryTier`] behaves like a Redis shared by several gateway
//! instances and can be switched off to simulate an outage.
//! [`FailingTier`] fails every call.

use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheStore, CounterStore, LeaseStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    entries: HashMap<String, (String, Option<Instant>)>,
    leases: HashMap<String, (String, Instant)>,
    counters: HashMap<String, i64>,
}

/// Shared in-memory distributed tier.
pub struct InMemoryTier {
    state: Mutex<State>,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl Default for InMemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the tier going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether an unexpired entry is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|(_, expires)| expires.is_none_or(|at| now < at))
    }

    /// Whether a live lease exists for `key`.
    pub fn lease_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .leases
            .get(key)
            .is_some_and(|(_, expires)| now < *expires)
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.state.lock().counters.get(name).copied().unwrap_or(0)
    }

    fn check(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Connection("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryTier {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            Some((_, Some(at))) if now >= *at => true,
            Some((value, _)) => return Ok(Some(value.clone())),
            None => return Ok(None),
        };
        if expired {
            state.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.state
            .lock()
            .entries
            .insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        Ok(self.state.lock().entries.remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.check()?;
        let mut state = self.state.lock();
        let keys: Vec<String> = state
            .entries
            .keys()
            .filter(|key| key.contains(pattern))
            .cloned()
            .collect();
        for key in &keys {
            state.entries.remove(key);
        }
        Ok(keys)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.check()?;
        self.state.lock().entries.clear();
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "in-memory-distributed"
    }
}

#[async_trait]
impl LeaseStore for InMemoryTier {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.leases.get(key).is_some_and(|(_, at)| now < *at) {
            return Ok(false);
        }
        state
            .leases
            .insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> CacheResult<bool> {
        self.check()?;
        let mut state = self.state.lock();
        if state.leases.get(key).is_some_and(|(held, _)| held == token) {
            state.leases.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl CounterStore for InMemoryTier {
    async fn incr_counter(&self, name: &str) -> CacheResult<i64> {
        self.check()?;
        let mut state = self.state.lock();
        let value = state.counters.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn read_counters(&self, names: &[&str]) -> CacheResult<Vec<i64>> {
        self.check()?;
        let state = self.state.lock();
        Ok(names
            .iter()
            .map(|name| state.counters.get(*name).copied().unwrap_or(0))
            .collect())
    }

    async fn reset_counters(&self, names: &[&str]) -> CacheResult<()> {
        self.check()?;
        let mut state = self.state.lock();
        for name in names {
            state.counters.remove(*name);
        }
        Ok(())
    }
}

/// A distributed tier whose every call fails.
#[derive(Default)]
pub struct FailingTier {
    calls: AtomicUsize,
}

impl FailingTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Timeout)
    }
}

#[async_trait]
impl CacheStore for FailingTier {
    async fn get_json(&self, _key: &str) -> CacheResult<Option<String>> {
        self.fail()
    }

    async fn set_json(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> CacheResult<()> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn delete_matching(&self, _pattern: &str) -> CacheResult<Vec<String>> {
        self.fail()
    }

    async fn clear(&self) -> CacheResult<()> {
        self.fail()
    }

    fn store_type(&self) -> &'static str {
        "failing"
    }
}

#[async_trait]
impl LeaseStore for FailingTier {
    async fn try_acquire(&self, _key: &str, _token: &str, _ttl: Duration) -> CacheResult<bool> {
        self.fail()
    }

    async fn release(&self, _key: &str, _token: &str) -> CacheResult<bool> {
        self.fail()
    }
}

#[async_trait]
impl CounterStore for FailingTier {
    async fn incr_counter(&self, _name: &str) -> CacheResult<i64> {
        self.fail()
    }

    async fn read_counters(&self, _names: &[&str]) -> CacheResult<Vec<i64>> {
        self.fail()
    }

    async fn reset_counters(&self, _names: &[&str]) -> CacheResult<()> {
        self.fail()
    }
}
