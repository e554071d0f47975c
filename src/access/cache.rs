//! 대상 경로 접근 가능 여부 캐시
//!
//! 네트워크 드라이브가 많은 환경에서 매번 경로를 검사하지 않도록 결과를
//! 일정 시간 캐시하고, 검사는 5개씩 묶어서 실행합니다. 백그라운드 폴링은
//! 창이 보이는 동안에만 동작합니다.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::debounce::Debouncer;
use super::probe::{AccessProbe, PathAccessProbe};
use crate::path_validation::path_key;

#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub cache_ttl: Duration,
    pub max_cache_entries: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    /// Unforced checks closer together than this reuse the last status.
    pub min_check_interval: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub debounce_delay: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            max_cache_entries: 100,
            batch_size: 5,
            batch_delay: Duration::from_millis(100),
            min_check_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10 * 60),
            settle_delay: Duration::from_secs(1),
            debounce_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredLocation {
    pub id: String,
    pub path: String,
}

impl MonitoredLocation {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    accessible: bool,
    checked_at: Instant,
}

struct Inner<P> {
    probe: P,
    config: AccessConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    locations: Mutex<Vec<MonitoredLocation>>,
    last_check: Mutex<Option<Instant>>,
    visible_tx: watch::Sender<bool>,
    status_tx: watch::Sender<HashMap<String, bool>>,
    debouncer: Debouncer,
    shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle; clones refer to the same cache.
pub struct AccessibilityCache<P = PathAccessProbe> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for AccessibilityCache<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl AccessibilityCache {
    pub fn new() -> Self {
        Self::with_probe(PathAccessProbe::default(), AccessConfig::default())
    }
}

impl Default for AccessibilityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: AccessProbe> AccessibilityCache<P> {
    pub fn with_probe(probe: P, config: AccessConfig) -> Self {
        let (status_tx, _) = watch::channel(HashMap::new());
        let debouncer = Debouncer::new(config.debounce_delay);
        Self {
            inner: Arc::new(Inner {
                probe,
                config,
                cache: Mutex::new(HashMap::new()),
                locations: Mutex::new(Vec::new()),
                last_check: Mutex::new(None),
                visible_tx: watch::Sender::new(true),
                status_tx,
                debouncer,
                shutdown: CancellationToken::new(),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.inner.config
    }

    /// Replaces the set of locations used by refresh, force-check and polling.
    pub fn set_locations(&self, locations: Vec<MonitoredLocation>) {
        let ids: Vec<String> = locations.iter().map(|l| l.id.clone()).collect();
        *lock(&self.inner.locations) = locations;
        self.inner
            .status_tx
            .send_modify(|status| status.retain(|id, _| ids.contains(id)));
    }

    pub fn locations(&self) -> Vec<MonitoredLocation> {
        lock(&self.inner.locations).clone()
    }

    /// Current status keyed by location id.
    pub fn status(&self) -> HashMap<String, bool> {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HashMap<String, bool>> {
        self.inner.status_tx.subscribe()
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.inner.cache).len()
    }

    fn throttled(&self, locations: &[MonitoredLocation], now: Instant) -> Option<HashMap<String, bool>> {
        let last = (*lock(&self.inner.last_check))?;
        if now.duration_since(last) >= self.inner.config.min_check_interval {
            return None;
        }

        let status = self.inner.status_tx.borrow();
        let mut known = HashMap::with_capacity(locations.len());
        for location in locations {
            known.insert(location.id.clone(), *status.get(&location.id)?);
        }
        Some(known)
    }

    /// Checks `locations`, reusing fresh cache entries unless `forced`.
    /// Returns accessibility keyed by location id.
    pub async fn check(&self, locations: &[MonitoredLocation], forced: bool) -> HashMap<String, bool> {
        let now = Instant::now();
        if !forced {
            if let Some(known) = self.throttled(locations, now) {
                return known;
            }
        }

        let mut results = HashMap::with_capacity(locations.len());
        let mut to_probe = Vec::new();
        {
            let cache = lock(&self.inner.cache);
            for location in locations {
                let fresh = cache
                    .get(&path_key(&location.path))
                    .filter(|e| !forced && now.duration_since(e.checked_at) < self.inner.config.cache_ttl);
                match fresh {
                    Some(entry) => {
                        results.insert(location.id.clone(), entry.accessible);
                    }
                    None => to_probe.push(location.clone()),
                }
            }
        }

        let batch_size = self.inner.config.batch_size.max(1);
        for (index, batch) in to_probe.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inner.config.batch_delay).await;
            }

            let probes = batch.iter().map(|location| {
                let inner = self.inner.clone();
                let path = location.path.clone();
                tokio::spawn(async move { inner.probe.check(&path).await })
            });
            let outcomes = join_all(probes).await;

            let checked_at = Instant::now();
            let mut cache = lock(&self.inner.cache);
            for (location, outcome) in batch.iter().zip(outcomes) {
                let accessible = match outcome {
                    Ok(access) => access.accessible,
                    Err(e) => {
                        log::warn!("Access probe for {} failed: {}", location.path, e);
                        false
                    }
                };
                cache.insert(
                    path_key(&location.path),
                    CacheEntry {
                        accessible,
                        checked_at,
                    },
                );
                results.insert(location.id.clone(), accessible);
            }
        }

        self.evict_overflow();
        *lock(&self.inner.last_check) = Some(now);

        let published = results.clone();
        self.inner
            .status_tx
            .send_modify(|status| status.extend(published));
        results
    }

    fn evict_overflow(&self) {
        let max = self.inner.config.max_cache_entries;
        let mut cache = lock(&self.inner.cache);
        if cache.len() <= max {
            return;
        }

        let mut by_age: Vec<(String, Instant)> =
            cache.iter().map(|(k, v)| (k.clone(), v.checked_at)).collect();
        by_age.sort_by_key(|(_, checked_at)| *checked_at);
        let excess = cache.len() - max;
        for (key, _) in by_age.into_iter().take(excess) {
            cache.remove(&key);
        }
    }

    pub async fn check_current(&self, forced: bool) -> HashMap<String, bool> {
        let locations = self.locations();
        self.check(&locations, forced).await
    }

    /// Debounced forced check of the current locations.
    pub fn refresh(&self) {
        let cache = self.clone();
        self.inner.debouncer.trigger(async move {
            cache.check_current(true).await;
        });
    }

    /// Cancels a pending refresh, drops cached results for the current
    /// locations and checks them right away.
    pub async fn force_check(&self) -> HashMap<String, bool> {
        self.inner.debouncer.cancel();
        let locations = self.locations();
        {
            let mut cache = lock(&self.inner.cache);
            for location in &locations {
                cache.remove(&path_key(&location.path));
            }
        }
        self.check(&locations, true).await
    }

    pub fn is_visible(&self) -> bool {
        *self.inner.visible_tx.borrow()
    }

    pub fn set_visible(&self, visible: bool) {
        self.inner.visible_tx.send_replace(visible);
    }

    /// Window regained focus.
    pub fn on_focus(&self) {
        self.set_visible(true);
        self.refresh();
    }

    fn time_until_next_poll(&self) -> Duration {
        match *lock(&self.inner.last_check) {
            Some(last) => (last + self.inner.config.poll_interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Starts the background loop: one check after the settle delay, then a
    /// check whenever a full poll interval has passed since the last one and
    /// the window is visible.
    pub fn start_monitoring(&self) {
        let mut monitor = lock(&self.inner.monitor);
        if monitor.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let cache = self.clone();
        let token = self.inner.shutdown.clone();
        let mut visibility = self.inner.visible_tx.subscribe();
        *monitor = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(cache.inner.config.settle_delay) => {}
            }
            cache.check_current(false).await;

            loop {
                // Marks the current value seen; later changes wake `changed()`.
                let visible = *visibility.borrow_and_update();
                if !visible {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        changed = visibility.changed() => match changed {
                            Ok(()) => continue,
                            Err(_) => break,
                        },
                    }
                }

                let wait = cache.time_until_next_poll();
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = visibility.changed() => match changed {
                        Ok(()) => continue,
                        Err(_) => break,
                    },
                    _ = tokio::time::sleep(wait) => {}
                }

                if cache.is_visible() && cache.time_until_next_poll().is_zero() {
                    log::debug!("Polling accessibility of {} location(s)", cache.locations().len());
                    cache.check_current(false).await;
                }
            }
        }));
    }

    /// Stops polling and drops any pending refresh.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.debouncer.cancel();
        if let Some(handle) = lock(&self.inner.monitor).take() {
            handle.abort();
        }
    }

    /// Forgets all cached results and status.
    pub fn reset(&self) {
        self.inner.debouncer.cancel();
        lock(&self.inner.cache).clear();
        *lock(&self.inner.last_check) = None;
        self.inner.status_tx.send_modify(|status| status.clear());
    }
}
