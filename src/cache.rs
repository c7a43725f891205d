//! TTL cache for routing results and a provider decorator that uses it.
//!
//! The cache is an explicit object owned by whoever wraps a provider; there
//! is no process-wide memoization. Entries expire on read once older than the
//! TTL; inserts sweep expired entries at most once per TTL, and
//! `purge_expired` forces a sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DispatchConfig;
use crate::model::Point;
use crate::traits::{RouteResponse, RoutingError, RoutingProvider, TravelMatrix};

/// Coordinates are rounded to 1e-5 degrees (about a meter) for keys.
const COORD_SCALE: f64 = 100_000.0;

#[derive(Debug)]
struct Entries<K, V> {
    map: HashMap<K, (Instant, V)>,
    last_sweep: Instant,
}

impl<K, V> Entries<K, V> {
    fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.map.len();
        self.map
            .retain(|_, (inserted_at, _)| now.saturating_duration_since(*inserted_at) < ttl);
        self.last_sweep = now;
        before - self.map.len()
    }
}

/// Map with per-entry expiry. Reads skip expired entries; an insert sweeps
/// everything expired once a TTL has passed since the previous sweep.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<Entries<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Returns the value if it was inserted less than `ttl` before `now`.
    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (inserted_at, value) = entries.map.get(key)?;
        if now.saturating_duration_since(*inserted_at) < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if now.saturating_duration_since(entries.last_sweep) >= self.ttl {
            let removed = entries.sweep(now, self.ttl);
            if removed > 0 {
                debug!(removed, "expired cache entries swept");
            }
        }
        entries.map.insert(key, (now, value));
    }

    /// Drops every entry older than the TTL and returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.sweep(now, self.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner()).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner()).map.clear();
    }
}

/// A point rounded to the cache grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridPoint(i64, i64);

impl From<Point> for GridPoint {
    fn from(point: Point) -> Self {
        Self(
            (point.lat * COORD_SCALE).round() as i64,
            (point.lng * COORD_SCALE).round() as i64,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixKey {
    pub origins: Vec<GridPoint>,
    pub destinations: Vec<GridPoint>,
    pub time_bucket: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub origin: GridPoint,
    pub waypoints: Vec<GridPoint>,
    pub time_bucket: i64,
    pub optimize: bool,
}

/// Index of the departure-time bucket of the given width.
pub fn time_bucket(departure_time: DateTime<Utc>, bucket: Duration) -> i64 {
    let width = bucket.as_secs().max(1) as i64;
    departure_time.timestamp().div_euclid(width)
}

/// Wraps a provider with TTL caches for both operations. Errors pass
/// through uncached.
pub struct CachedRouter<P> {
    inner: P,
    bucket: Duration,
    matrices: TtlCache<MatrixKey, TravelMatrix>,
    routes: TtlCache<RouteKey, RouteResponse>,
}

impl<P: RoutingProvider> CachedRouter<P> {
    pub fn new(inner: P, ttl: Duration, bucket: Duration) -> Self {
        Self {
            inner,
            bucket,
            matrices: TtlCache::new(ttl),
            routes: TtlCache::new(ttl),
        }
    }

    pub fn from_config(inner: P, config: &DispatchConfig) -> Self {
        Self::new(inner, config.cache_ttl(), config.cache_time_bucket())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.matrices.purge_expired(now) + self.routes.purge_expired(now)
    }

    fn matrix_key(&self, origins: &[Point], destinations: &[Point], departure_time: DateTime<Utc>) -> MatrixKey {
        MatrixKey {
            origins: origins.iter().copied().map(GridPoint::from).collect(),
            destinations: destinations.iter().copied().map(GridPoint::from).collect(),
            time_bucket: time_bucket(departure_time, self.bucket),
        }
    }
}

#[async_trait]
impl<P: RoutingProvider> RoutingProvider for CachedRouter<P> {
    async fn get_travel_times(
        &self,
        origins: &[Point],
        destinations: &[Point],
        departure_time: DateTime<Utc>,
    ) -> Result<TravelMatrix, RoutingError> {
        let key = self.matrix_key(origins, destinations, departure_time);
        if let Some(hit) = self.matrices.get(&key) {
            debug!(origins = origins.len(), "travel matrix cache hit");
            return Ok(hit);
        }

        let matrix = self
            .inner
            .get_travel_times(origins, destinations, departure_time)
            .await?;
        self.matrices.insert(key, matrix.clone());
        Ok(matrix)
    }

    async fn get_route(
        &self,
        origin: Point,
        waypoints: &[Point],
        departure_time: DateTime<Utc>,
        optimize: bool,
    ) -> Result<RouteResponse, RoutingError> {
        let key = RouteKey {
            origin: origin.into(),
            waypoints: waypoints.iter().copied().map(GridPoint::from).collect(),
            time_bucket: time_bucket(departure_time, self.bucket),
            optimize,
        };
        if let Some(hit) = self.routes.get(&key) {
            debug!(waypoints = waypoints.len(), "route cache hit");
            return Ok(hit);
        }

        let route = self
            .inner
            .get_route(origin, waypoints, departure_time, optimize)
            .await?;
        self.routes.insert(key, route.clone());
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;
    use crate::haversine::HaversineRouter;

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert_at("a", 1, t0);

        assert_eq!(cache.get_at(&"a", t0 + Duration::from_secs(59)), Some(1));
        assert_eq!(cache.get_at(&"a", t0 + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_purge_expired() {
        let cache = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("old", 1, t0);
        cache.insert_at("new", 2, t0 + Duration::from_secs(8));

        let removed = cache.purge_expired(t0 + Duration::from_secs(12));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at(&"new", t0 + Duration::from_secs(12)), Some(2));
    }

    #[test]
    fn test_insert_sweeps_stale_entries() {
        let cache = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        for bucket in 0..5 {
            cache.insert_at(bucket, bucket, t0);
        }
        cache.insert_at(99, 99, t0 + Duration::from_secs(3));
        assert_eq!(cache.len(), 6);

        // One TTL after construction the next insert evicts the first wave.
        cache.insert_at(100, 100, t0 + Duration::from_secs(11));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&99, t0 + Duration::from_secs(11)), Some(99));
        assert_eq!(cache.get_at(&0, t0 + Duration::from_secs(11)), None);
    }

    #[test]
    fn test_time_bucket_groups_nearby_departures() {
        let bucket = Duration::from_secs(300);
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 10).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 3, 1, 12, 4, 50).unwrap();
        let c = Utc.with_ymd_and_hms(2025, 3, 1, 12, 5, 0).unwrap();
        assert_eq!(time_bucket(a, bucket), time_bucket(b, bucket));
        assert_ne!(time_bucket(a, bucket), time_bucket(c, bucket));
    }

    struct CountingRouter {
        calls: AtomicUsize,
        inner: HaversineRouter,
    }

    #[async_trait]
    impl RoutingProvider for CountingRouter {
        async fn get_travel_times(
            &self,
            origins: &[Point],
            destinations: &[Point],
            departure_time: DateTime<Utc>,
        ) -> Result<TravelMatrix, RoutingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_travel_times(origins, destinations, departure_time).await
        }

        async fn get_route(
            &self,
            _origin: Point,
            _waypoints: &[Point],
            _departure_time: DateTime<Utc>,
            _optimize: bool,
        ) -> Result<RouteResponse, RoutingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RoutingError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_cached_router_reuses_matrix_but_not_errors() {
        let router = CachedRouter::new(
            CountingRouter {
                calls: AtomicUsize::new(0),
                inner: HaversineRouter::default(),
            },
            Duration::from_secs(600),
            Duration::from_secs(300),
        );
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let origins = [Point::new(24.70, 46.68)];
        let destinations = [Point::new(24.71, 46.685)];

        let first = router.get_travel_times(&origins, &destinations, now).await.unwrap();
        let second = router.get_travel_times(&origins, &destinations, now).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(router.inner().calls.load(Ordering::SeqCst), 1);

        assert!(router.get_route(origins[0], &destinations, now, false).await.is_err());
        assert!(router.get_route(origins[0], &destinations, now, false).await.is_err());
        assert_eq!(router.inner().calls.load(Ordering::SeqCst), 3);
    }
}
