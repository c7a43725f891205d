//! Deterministic routing provider with call counting and failure injection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use courier_dispatch::haversine::HaversineRouter;
use courier_dispatch::model::Point;
use courier_dispatch::traits::{RouteResponse, RoutingError, RoutingProvider, TravelMatrix};

/// Haversine-backed provider whose behavior is fixed at construction.
pub struct ScriptedRouter {
    matrix_router: HaversineRouter,
    route_router: HaversineRouter,
    fail_matrix: bool,
    fail_all_routes: bool,
    fail_routes_from: Vec<Point>,
    matrix_minutes: Vec<(Point, f64)>,
    reverse_waypoints: bool,
    leg_minutes: Option<f64>,
    delay: Option<Duration>,
    matrix_calls: AtomicUsize,
    route_calls: AtomicUsize,
}

impl Default for ScriptedRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRouter {
    pub fn new() -> Self {
        Self {
            matrix_router: HaversineRouter::new(25.0),
            route_router: HaversineRouter::new(25.0),
            fail_matrix: false,
            fail_all_routes: false,
            fail_routes_from: Vec::new(),
            matrix_minutes: Vec::new(),
            reverse_waypoints: false,
            leg_minutes: None,
            delay: None,
            matrix_calls: AtomicUsize::new(0),
            route_calls: AtomicUsize::new(0),
        }
    }

    /// Every matrix call fails with a timeout.
    pub fn failing_matrix(mut self) -> Self {
        self.fail_matrix = true;
        self
    }

    /// Every route call fails with a timeout.
    pub fn failing_routes(mut self) -> Self {
        self.fail_all_routes = true;
        self
    }

    /// Route calls starting at `origin` fail with a transport error.
    pub fn failing_route_from(mut self, origin: Point) -> Self {
        self.fail_routes_from.push(origin);
        self
    }

    /// Matrix cells for `origin` report this many minutes.
    pub fn matrix_minutes_from(mut self, origin: Point, minutes: f64) -> Self {
        self.matrix_minutes.push((origin, minutes));
        self
    }

    pub fn route_speed_kmh(mut self, speed_kmh: f64) -> Self {
        self.route_router = HaversineRouter::new(speed_kmh);
        self
    }

    /// Route responses claim the waypoints were visited in reverse.
    pub fn reversing_waypoints(mut self) -> Self {
        self.reverse_waypoints = true;
        self
    }

    /// Every route leg reports this duration instead of the haversine time.
    pub fn route_leg_minutes(mut self, minutes: f64) -> Self {
        self.leg_minutes = Some(minutes);
        self
    }

    /// Every call sleeps this long before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn matrix_calls(&self) -> usize {
        self.matrix_calls.load(Ordering::SeqCst)
    }

    pub fn route_calls(&self) -> usize {
        self.route_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.matrix_calls() + self.route_calls()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RoutingProvider for ScriptedRouter {
    async fn get_travel_times(
        &self,
        origins: &[Point],
        destinations: &[Point],
        departure_time: DateTime<Utc>,
    ) -> Result<TravelMatrix, RoutingError> {
        self.matrix_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_matrix {
            return Err(RoutingError::Timeout);
        }

        let matrix = self
            .matrix_router
            .get_travel_times(origins, destinations, departure_time)
            .await?;
        let rows: Vec<Vec<_>> = origins
            .iter()
            .zip(matrix.rows())
            .map(|(origin, row)| {
                let fixed = self
                    .matrix_minutes
                    .iter()
                    .find(|(point, _)| point == origin)
                    .map(|(_, minutes)| *minutes);
                row.iter()
                    .map(|cell| {
                        let mut cell = *cell;
                        if let Some(minutes) = fixed {
                            cell.duration_minutes = minutes;
                        }
                        cell
                    })
                    .collect()
            })
            .collect();
        Ok(TravelMatrix::new(rows))
    }

    async fn get_route(
        &self,
        origin: Point,
        waypoints: &[Point],
        departure_time: DateTime<Utc>,
        optimize: bool,
    ) -> Result<RouteResponse, RoutingError> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_all_routes {
            return Err(RoutingError::Timeout);
        }
        if self.fail_routes_from.contains(&origin) {
            return Err(RoutingError::Transport("connection reset".to_string()));
        }

        let mut route = self
            .route_router
            .get_route(origin, waypoints, departure_time, optimize)
            .await?;
        if self.reverse_waypoints {
            route.waypoint_order.reverse();
        }
        if let Some(minutes) = self.leg_minutes {
            for leg in &mut route.legs {
                leg.duration_minutes = minutes;
            }
        }
        Ok(route)
    }
}
