//! Haversine routing provider (fallback when no road router is reachable).
//!
//! Estimates travel with straight-line distance and an assumed speed. Less
//! accurate than a road router but always available and fully deterministic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::geo::{estimate_travel_time_minutes, haversine_km};
use crate::model::Point;
use crate::polyline::Polyline;
use crate::traits::{RouteLeg, RouteResponse, RoutingError, RoutingProvider, TravelMatrix, TravelTime};

const DEFAULT_SPEED_KMH: f64 = 25.0;

#[derive(Debug, Clone)]
pub struct HaversineRouter {
    /// Assumed average speed in km/h.
    pub speed_kmh: f64,
}

impl Default for HaversineRouter {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineRouter {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    pub fn travel_time(&self, from: Point, to: Point) -> TravelTime {
        let distance_km = haversine_km(from, to);
        TravelTime {
            duration_minutes: estimate_travel_time_minutes(distance_km, self.speed_kmh),
            distance_km,
        }
    }
}

#[async_trait]
impl RoutingProvider for HaversineRouter {
    async fn get_travel_times(
        &self,
        origins: &[Point],
        destinations: &[Point],
        _departure_time: DateTime<Utc>,
    ) -> Result<TravelMatrix, RoutingError> {
        let rows = origins
            .iter()
            .map(|from| destinations.iter().map(|to| self.travel_time(*from, *to)).collect())
            .collect();
        Ok(TravelMatrix::new(rows))
    }

    /// Straight lines between stops in the given order; `optimize` is ignored.
    async fn get_route(
        &self,
        origin: Point,
        waypoints: &[Point],
        _departure_time: DateTime<Utc>,
        _optimize: bool,
    ) -> Result<RouteResponse, RoutingError> {
        let mut legs = Vec::with_capacity(waypoints.len());
        let mut previous = origin;
        for waypoint in waypoints {
            let travel = self.travel_time(previous, *waypoint);
            legs.push(RouteLeg {
                distance_km: travel.distance_km,
                duration_minutes: travel.duration_minutes,
            });
            previous = *waypoint;
        }

        let mut points = Vec::with_capacity(waypoints.len() + 1);
        points.push(origin);
        points.extend_from_slice(waypoints);

        Ok(RouteResponse {
            legs,
            waypoint_order: (0..waypoints.len()).collect(),
            polyline: Some(Polyline::new(points)),
        })
    }
}
