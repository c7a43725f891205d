//! Seams between the dispatch core and its collaborators.
//!
//! The routing provider is the only network-bound dependency of the engine.
//! Order source, courier source and assignment sink are used by the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) loop, not by the engine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AssignmentResult, CourierId, DispatchOrder, DispatchSnapshot, OrderId, Point};
use crate::polyline::Polyline;

/// One cell of a travel-time matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelTime {
    pub duration_minutes: f64,
    pub distance_km: f64,
}

/// Travel times indexed `[origin][destination]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelMatrix {
    rows: Vec<Vec<TravelTime>>,
}

impl TravelMatrix {
    pub fn new(rows: Vec<Vec<TravelTime>>) -> Self {
        Self { rows }
    }

    pub fn get(&self, origin: usize, destination: usize) -> Option<TravelTime> {
        self.rows.get(origin)?.get(destination).copied()
    }

    pub fn rows(&self) -> &[Vec<TravelTime>] {
        &self.rows
    }

    /// True when the matrix has exactly `origins x destinations` finite cells.
    pub fn has_shape(&self, origins: usize, destinations: usize) -> bool {
        self.rows.len() == origins
            && self.rows.iter().all(|row| {
                row.len() == destinations
                    && row
                        .iter()
                        .all(|cell| cell.duration_minutes.is_finite() && cell.distance_km.is_finite())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
    pub distance_km: f64,
    pub duration_minutes: f64,
}

/// A computed route from an origin through every waypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    /// One leg per visited waypoint, in visiting order.
    pub legs: Vec<RouteLeg>,
    /// Visiting order as indices into the requested waypoints. Identity unless
    /// the provider was allowed to optimize.
    pub waypoint_order: Vec<usize>,
    pub polyline: Option<Polyline>,
}

impl RouteResponse {
    pub fn total_distance_km(&self) -> f64 {
        self.legs.iter().map(|leg| leg.distance_km).sum()
    }

    pub fn total_duration_minutes(&self) -> f64 {
        self.legs.iter().map(|leg| leg.duration_minutes).sum()
    }

    /// True when there is one leg per waypoint and `waypoint_order` is a
    /// permutation of `0..waypoints`.
    pub fn has_shape(&self, waypoints: usize) -> bool {
        if self.legs.len() != waypoints || self.waypoint_order.len() != waypoints {
            return false;
        }
        let mut seen = vec![false; waypoints];
        for &index in &self.waypoint_order {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        self.legs
            .iter()
            .all(|leg| leg.distance_km.is_finite() && leg.duration_minutes.is_finite())
    }
}

/// Every way a routing call can fail. Callers treat all variants as
/// "provider unavailable".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    #[error("routing request timed out")]
    Timeout,
    #[error("routing transport error: {0}")]
    Transport(String),
    #[error("malformed routing response: {0}")]
    Malformed(String),
    #[error("routing provider rejected the request (rate limited)")]
    RateLimited,
}

impl From<reqwest::Error> for RoutingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RoutingError::Timeout
        } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            RoutingError::RateLimited
        } else if err.is_decode() {
            RoutingError::Malformed(err.to_string())
        } else {
            RoutingError::Transport(err.to_string())
        }
    }
}

/// Travel-time and directions backend.
///
/// Implementations must return a complete result or an error; partial
/// results are not allowed.
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn get_travel_times(
        &self,
        origins: &[Point],
        destinations: &[Point],
        departure_time: DateTime<Utc>,
    ) -> Result<TravelMatrix, RoutingError>;

    async fn get_route(
        &self,
        origin: Point,
        waypoints: &[Point],
        departure_time: DateTime<Utc>,
        optimize: bool,
    ) -> Result<RouteResponse, RoutingError>;
}

#[async_trait]
impl<P> RoutingProvider for Arc<P>
where
    P: RoutingProvider + ?Sized,
{
    async fn get_travel_times(
        &self,
        origins: &[Point],
        destinations: &[Point],
        departure_time: DateTime<Utc>,
    ) -> Result<TravelMatrix, RoutingError> {
        (**self)
            .get_travel_times(origins, destinations, departure_time)
            .await
    }

    async fn get_route(
        &self,
        origin: Point,
        waypoints: &[Point],
        departure_time: DateTime<Utc>,
        optimize: bool,
    ) -> Result<RouteResponse, RoutingError> {
        (**self)
            .get_route(origin, waypoints, departure_time, optimize)
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommitError {
    /// The courier's open-order list changed since the result was computed.
    #[error("courier {courier_id} changed since order {order_id} was evaluated")]
    Conflict {
        order_id: OrderId,
        courier_id: CourierId,
    },
    #[error("unknown courier {0}")]
    UnknownCourier(CourierId),
    #[error("order {0} is no longer unassigned")]
    OrderNotPending(OrderId),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Supplies orders awaiting assignment.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn pending_orders(&self) -> Result<Vec<DispatchOrder>, SourceError>;
}

/// Supplies a point-in-time view of couriers and their open orders.
#[async_trait]
pub trait CourierSource: Send + Sync {
    async fn snapshot(&self) -> Result<DispatchSnapshot, SourceError>;
}

/// Durably records accepted assignments.
///
/// `commit` must compare the courier's current open-order list against
/// `result.base_open_order_ids` and apply the assignment only if they match,
/// returning [`CommitError::Conflict`] otherwise.
#[async_trait]
pub trait AssignmentSink: Send + Sync {
    async fn commit(&self, result: &AssignmentResult) -> Result<(), CommitError>;
}

#[async_trait]
impl<T: OrderSource + ?Sized> OrderSource for Arc<T> {
    async fn pending_orders(&self) -> Result<Vec<DispatchOrder>, SourceError> {
        (**self).pending_orders().await
    }
}

#[async_trait]
impl<T: CourierSource + ?Sized> CourierSource for Arc<T> {
    async fn snapshot(&self) -> Result<DispatchSnapshot, SourceError> {
        (**self).snapshot().await
    }
}

#[async_trait]
impl<T: AssignmentSink + ?Sized> AssignmentSink for Arc<T> {
    async fn commit(&self, result: &AssignmentResult) -> Result<(), CommitError> {
        (**self).commit(result).await
    }
}
