//! Value types flowing through the dispatch pipeline.
//!
//! The engine only ever reads these as snapshots. Mutation of real order and
//! courier state belongs to whoever commits an [`AssignmentResult`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::polyline::Polyline;

/// A WGS-84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both coordinates are finite and inside their valid ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<(f64, f64)> for Point {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(OrderId);
string_id!(CourierId);
string_id!(ZoneId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unassigned,
    Assigned,
    PickedUp,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOrder {
    pub id: OrderId,
    pub pickup: Point,
    pub dropoff: Point,
    pub created_at: DateTime<Utc>,
    /// Owned by the order source; the engine never recomputes it.
    pub deadline_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub zone_id: Option<ZoneId>,
}

impl DispatchOrder {
    /// Stops this order still needs on a courier's route, given its status.
    pub fn remaining_stops(&self) -> Vec<(StopType, Point)> {
        match self.status {
            OrderStatus::Unassigned | OrderStatus::Assigned => vec![
                (StopType::Pickup, self.pickup),
                (StopType::Dropoff, self.dropoff),
            ],
            OrderStatus::PickedUp => vec![(StopType::Dropoff, self.dropoff)],
            OrderStatus::Delivered | OrderStatus::Cancelled => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourierStatus {
    Online,
    Offline,
    Break,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCourier {
    pub id: CourierId,
    /// Latest telemetry fix.
    pub location: Point,
    pub status: CourierStatus,
    pub shift_end_at: DateTime<Utc>,
    pub completed_orders_today: u32,
    pub open_order_ids: Vec<OrderId>,
    pub zone_id: Option<ZoneId>,
}

impl DispatchCourier {
    pub fn is_available(&self) -> bool {
        self.status == CourierStatus::Online
    }

    pub fn current_load(&self) -> usize {
        self.open_order_ids.len()
    }
}

/// Point-in-time view of the courier pool plus the open orders they carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSnapshot {
    pub couriers: Vec<DispatchCourier>,
    pub open_orders: HashMap<OrderId, DispatchOrder>,
}

impl DispatchSnapshot {
    pub fn new(couriers: Vec<DispatchCourier>) -> Self {
        Self {
            couriers,
            open_orders: HashMap::new(),
        }
    }

    pub fn with_open_orders(mut self, orders: impl IntoIterator<Item = DispatchOrder>) -> Self {
        self.open_orders
            .extend(orders.into_iter().map(|order| (order.id.clone(), order)));
        self
    }

    pub fn courier(&self, id: &CourierId) -> Option<&DispatchCourier> {
        self.couriers.iter().find(|courier| &courier.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    Pickup,
    Dropoff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub order_id: OrderId,
    pub stop_type: StopType,
    pub location: Point,
    pub eta: DateTime<Utc>,
}

/// The plan a courier would follow if the assignment were committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierPlan {
    pub courier_id: CourierId,
    pub stops: Vec<RouteStop>,
    pub polyline: Option<Polyline>,
    pub total_distance_km: f64,
    pub total_duration_minutes: f64,
}

impl CourierPlan {
    pub fn stop(&self, order_id: &OrderId, stop_type: StopType) -> Option<&RouteStop> {
        self.stops
            .iter()
            .find(|stop| &stop.order_id == order_id && stop.stop_type == stop_type)
    }
}

/// Where a Layer 2 pickup ETA came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtaSource {
    Routed,
    Estimated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub order_id: OrderId,
    pub courier_id: CourierId,
    pub plan: CourierPlan,
    /// Lower is better.
    pub score: f64,
    pub pickup_eta_minutes: f64,
    pub pickup_eta_source: EtaSource,
    /// The courier's open-order list this plan was computed against. Commit
    /// must compare-and-set against it.
    pub base_open_order_ids: Vec<OrderId>,
    pub counts: LayerCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignableReason {
    /// Layer 1 left nobody, including the empty-pool case.
    NoCourierInRange,
    /// Layer 2 left nobody.
    PickupTooFar,
    /// Layer 3 or Layer 4 rejected every candidate on the deadline.
    SlaInfeasible,
    /// Every Layer 4 candidate was dropped because routing failed.
    ProviderExhausted,
}

/// Survivors remaining after each layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCounts {
    pub pool: usize,
    pub local: usize,
    pub matrix: usize,
    pub feasible: usize,
    pub routed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unassignable {
    pub order_id: OrderId,
    pub reason: UnassignableReason,
    pub counts: LayerCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Assigned(AssignmentResult),
    Unassignable(Unassignable),
}

impl DispatchOutcome {
    pub fn assignment(&self) -> Option<&AssignmentResult> {
        match self {
            DispatchOutcome::Assigned(result) => Some(result),
            DispatchOutcome::Unassignable(_) => None,
        }
    }

    pub fn unassignable_reason(&self) -> Option<UnassignableReason> {
        match self {
            DispatchOutcome::Assigned(_) => None,
            DispatchOutcome::Unassignable(unassignable) => Some(unassignable.reason),
        }
    }
}
