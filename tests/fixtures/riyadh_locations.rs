//! Riyadh locations and domain builders for realistic scenarios.

use chrono::{DateTime, Duration, TimeZone, Utc};

use courier_dispatch::model::{
    CourierId, CourierStatus, DispatchCourier, DispatchOrder, OrderId, OrderStatus, Point, ZoneId,
};

/// A named location with coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }

    pub fn point(&self) -> Point {
        Point::new(self.lat, self.lng)
    }
}

// ============================================================================
// Reference scenario
// ============================================================================

pub const COURIER_A_START: Location = Location::new("Olaya courier A", 24.7000, 46.6800);
pub const COURIER_B_START: Location = Location::new("Olaya courier B", 24.7500, 46.7200);
pub const SCENARIO_PICKUP: Location = Location::new("Olaya restaurant", 24.7100, 46.6850);
pub const SCENARIO_DROPOFF: Location = Location::new("Al Wurud residence", 24.7300, 46.7000);

// ============================================================================
// Further afield (well outside a 7 km radius of the scenario pickup)
// ============================================================================

pub const FAR_LOCATIONS: &[Location] = &[
    Location::new("King Khalid Airport", 24.9576, 46.6988),
    Location::new("Diriyah", 24.7340, 46.5750),
    Location::new("Al Aziziyah", 24.5890, 46.7600),
    Location::new("Ar Rimal", 24.8050, 46.8600),
];

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// Builder for dispatch orders with sensible defaults.
#[derive(Clone, Debug)]
pub struct OrderBuilder {
    order: DispatchOrder,
}

impl OrderBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            order: DispatchOrder {
                id: OrderId::new(id),
                pickup: SCENARIO_PICKUP.point(),
                dropoff: SCENARIO_DROPOFF.point(),
                created_at: now(),
                deadline_at: now() + Duration::hours(4),
                status: OrderStatus::Unassigned,
                zone_id: None,
            },
        }
    }

    pub fn pickup(mut self, location: Location) -> Self {
        self.order.pickup = location.point();
        self
    }

    pub fn dropoff(mut self, location: Location) -> Self {
        self.order.dropoff = location.point();
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.order.created_at = at;
        self
    }

    /// Deadline relative to `now()`.
    pub fn due_in_minutes(mut self, minutes: i64) -> Self {
        self.order.deadline_at = now() + Duration::minutes(minutes);
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.order.status = status;
        self
    }

    pub fn zone(mut self, zone: &str) -> Self {
        self.order.zone_id = Some(ZoneId::new(zone));
        self
    }

    pub fn build(self) -> DispatchOrder {
        self.order
    }
}

/// Builder for couriers, online with a long shift by default.
#[derive(Clone, Debug)]
pub struct CourierBuilder {
    courier: DispatchCourier,
}

impl CourierBuilder {
    pub fn new(id: &str, location: Location) -> Self {
        Self {
            courier: DispatchCourier {
                id: CourierId::new(id),
                location: location.point(),
                status: CourierStatus::Online,
                shift_end_at: now() + Duration::hours(8),
                completed_orders_today: 0,
                open_order_ids: Vec::new(),
                zone_id: None,
            },
        }
    }

    pub fn status(mut self, status: CourierStatus) -> Self {
        self.courier.status = status;
        self
    }

    pub fn completed_today(mut self, count: u32) -> Self {
        self.courier.completed_orders_today = count;
        self
    }

    pub fn open_order(mut self, id: &str) -> Self {
        self.courier.open_order_ids.push(OrderId::new(id));
        self
    }

    pub fn zone(mut self, zone: &str) -> Self {
        self.courier.zone_id = Some(ZoneId::new(zone));
        self
    }

    pub fn build(self) -> DispatchCourier {
        self.courier
    }
}
