//! Pure geometric helpers used by the cheap dispatch layers.
//!
//! Nothing here allocates or touches the network; Layer 1 calls these for
//! every courier in the pool.

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::Point;

/// Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(a: Point, b: Point) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Travel time in minutes at a constant speed. Zero for non-positive speeds.
pub fn estimate_travel_time_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh <= 0.0 {
        return 0.0;
    }
    distance_km / speed_kmh * 60.0
}

pub fn point_in_radius(center: Point, point: Point, radius_km: f64) -> bool {
    haversine_km(center, point) <= radius_km
}

/// Adds a possibly fractional number of minutes, at millisecond resolution.
/// `None` when `minutes` is not finite or the result leaves chrono's range.
pub fn add_minutes(base: DateTime<Utc>, minutes: f64) -> Option<DateTime<Utc>> {
    let millis = (minutes * 60_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    base.checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
}

/// Signed number of minutes from `from` to `to`.
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}
