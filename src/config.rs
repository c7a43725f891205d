//! Dispatch tuning parameters.
//!
//! A `DispatchConfig` is built by the caller and handed to the engine. There is
//! no global default instance, so engines with different tunings can run side
//! by side.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyWeights {
    pub distance: f64,
    pub sla: f64,
    pub fairness: f64,
    pub overload: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            distance: 1.0,
            sla: 5.0,
            fairness: 1.0,
            overload: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Layer 1 straight-line radius around the pickup.
    pub max_haversine_radius_km: f64,
    /// Layer 2 cutoff on courier-to-pickup travel time.
    pub max_pickup_eta_minutes: f64,
    /// Speed assumed whenever travel time is estimated from distance.
    pub average_speed_kmh: f64,
    /// Informational only; order deadlines arrive precomputed.
    pub sla_hours: f64,
    /// Safety margin subtracted from an order's deadline in feasibility checks.
    pub sla_buffer_minutes: f64,
    pub target_orders_per_courier_per_day: u32,
    pub penalty_weights: PenaltyWeights,
    pub routing_timeout_seconds: f64,
    pub cache_ttl_minutes: u64,
    /// Departure times are bucketed to this width for cache keys.
    pub cache_time_bucket_minutes: u64,
    /// Passed through as `optimize` on Layer 4 route requests.
    pub optimize_stop_order: bool,
    /// Upper bound on in-flight Layer 4 route requests per order.
    pub max_concurrent_route_requests: usize,
    /// How many times the dispatcher re-evaluates an order that lost a commit race.
    pub max_commit_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_haversine_radius_km: 7.0,
            max_pickup_eta_minutes: 15.0,
            average_speed_kmh: 25.0,
            sla_hours: 4.0,
            sla_buffer_minutes: 15.0,
            target_orders_per_courier_per_day: 15,
            penalty_weights: PenaltyWeights::default(),
            routing_timeout_seconds: 30.0,
            cache_ttl_minutes: 20,
            cache_time_bucket_minutes: 5,
            optimize_stop_order: false,
            max_concurrent_route_requests: 4,
            max_commit_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be a finite, non-negative number (got {value})")]
    NotNonNegative { field: &'static str, value: f64 },
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("{field} is too large to represent as a duration")]
    OutOfRange { field: &'static str },
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("max_haversine_radius_km", self.max_haversine_radius_km),
            ("max_pickup_eta_minutes", self.max_pickup_eta_minutes),
            ("sla_hours", self.sla_hours),
            ("sla_buffer_minutes", self.sla_buffer_minutes),
            ("penalty_weights.distance", self.penalty_weights.distance),
            ("penalty_weights.sla", self.penalty_weights.sla),
            ("penalty_weights.fairness", self.penalty_weights.fairness),
            ("penalty_weights.overload", self.penalty_weights.overload),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NotNonNegative { field, value });
            }
        }

        if !(self.average_speed_kmh.is_finite() && self.average_speed_kmh > 0.0) {
            return Err(ConfigError::NotPositive {
                field: "average_speed_kmh",
            });
        }
        if !(self.routing_timeout_seconds.is_finite() && self.routing_timeout_seconds > 0.0) {
            return Err(ConfigError::NotPositive {
                field: "routing_timeout_seconds",
            });
        }
        if Duration::try_from_secs_f64(self.routing_timeout_seconds).is_err() {
            return Err(ConfigError::OutOfRange {
                field: "routing_timeout_seconds",
            });
        }
        if self.cache_ttl_minutes.checked_mul(60).is_none() {
            return Err(ConfigError::OutOfRange {
                field: "cache_ttl_minutes",
            });
        }
        if self.cache_time_bucket_minutes.checked_mul(60).is_none() {
            return Err(ConfigError::OutOfRange {
                field: "cache_time_bucket_minutes",
            });
        }
        if self.cache_time_bucket_minutes == 0 {
            return Err(ConfigError::NotPositive {
                field: "cache_time_bucket_minutes",
            });
        }
        if self.max_concurrent_route_requests == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_concurrent_route_requests",
            });
        }
        Ok(())
    }

    /// Saturates instead of panicking on values `validate` would reject.
    pub fn routing_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.routing_timeout_seconds).unwrap_or(Duration::MAX)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60))
    }

    pub fn cache_time_bucket(&self) -> Duration {
        Duration::from_secs(self.cache_time_bucket_minutes.saturating_mul(60))
    }
}
