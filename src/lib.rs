//! courier-dispatch core
//!
//! Assigns delivery orders to couriers with a layered filter-and-score
//! pipeline: cheap geometry first, routing provider calls only for the
//! narrowed candidate set.

pub mod traits;
pub mod model;
pub mod config;
pub mod geo;
pub mod engine;
pub mod dispatcher;
pub mod memory;
pub mod cache;
pub mod osrm;
pub mod osrm_data;
pub mod haversine;
pub mod polyline;

pub use config::{DispatchConfig, PenaltyWeights};
pub use engine::{DispatchEngine, DispatchError};
pub use model::{AssignmentResult, DispatchOutcome, UnassignableReason};
pub use traits::{RoutingError, RoutingProvider};
