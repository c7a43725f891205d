//! Test fixtures for courier-dispatch.
//!
//! Provides:
//! - Riyadh locations used across scenarios
//! - Builders for orders and couriers
//! - A scripted routing provider that counts calls and injects failures

#![allow(dead_code)]

pub mod riyadh_locations;
pub mod scripted_router;

pub use riyadh_locations::*;
pub use scripted_router::*;
