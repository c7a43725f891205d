//! Route geometry as decoded coordinates.
//!
//! Routing backends hand geometry over in the compact encoded polyline
//! format; it is decoded once at the adapter boundary and kept as points.

use serde::{Deserialize, Serialize};

use crate::model::Point;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<Point>,
}

impl Polyline {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    /// Decodes an encoded polyline with the given precision (5 for OSRM's
    /// `polyline`, 6 for `polyline6`). Returns `None` on truncated input.
    pub fn decode(encoded: &str, precision: u32) -> Option<Self> {
        let factor = 10f64.powi(precision as i32);
        let bytes = encoded.as_bytes();
        let mut index = 0;
        let mut lat: i64 = 0;
        let mut lng: i64 = 0;
        let mut points = Vec::new();

        while index < bytes.len() {
            lat += next_value(bytes, &mut index)?;
            lng += next_value(bytes, &mut index)?;
            points.push(Point::new(lat as f64 / factor, lng as f64 / factor));
        }

        Some(Self { points })
    }
}

fn next_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut result: i64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*index)? as i64 - 63;
        *index += 1;
        if !(0..64).contains(&byte) || shift > 60 {
            return None;
        }
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }
    Some(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}
