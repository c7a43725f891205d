//! OSRM HTTP adapter for travel matrices and routes.
//!
//! Uses the `table` service for matrices, `route` for fixed-order routes and
//! `trip` when the caller allows stop reordering. OSRM has no traffic model,
//! so departure time is accepted but not forwarded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::model::Point;
use crate::polyline::Polyline;
use crate::traits::{RouteLeg, RouteResponse, RoutingError, RoutingProvider, TravelMatrix, TravelTime};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, RoutingError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn table_url(&self, origins: &[Point], destinations: &[Point]) -> String {
        let sources = (0..origins.len()).map(|i| i.to_string()).collect::<Vec<_>>().join(";");
        let targets = (origins.len()..origins.len() + destinations.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");
        let coords = encode_coords(origins.iter().chain(destinations.iter()));

        format!(
            "{}/table/v1/{}/{}?sources={}&destinations={}&annotations=duration,distance",
            self.config.base_url, self.config.profile, coords, sources, targets
        )
    }

    pub fn route_url(&self, origin: Point, waypoints: &[Point], optimize: bool) -> String {
        let coords = encode_coords(std::iter::once(&origin).chain(waypoints.iter()));
        if optimize {
            format!(
                "{}/trip/v1/{}/{}?source=first&destination=last&roundtrip=false&overview=full&geometries=polyline",
                self.config.base_url, self.config.profile, coords
            )
        } else {
            format!(
                "{}/route/v1/{}/{}?overview=full&geometries=polyline&steps=false",
                self.config.base_url, self.config.profile, coords
            )
        }
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(&self, url: String) -> Result<T, RoutingError> {
        debug!(%url, "osrm request");
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;
        Ok(body)
    }
}

fn encode_coords<'a>(points: impl Iterator<Item = &'a Point>) -> String {
    points
        .map(|point| format!("{:.6},{:.6}", point.lng, point.lat))
        .collect::<Vec<_>>()
        .join(";")
}

#[async_trait]
impl RoutingProvider for OsrmClient {
    async fn get_travel_times(
        &self,
        origins: &[Point],
        destinations: &[Point],
        _departure_time: DateTime<Utc>,
    ) -> Result<TravelMatrix, RoutingError> {
        if origins.is_empty() || destinations.is_empty() {
            return Ok(TravelMatrix::new(vec![Vec::new(); origins.len()]));
        }

        let body: OsrmTableResponse = self.fetch(self.table_url(origins, destinations)).await?;
        table_to_matrix(body, origins.len(), destinations.len())
    }

    async fn get_route(
        &self,
        origin: Point,
        waypoints: &[Point],
        _departure_time: DateTime<Utc>,
        optimize: bool,
    ) -> Result<RouteResponse, RoutingError> {
        if waypoints.is_empty() {
            return Ok(RouteResponse {
                legs: Vec::new(),
                waypoint_order: Vec::new(),
                polyline: None,
            });
        }

        let url = self.route_url(origin, waypoints, optimize);
        if optimize {
            let body: OsrmTripResponse = self.fetch(url).await?;
            trip_to_route(body, waypoints.len())
        } else {
            let body: OsrmRouteResponse = self.fetch(url).await?;
            route_to_route(body, waypoints.len())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OsrmTableResponse {
    code: String,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmTripResponse {
    code: String,
    #[serde(default)]
    trips: Vec<OsrmRoute>,
    #[serde(default)]
    waypoints: Vec<OsrmTripWaypoint>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    legs: Vec<OsrmLeg>,
    geometry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    /// Meters.
    distance: f64,
    /// Seconds.
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmTripWaypoint {
    waypoint_index: usize,
}

fn check_code(code: &str) -> Result<(), RoutingError> {
    if code == "Ok" {
        Ok(())
    } else {
        Err(RoutingError::Malformed(format!("osrm returned code {}", code)))
    }
}

/// Converts an OSRM table body into a matrix, rejecting null cells.
pub fn table_to_matrix(
    body: OsrmTableResponse,
    origins: usize,
    destinations: usize,
) -> Result<TravelMatrix, RoutingError> {
    check_code(&body.code)?;
    let durations = body
        .durations
        .ok_or_else(|| RoutingError::Malformed("missing durations".to_string()))?;
    let distances = body
        .distances
        .ok_or_else(|| RoutingError::Malformed("missing distances".to_string()))?;

    if durations.len() != origins || distances.len() != origins {
        return Err(RoutingError::Malformed(format!(
            "expected {} rows, got {}",
            origins,
            durations.len()
        )));
    }

    let mut rows = Vec::with_capacity(origins);
    for (duration_row, distance_row) in durations.into_iter().zip(distances) {
        if duration_row.len() != destinations || distance_row.len() != destinations {
            return Err(RoutingError::Malformed("row length mismatch".to_string()));
        }
        let row = duration_row
            .into_iter()
            .zip(distance_row)
            .map(|cell| match cell {
                (Some(seconds), Some(meters)) => Ok(TravelTime {
                    duration_minutes: seconds / 60.0,
                    distance_km: meters / 1000.0,
                }),
                _ => Err(RoutingError::Malformed("unroutable cell".to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    Ok(TravelMatrix::new(rows))
}

fn convert_route(route: OsrmRoute, waypoints: usize) -> Result<(Vec<RouteLeg>, Option<Polyline>), RoutingError> {
    if route.legs.len() != waypoints {
        return Err(RoutingError::Malformed(format!(
            "expected {} legs, got {}",
            waypoints,
            route.legs.len()
        )));
    }
    let legs = route
        .legs
        .iter()
        .map(|leg| RouteLeg {
            distance_km: leg.distance / 1000.0,
            duration_minutes: leg.duration / 60.0,
        })
        .collect();
    let polyline = match route.geometry {
        Some(encoded) => Some(
            Polyline::decode(&encoded, 5)
                .ok_or_else(|| RoutingError::Malformed("invalid geometry".to_string()))?,
        ),
        None => None,
    };
    Ok((legs, polyline))
}

pub fn route_to_route(body: OsrmRouteResponse, waypoints: usize) -> Result<RouteResponse, RoutingError> {
    check_code(&body.code)?;
    let route = body
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| RoutingError::Malformed("no route".to_string()))?;
    let (legs, polyline) = convert_route(route, waypoints)?;

    Ok(RouteResponse {
        legs,
        waypoint_order: (0..waypoints).collect(),
        polyline,
    })
}

/// Converts an OSRM trip body. `waypoints` excludes the origin, which OSRM
/// reports as the first input coordinate.
pub fn trip_to_route(body: OsrmTripResponse, waypoints: usize) -> Result<RouteResponse, RoutingError> {
    check_code(&body.code)?;
    if body.waypoints.len() != waypoints + 1 {
        return Err(RoutingError::Malformed("waypoint count mismatch".to_string()));
    }

    // waypoint_index is the trip position of each input coordinate.
    let mut order = vec![usize::MAX; waypoints];
    for (input, waypoint) in body.waypoints.iter().enumerate().skip(1) {
        let position = waypoint
            .waypoint_index
            .checked_sub(1)
            .filter(|position| *position < waypoints)
            .ok_or_else(|| RoutingError::Malformed("origin was reordered".to_string()))?;
        order[position] = input - 1;
    }
    if order.contains(&usize::MAX) {
        return Err(RoutingError::Malformed("duplicate trip positions".to_string()));
    }

    let trip = body
        .trips
        .into_iter()
        .next()
        .ok_or_else(|| RoutingError::Malformed("no trip".to_string()))?;
    let (legs, polyline) = convert_route(trip, waypoints)?;

    Ok(RouteResponse {
        legs,
        waypoint_order: order,
        polyline,
    })
}
