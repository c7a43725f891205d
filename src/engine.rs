//! Four-layer dispatch pipeline.
//!
//! Per order: `local filter -> distance matrix -> approximate feasibility ->
//! precise routing + scoring`. Each layer only narrows the candidate set it
//! receives, and an empty set ends evaluation as [`Unassignable`]. Layers 1
//! and 3 are pure CPU work; Layers 2 and 4 are the only suspension points.
//!
//! The engine never mutates couriers or orders. Committing a result is the
//! caller's job and must compare-and-set the courier's open-order list
//! against [`AssignmentResult::base_open_order_ids`], because two orders
//! evaluated concurrently may both pick the same courier.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::join_all;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, DispatchConfig};
use crate::geo::{add_minutes, estimate_travel_time_minutes, haversine_km, minutes_between};
use crate::model::{
    AssignmentResult, CourierPlan, DispatchCourier, DispatchOrder, DispatchOutcome, DispatchSnapshot,
    EtaSource, LayerCounts, OrderId, OrderStatus, Point, RouteStop, StopType, Unassignable,
    UnassignableReason,
};
use crate::traits::{RouteResponse, RoutingError, RoutingProvider};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("invalid order {order_id}: {reason}")]
    InvalidInput { order_id: OrderId, reason: String },
}

impl DispatchError {
    fn invalid(order: &DispatchOrder, reason: impl Into<String>) -> Self {
        DispatchError::InvalidInput {
            order_id: order.id.clone(),
            reason: reason.into(),
        }
    }
}

/// A courier still in contention, with its Layer 1/2 measurements.
#[derive(Debug, Clone)]
pub(crate) struct Candidate<'a> {
    pub courier: &'a DispatchCourier,
    pub pickup_distance_km: f64,
    pub pickup_eta_minutes: f64,
    pub eta_source: EtaSource,
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedStop {
    order_id: OrderId,
    stop_type: StopType,
    location: Point,
}

/// Existing stops plus the new order's pickup and dropoff.
#[derive(Debug, Clone)]
struct TrialPlan<'a> {
    candidate: Candidate<'a>,
    stops: Vec<PlannedStop>,
}

struct ScoredPlan<'a> {
    candidate: Candidate<'a>,
    plan: CourierPlan,
    score: f64,
}

enum RouteOutcome<'a> {
    Scored(ScoredPlan<'a>),
    MissedDeadline,
    ProviderFailed,
}

pub struct DispatchEngine<P> {
    config: DispatchConfig,
    router: P,
}

impl<P: RoutingProvider> DispatchEngine<P> {
    pub fn new(config: DispatchConfig, router: P) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, router })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn router(&self) -> &P {
        &self.router
    }

    /// Evaluates one order against a courier snapshot at instant `now`.
    ///
    /// Returns `Err` only for malformed orders. Running out of candidates is
    /// an `Ok(DispatchOutcome::Unassignable)`.
    #[instrument(skip_all, fields(order_id = %order.id))]
    pub async fn evaluate(
        &self,
        order: &DispatchOrder,
        snapshot: &DispatchSnapshot,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, DispatchError> {
        validate_order(order)?;

        let mut counts = LayerCounts {
            pool: snapshot.couriers.len(),
            ..LayerCounts::default()
        };

        let local = self.local_filter(order, &snapshot.couriers, now);
        counts.local = local.len();
        debug!(pool = counts.pool, survivors = counts.local, "layer 1 local filter");
        if local.is_empty() {
            return Ok(self.unassignable(order, UnassignableReason::NoCourierInRange, counts));
        }

        let reachable = self.matrix_filter(order, local, now).await;
        counts.matrix = reachable.len();
        debug!(survivors = counts.matrix, "layer 2 matrix filter");
        if reachable.is_empty() {
            return Ok(self.unassignable(order, UnassignableReason::PickupTooFar, counts));
        }

        let feasible = self.feasibility_filter(order, reachable, &snapshot.open_orders, now);
        counts.feasible = feasible.len();
        debug!(survivors = counts.feasible, "layer 3 feasibility filter");
        if feasible.is_empty() {
            return Ok(self.unassignable(order, UnassignableReason::SlaInfeasible, counts));
        }

        let (scored, missed, failed) = self.route_and_score(order, feasible, now).await;
        counts.routed = scored.len();
        debug!(
            survivors = counts.routed,
            missed_deadline = missed,
            provider_failures = failed,
            "layer 4 routing"
        );

        match select_best(scored) {
            Some(best) => {
                info!(
                    courier_id = %best.candidate.courier.id,
                    score = best.score,
                    pickup_km = best.candidate.pickup_distance_km,
                    "order assigned"
                );
                Ok(DispatchOutcome::Assigned(AssignmentResult {
                    order_id: order.id.clone(),
                    courier_id: best.candidate.courier.id.clone(),
                    plan: best.plan,
                    score: best.score,
                    pickup_eta_minutes: best.candidate.pickup_eta_minutes,
                    pickup_eta_source: best.candidate.eta_source,
                    base_open_order_ids: best.candidate.courier.open_order_ids.clone(),
                    counts,
                }))
            }
            None => {
                let reason = if missed > 0 {
                    UnassignableReason::SlaInfeasible
                } else {
                    UnassignableReason::ProviderExhausted
                };
                Ok(self.unassignable(order, reason, counts))
            }
        }
    }

    /// Evaluates several orders concurrently against the same snapshot.
    /// Results come back in input order. Two results may name the same
    /// courier; only one of them can be committed.
    pub async fn evaluate_batch(
        &self,
        orders: &[DispatchOrder],
        snapshot: &DispatchSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Result<DispatchOutcome, DispatchError>> {
        join_all(orders.iter().map(|order| self.evaluate(order, snapshot, now))).await
    }

    fn unassignable(
        &self,
        order: &DispatchOrder,
        reason: UnassignableReason,
        counts: LayerCounts,
    ) -> DispatchOutcome {
        info!(?reason, ?counts, "order unassignable");
        DispatchOutcome::Unassignable(Unassignable {
            order_id: order.id.clone(),
            reason,
            counts,
        })
    }

    /// Layer 1: availability, shift, zone and straight-line radius.
    pub(crate) fn local_filter<'a>(
        &self,
        order: &DispatchOrder,
        couriers: &'a [DispatchCourier],
        now: DateTime<Utc>,
    ) -> Vec<Candidate<'a>> {
        let config = &self.config;
        let mut survivors: Vec<Candidate<'a>> = couriers
            .par_iter()
            .filter(|courier| courier.is_available() && courier.location.is_valid())
            .filter(|courier| match (&courier.zone_id, &order.zone_id) {
                (Some(courier_zone), Some(order_zone)) => courier_zone == order_zone,
                _ => true,
            })
            .filter_map(|courier| {
                let distance = haversine_km(courier.location, order.pickup);
                if distance > config.max_haversine_radius_km {
                    return None;
                }
                let eta = estimate_travel_time_minutes(distance, config.average_speed_kmh);
                let ready_at = add_minutes(now, eta + config.sla_buffer_minutes)?;
                if courier.shift_end_at <= ready_at {
                    return None;
                }
                Some(Candidate {
                    courier,
                    pickup_distance_km: distance,
                    pickup_eta_minutes: eta,
                    eta_source: EtaSource::Estimated,
                })
            })
            .collect();

        survivors.sort_by(|a, b| a.courier.id.cmp(&b.courier.id));
        survivors
    }

    /// Layer 2: one batched matrix call, courier locations to the pickup.
    /// Falls back to the Layer 1 estimate for everyone when the call fails.
    async fn matrix_filter<'a>(
        &self,
        order: &DispatchOrder,
        candidates: Vec<Candidate<'a>>,
        now: DateTime<Utc>,
    ) -> Vec<Candidate<'a>> {
        let origins: Vec<Point> = candidates.iter().map(|c| c.courier.location).collect();
        let destinations = [order.pickup];

        let matrix = self
            .bounded(self.router.get_travel_times(&origins, &destinations, now))
            .await
            .and_then(|matrix| {
                if matrix.has_shape(origins.len(), 1) {
                    Ok(matrix)
                } else {
                    Err(RoutingError::Malformed("matrix shape mismatch".to_string()))
                }
            });

        let limit = self.config.max_pickup_eta_minutes;
        match matrix {
            Ok(matrix) => candidates
                .into_iter()
                .enumerate()
                .filter_map(|(index, mut candidate)| {
                    let cell = matrix.get(index, 0)?;
                    candidate.pickup_eta_minutes = cell.duration_minutes;
                    candidate.eta_source = EtaSource::Routed;
                    (candidate.pickup_eta_minutes <= limit).then_some(candidate)
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, candidates = candidates.len(), "travel matrix unavailable, using haversine estimate");
                candidates
                    .into_iter()
                    .filter(|candidate| candidate.pickup_eta_minutes <= limit)
                    .collect()
            }
        }
    }

    /// Layer 3: naive trial plan (existing stops, then the new pickup and
    /// dropoff) timed with haversine at the configured speed.
    fn feasibility_filter<'a>(
        &self,
        order: &DispatchOrder,
        candidates: Vec<Candidate<'a>>,
        open_orders: &HashMap<OrderId, DispatchOrder>,
        now: DateTime<Utc>,
    ) -> Vec<TrialPlan<'a>> {
        let Some(latest_dropoff) = add_minutes(order.deadline_at, -self.config.sla_buffer_minutes) else {
            warn!("deadline minus buffer is out of range, nothing is feasible");
            return Vec::new();
        };
        let speed = self.config.average_speed_kmh;

        let mut plans: Vec<TrialPlan<'a>> = candidates
            .into_par_iter()
            .filter_map(|candidate| {
                let stops = trial_stops(candidate.courier, order, open_orders);
                let mut position = candidate.courier.location;
                let mut elapsed = 0.0;
                for stop in &stops {
                    elapsed += estimate_travel_time_minutes(haversine_km(position, stop.location), speed);
                    position = stop.location;
                }
                if add_minutes(now, elapsed)? > latest_dropoff {
                    return None;
                }
                Some(TrialPlan { candidate, stops })
            })
            .collect();

        plans.sort_by(|a, b| a.candidate.courier.id.cmp(&b.candidate.courier.id));
        plans
    }

    /// Layer 4: precise route per candidate, with bounded fan-out. Returns
    /// the scored plans plus counts of deadline misses and provider failures.
    async fn route_and_score<'a>(
        &self,
        order: &DispatchOrder,
        plans: Vec<TrialPlan<'a>>,
        now: DateTime<Utc>,
    ) -> (Vec<ScoredPlan<'a>>, usize, usize) {
        let outcomes: Vec<RouteOutcome<'a>> = futures::stream::iter(
            plans.into_iter().map(|plan| self.route_plan(order, plan, now)),
        )
        .buffer_unordered(self.config.max_concurrent_route_requests)
        .collect()
        .await;

        let mut scored = Vec::new();
        let mut missed = 0;
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                RouteOutcome::Scored(plan) => scored.push(plan),
                RouteOutcome::MissedDeadline => missed += 1,
                RouteOutcome::ProviderFailed => failed += 1,
            }
        }
        (scored, missed, failed)
    }

    async fn route_plan<'a>(
        &self,
        order: &DispatchOrder,
        trial: TrialPlan<'a>,
        now: DateTime<Utc>,
    ) -> RouteOutcome<'a> {
        let courier = trial.candidate.courier;
        let waypoints: Vec<Point> = trial.stops.iter().map(|stop| stop.location).collect();

        let route = self
            .bounded(self.router.get_route(
                courier.location,
                &waypoints,
                now,
                self.config.optimize_stop_order,
            ))
            .await
            .and_then(|route| {
                if route.has_shape(waypoints.len()) {
                    Ok(route)
                } else {
                    Err(RoutingError::Malformed("route shape mismatch".to_string()))
                }
            })
            .and_then(|route| {
                let stops = reorder_stops(&trial.stops, &route.waypoint_order)?;
                Ok((route, stops))
            });

        let (route, stops) = match route {
            Ok(routed) => routed,
            Err(err) => {
                warn!(courier_id = %courier.id, error = %err, "route unavailable, dropping candidate");
                return RouteOutcome::ProviderFailed;
            }
        };

        let Some(plan) = build_plan(courier, stops, route, now) else {
            warn!(courier_id = %courier.id, "route durations out of range, dropping candidate");
            return RouteOutcome::ProviderFailed;
        };
        let Some(dropoff) = plan.stop(&order.id, StopType::Dropoff) else {
            return RouteOutcome::ProviderFailed;
        };
        if dropoff.eta > order.deadline_at {
            debug!(courier_id = %courier.id, eta = %dropoff.eta, "routed dropoff misses deadline");
            return RouteOutcome::MissedDeadline;
        }

        let score = score(&self.config, order, courier, plan.total_distance_km, dropoff.eta);
        RouteOutcome::Scored(ScoredPlan {
            candidate: trial.candidate,
            plan,
            score,
        })
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RoutingError>>,
    ) -> Result<T, RoutingError> {
        match tokio::time::timeout(self.config.routing_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(RoutingError::Timeout),
        }
    }
}

/// Weighted penalty for a routed plan. Lower is better.
///
/// A missed or tight deadline can only raise the score: the SLA term is
/// `max(0, buffer - slack)` with a possibly negative slack.
pub fn score(
    config: &DispatchConfig,
    order: &DispatchOrder,
    courier: &DispatchCourier,
    total_distance_km: f64,
    dropoff_eta: DateTime<Utc>,
) -> f64 {
    let weights = &config.penalty_weights;
    let slack_minutes = minutes_between(dropoff_eta, order.deadline_at);
    let sla_penalty = (config.sla_buffer_minutes - slack_minutes).max(0.0);
    let overload = courier
        .completed_orders_today
        .saturating_add(1)
        .saturating_sub(config.target_orders_per_courier_per_day) as f64;

    weights.distance * total_distance_km
        + weights.sla * sla_penalty
        + weights.fairness * courier.current_load() as f64
        + weights.overload * overload
}

fn validate_order(order: &DispatchOrder) -> Result<(), DispatchError> {
    if !order.pickup.is_valid() {
        return Err(DispatchError::invalid(order, "pickup coordinates out of range"));
    }
    if !order.dropoff.is_valid() {
        return Err(DispatchError::invalid(order, "dropoff coordinates out of range"));
    }
    if order.deadline_at <= order.created_at {
        return Err(DispatchError::invalid(order, "deadline is not after creation time"));
    }
    if order.status != OrderStatus::Unassigned {
        return Err(DispatchError::invalid(order, format!("status is {:?}", order.status)));
    }
    Ok(())
}

fn trial_stops(
    courier: &DispatchCourier,
    order: &DispatchOrder,
    open_orders: &HashMap<OrderId, DispatchOrder>,
) -> Vec<PlannedStop> {
    let mut stops = Vec::new();
    for open_id in &courier.open_order_ids {
        // Unknown ids still count toward load but add no stops.
        let Some(open) = open_orders.get(open_id) else {
            continue;
        };
        stops.extend(open.remaining_stops().into_iter().map(|(stop_type, location)| PlannedStop {
            order_id: open.id.clone(),
            stop_type,
            location,
        }));
    }
    stops.extend(order.remaining_stops().into_iter().map(|(stop_type, location)| PlannedStop {
        order_id: order.id.clone(),
        stop_type,
        location,
    }));
    stops
}

/// Applies a provider visiting order, refusing any dropoff before its pickup.
fn reorder_stops(stops: &[PlannedStop], order: &[usize]) -> Result<Vec<PlannedStop>, RoutingError> {
    let reordered: Vec<PlannedStop> = order.iter().map(|&index| stops[index].clone()).collect();

    let mut picked: Vec<&OrderId> = Vec::new();
    for stop in &reordered {
        match stop.stop_type {
            StopType::Pickup => picked.push(&stop.order_id),
            StopType::Dropoff => {
                let has_pickup = stops
                    .iter()
                    .any(|s| s.order_id == stop.order_id && s.stop_type == StopType::Pickup);
                if has_pickup && !picked.contains(&&stop.order_id) {
                    return Err(RoutingError::Malformed(format!(
                        "dropoff for {} ordered before its pickup",
                        stop.order_id
                    )));
                }
            }
        }
    }
    Ok(reordered)
}

/// `None` when a cumulative ETA falls outside the representable time range.
fn build_plan(
    courier: &DispatchCourier,
    stops: Vec<PlannedStop>,
    route: RouteResponse,
    now: DateTime<Utc>,
) -> Option<CourierPlan> {
    let mut elapsed = 0.0;
    let stops = stops
        .into_iter()
        .zip(&route.legs)
        .map(|(stop, leg)| {
            elapsed += leg.duration_minutes;
            Some(RouteStop {
                order_id: stop.order_id,
                stop_type: stop.stop_type,
                location: stop.location,
                eta: add_minutes(now, elapsed)?,
            })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(CourierPlan {
        courier_id: courier.id.clone(),
        stops,
        total_distance_km: route.total_distance_km(),
        total_duration_minutes: route.total_duration_minutes(),
        polyline: route.polyline,
    })
}

/// Strictly lowest score wins; ties go to the smallest courier id.
fn select_best(scored: Vec<ScoredPlan<'_>>) -> Option<ScoredPlan<'_>> {
    scored.into_iter().min_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.candidate.courier.id.cmp(&b.candidate.courier.id))
    })
}
