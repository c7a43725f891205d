//! Batch loop tying the engine to its collaborators.
//!
//! One pass pulls pending orders and a courier snapshot, evaluates the whole
//! batch concurrently, then commits results one at a time. A commit that
//! loses a compare-and-set race gets a fresh snapshot and is re-evaluated,
//! up to `max_commit_retries` times.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{DispatchEngine, DispatchError};
use crate::model::{AssignmentResult, DispatchOrder, DispatchOutcome, DispatchSnapshot, OrderId, Unassignable};
use crate::traits::{AssignmentSink, CommitError, CourierSource, OrderSource, RoutingProvider, SourceError};

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Default, Serialize)]
pub struct DispatchReport {
    pub assigned: Vec<AssignmentResult>,
    pub unassignable: Vec<Unassignable>,
    /// Orders refused before evaluation.
    #[serde(skip)]
    pub rejected: Vec<DispatchError>,
    /// Orders that kept losing commit races, or whose re-evaluation could not
    /// get a fresh snapshot. They stay pending for the next pass.
    pub conflicted: Vec<OrderId>,
    /// Orders the sink refused for reasons other than a race, e.g. cancelled
    /// while being evaluated.
    #[serde(skip)]
    pub failed: Vec<(OrderId, CommitError)>,
}

pub struct Dispatcher<P, O, C, S> {
    engine: DispatchEngine<P>,
    orders: O,
    couriers: C,
    sink: S,
}

impl<P, O, C, S> Dispatcher<P, O, C, S>
where
    P: RoutingProvider,
    O: OrderSource,
    C: CourierSource,
    S: AssignmentSink,
{
    pub fn new(engine: DispatchEngine<P>, orders: O, couriers: C, sink: S) -> Self {
        Self {
            engine,
            orders,
            couriers,
            sink,
        }
    }

    pub fn engine(&self) -> &DispatchEngine<P> {
        &self.engine
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchReport, DispatcherError> {
        let mut report = DispatchReport::default();
        let orders = self.orders.pending_orders().await?;
        if orders.is_empty() {
            return Ok(report);
        }

        let mut snapshot = self.couriers.snapshot().await?;
        let outcomes = self.engine.evaluate_batch(&orders, &snapshot, now).await;

        for (order, outcome) in orders.iter().zip(outcomes) {
            self.settle(order, outcome, &mut snapshot, now, &mut report).await;
        }

        info!(
            orders = orders.len(),
            assigned = report.assigned.len(),
            unassignable = report.unassignable.len(),
            conflicted = report.conflicted.len(),
            "dispatch pass complete"
        );
        Ok(report)
    }

    async fn settle(
        &self,
        order: &DispatchOrder,
        mut outcome: Result<DispatchOutcome, DispatchError>,
        snapshot: &mut DispatchSnapshot,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) {
        let mut retries = 0;
        loop {
            let result = match outcome {
                Err(err) => {
                    warn!(order_id = %order.id, error = %err, "order rejected");
                    report.rejected.push(err);
                    return;
                }
                Ok(DispatchOutcome::Unassignable(unassignable)) => {
                    report.unassignable.push(unassignable);
                    return;
                }
                Ok(DispatchOutcome::Assigned(result)) => result,
            };

            match self.sink.commit(&result).await {
                Ok(()) => {
                    report.assigned.push(result);
                    return;
                }
                Err(CommitError::Conflict { .. }) if retries < self.engine.config().max_commit_retries => {
                    retries += 1;
                    warn!(
                        order_id = %order.id,
                        courier_id = %result.courier_id,
                        retries,
                        "commit conflict, re-evaluating"
                    );
                    match self.couriers.snapshot().await {
                        Ok(fresh) => *snapshot = fresh,
                        Err(err) => {
                            warn!(order_id = %order.id, error = %err, "snapshot refresh failed, leaving order pending");
                            report.conflicted.push(order.id.clone());
                            return;
                        }
                    }
                    outcome = self.engine.evaluate(order, snapshot, now).await;
                }
                Err(CommitError::Conflict { .. }) => {
                    report.conflicted.push(order.id.clone());
                    return;
                }
                Err(err) => {
                    warn!(order_id = %order.id, error = %err, "commit failed");
                    report.failed.push((order.id.clone(), err));
                    return;
                }
            }
        }
    }
}
