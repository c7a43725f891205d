//! In-process order/courier store implementing every collaborator trait.
//!
//! Commits are compare-and-set on the courier's open-order list, under one
//! mutex. Useful for embedding the dispatcher in tests or single-node tools.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::model::{
    AssignmentResult, CourierId, CourierPlan, DispatchCourier, DispatchOrder, DispatchSnapshot,
    OrderId, OrderStatus,
};
use crate::traits::{AssignmentSink, CommitError, CourierSource, OrderSource, SourceError};

#[derive(Debug, Default)]
struct StoreState {
    orders: HashMap<OrderId, DispatchOrder>,
    couriers: BTreeMap<CourierId, DispatchCourier>,
    plans: HashMap<CourierId, CourierPlan>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_order(&self, order: DispatchOrder) {
        self.lock().orders.insert(order.id.clone(), order);
    }

    pub fn upsert_courier(&self, courier: DispatchCourier) {
        self.lock().couriers.insert(courier.id.clone(), courier);
    }

    pub fn order(&self, id: &OrderId) -> Option<DispatchOrder> {
        self.lock().orders.get(id).cloned()
    }

    pub fn courier(&self, id: &CourierId) -> Option<DispatchCourier> {
        self.lock().couriers.get(id).cloned()
    }

    /// Latest committed plan for a courier.
    pub fn plan(&self, courier_id: &CourierId) -> Option<CourierPlan> {
        self.lock().plans.get(courier_id).cloned()
    }

    pub fn set_order_status(&self, id: &OrderId, status: OrderStatus) -> bool {
        match self.lock().orders.get_mut(id) {
            Some(order) => {
                order.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl OrderSource for InMemoryStore {
    /// Unassigned orders, oldest first.
    async fn pending_orders(&self) -> Result<Vec<DispatchOrder>, SourceError> {
        let mut pending: Vec<DispatchOrder> = self
            .lock()
            .orders
            .values()
            .filter(|order| order.status == OrderStatus::Unassigned)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }
}

#[async_trait]
impl CourierSource for InMemoryStore {
    async fn snapshot(&self) -> Result<DispatchSnapshot, SourceError> {
        let state = self.lock();
        let couriers: Vec<DispatchCourier> = state.couriers.values().cloned().collect();
        let open_orders = couriers
            .iter()
            .flat_map(|courier| courier.open_order_ids.iter())
            .filter_map(|id| state.orders.get(id).cloned())
            .collect::<Vec<_>>();
        Ok(DispatchSnapshot::new(couriers).with_open_orders(open_orders))
    }
}

#[async_trait]
impl AssignmentSink for InMemoryStore {
    async fn commit(&self, result: &AssignmentResult) -> Result<(), CommitError> {
        let mut state = self.lock();
        let state = &mut *state;

        let order = state
            .orders
            .get_mut(&result.order_id)
            .filter(|order| order.status == OrderStatus::Unassigned)
            .ok_or_else(|| CommitError::OrderNotPending(result.order_id.clone()))?;
        let courier = state
            .couriers
            .get_mut(&result.courier_id)
            .ok_or_else(|| CommitError::UnknownCourier(result.courier_id.clone()))?;

        if courier.open_order_ids != result.base_open_order_ids {
            return Err(CommitError::Conflict {
                order_id: result.order_id.clone(),
                courier_id: result.courier_id.clone(),
            });
        }

        order.status = OrderStatus::Assigned;
        courier.open_order_ids.push(result.order_id.clone());
        state.plans.insert(result.courier_id.clone(), result.plan.clone());
        Ok(())
    }
}
