use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use surplus_catalog::ListingId;
use surplus_core::{AggregateId, UserId};
use surplus_events::EventEnvelope;
use surplus_orders::{OrderEvent, OrderId, OrderStatus};

use crate::read_model::ReadModelStore;

/// Line item as seen by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLineReadModel {
    pub line_no: u32,
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// Queryable order read model.
///
/// The total is intentionally absent: it is recomputed lazily from line
/// quantities and the listings' current discount prices at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReadModel {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLineReadModel>,
    pub created_at: DateTime<Utc>,
}

impl OrderReadModel {
    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn references_listing(&self, listing_id: &ListingId) -> bool {
        self.lines.iter().any(|l| l.listing_id == *listing_id)
    }

    pub fn touches_seller(&self, seller_id: UserId) -> bool {
        self.lines.iter().any(|l| l.seller_id == seller_id)
    }
}

#[derive(Debug, Error)]
pub enum OrdersProjectionError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),

    #[error("event order_id does not match envelope aggregate_id")]
    AggregateMismatch,

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Orders projection: current state of every order, queryable by buyer and
/// by the sellers its lines touch.
#[derive(Debug)]
pub struct OrdersProjection<S>
where
    S: ReadModelStore<OrderId, OrderReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> OrdersProjection<S>
where
    S: ReadModelStore<OrderId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<OrderReadModel> {
        self.store.get(order_id)
    }

    pub fn list_for_buyer(&self, buyer_id: UserId) -> Vec<OrderReadModel> {
        let mut orders: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|o| o.buyer_id == buyer_id)
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// The order reused for subsequent placements by this buyer, if any.
    pub fn find_open_for_buyer(&self, buyer_id: UserId) -> Option<OrderReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|o| o.buyer_id == buyer_id && o.is_open())
            .min_by_key(|o| o.created_at)
    }

    /// Orders containing at least one line sold by this seller.
    pub fn list_touching_seller(&self, seller_id: UserId) -> Vec<OrderReadModel> {
        let mut orders: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|o| o.touches_seller(seller_id))
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// Any non-cancelled order still referencing this listing?
    ///
    /// Used to protect listings from deletion while an order could still
    /// restore quantity onto them.
    pub fn any_open_reference(&self, listing_id: &ListingId) -> bool {
        self.store
            .list()
            .iter()
            .any(|o| o.status != OrderStatus::Cancelled && o.references_listing(listing_id))
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), OrdersProjectionError> {
        if envelope.aggregate_type() != "orders.order" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Ok(mut cursors) = self.cursors.write() {
            let last = *cursors.get(&aggregate_id).unwrap_or(&0);

            if seq == 0 {
                return Err(OrdersProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(OrdersProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: OrderEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| OrdersProjectionError::Deserialize(e.to_string()))?;

            let order_id = match &ev {
                OrderEvent::OrderOpened(e) => e.order_id,
                OrderEvent::LineAdded(e) => e.order_id,
                OrderEvent::OrderConfirmed(e) => e.order_id,
                OrderEvent::OrderCancelled(e) => e.order_id,
                OrderEvent::OrderCompleted(e) => e.order_id,
                OrderEvent::OrderRefunded(e) => e.order_id,
            };

            if order_id.0 != aggregate_id {
                return Err(OrdersProjectionError::AggregateMismatch);
            }

            match ev {
                OrderEvent::OrderOpened(e) => {
                    self.store.upsert(
                        e.order_id,
                        OrderReadModel {
                            order_id: e.order_id,
                            buyer_id: e.buyer_id,
                            status: OrderStatus::Pending,
                            lines: Vec::new(),
                            created_at: e.occurred_at,
                        },
                    );
                }
                OrderEvent::LineAdded(e) => {
                    if let Some(mut rm) = self.store.get(&e.order_id) {
                        rm.lines.push(OrderLineReadModel {
                            line_no: e.line_no,
                            listing_id: e.listing_id,
                            seller_id: e.seller_id,
                            quantity: e.quantity,
                            created_at: e.occurred_at,
                        });
                        self.store.upsert(e.order_id, rm);
                    }
                }
                OrderEvent::OrderConfirmed(e) => self.set_status(e.order_id, OrderStatus::Confirmed),
                OrderEvent::OrderCancelled(e) => self.set_status(e.order_id, OrderStatus::Cancelled),
                OrderEvent::OrderCompleted(e) => self.set_status(e.order_id, OrderStatus::Completed),
                OrderEvent::OrderRefunded(e) => self.set_status(e.order_id, OrderStatus::Cancelled),
            }

            cursors.insert(aggregate_id, seq);
        }

        Ok(())
    }

    fn set_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Some(mut rm) = self.store.get(&order_id) {
            rm.status = status;
            self.store.upsert(order_id, rm);
        }
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OrdersProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use surplus_orders::{LineAdded, OrderCancelled, OrderConfirmed, OrderOpened};

    use crate::read_model::InMemoryStore;

    fn make_envelope(order_id: OrderId, seq: u64, event: OrderEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            order_id.0,
            "orders.order".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn projection() -> OrdersProjection<Arc<InMemoryStore<OrderId, OrderReadModel>>> {
        OrdersProjection::new(Arc::new(InMemoryStore::new()))
    }

    fn opened(order_id: OrderId, buyer_id: UserId) -> OrderEvent {
        OrderEvent::OrderOpened(OrderOpened {
            order_id,
            buyer_id,
            occurred_at: Utc::now(),
        })
    }

    fn line(order_id: OrderId, line_no: u32, seller_id: UserId, quantity: i64) -> OrderEvent {
        OrderEvent::LineAdded(LineAdded {
            order_id,
            line_no,
            listing_id: ListingId::new(AggregateId::new()),
            seller_id,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn builds_order_with_lines() {
        let proj = projection();
        let order_id = OrderId::new(AggregateId::new());
        let buyer_id = UserId::new();
        let seller_id = UserId::new();

        proj.apply_envelope(&make_envelope(order_id, 1, opened(order_id, buyer_id)))
            .unwrap();
        proj.apply_envelope(&make_envelope(order_id, 2, line(order_id, 1, seller_id, 2)))
            .unwrap();

        let rm = proj.get(&order_id).unwrap();
        assert_eq!(rm.buyer_id, buyer_id);
        assert_eq!(rm.status, OrderStatus::Pending);
        assert_eq!(rm.lines.len(), 1);
        assert!(rm.touches_seller(seller_id));
    }

    #[test]
    fn open_order_lookup_ignores_closed_orders() {
        let proj = projection();
        let buyer_id = UserId::new();

        let cancelled = OrderId::new(AggregateId::new());
        proj.apply_envelope(&make_envelope(cancelled, 1, opened(cancelled, buyer_id)))
            .unwrap();
        proj.apply_envelope(&make_envelope(
            cancelled,
            2,
            OrderEvent::OrderCancelled(OrderCancelled {
                order_id: cancelled,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        assert!(proj.find_open_for_buyer(buyer_id).is_none());

        let open = OrderId::new(AggregateId::new());
        proj.apply_envelope(&make_envelope(open, 1, opened(open, buyer_id)))
            .unwrap();
        proj.apply_envelope(&make_envelope(
            open,
            2,
            OrderEvent::OrderConfirmed(OrderConfirmed {
                order_id: open,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        // Confirmed orders are still open for further placements.
        assert_eq!(proj.find_open_for_buyer(buyer_id).unwrap().order_id, open);
    }

    #[test]
    fn open_reference_protects_listings() {
        let proj = projection();
        let order_id = OrderId::new(AggregateId::new());
        let buyer_id = UserId::new();
        let listing_id = ListingId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(order_id, 1, opened(order_id, buyer_id)))
            .unwrap();
        proj.apply_envelope(&make_envelope(
            order_id,
            2,
            OrderEvent::LineAdded(LineAdded {
                order_id,
                line_no: 1,
                listing_id,
                seller_id: UserId::new(),
                quantity: 1,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        assert!(proj.any_open_reference(&listing_id));

        proj.apply_envelope(&make_envelope(
            order_id,
            3,
            OrderEvent::OrderCancelled(OrderCancelled {
                order_id,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        assert!(!proj.any_open_reference(&listing_id));
    }
}
