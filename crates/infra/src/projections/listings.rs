use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use surplus_catalog::{ListingEvent, ListingId, ListingStatus};
use surplus_core::{AggregateId, UserId};
use surplus_events::EventEnvelope;

use crate::read_model::ReadModelStore;

/// Queryable listing read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingReadModel {
    pub listing_id: ListingId,
    pub store_id: UserId,
    pub title: String,
    pub description: String,
    pub contents: String,
    pub original_price: u64,
    pub discount_price: u64,
    pub quantity: i64,
    pub is_active: bool,
    /// Recomputed from `(quantity, is_active)` on every write.
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

impl ListingReadModel {
    pub fn is_available(&self) -> bool {
        self.status == ListingStatus::Available
    }

    fn refresh_status(&mut self) {
        self.status = ListingStatus::derive(self.quantity, self.is_active);
    }
}

#[derive(Debug, Error)]
pub enum ListingsProjectionError {
    #[error("failed to deserialize listing event: {0}")]
    Deserialize(String),

    #[error("event listing_id does not match envelope aggregate_id")]
    AggregateMismatch,

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Listings projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a disposable,
/// rebuildable read model of the catalog.
#[derive(Debug)]
pub struct ListingsProjection<S>
where
    S: ReadModelStore<ListingId, ListingReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> ListingsProjection<S>
where
    S: ReadModelStore<ListingId, ListingReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, listing_id: &ListingId) -> Option<ListingReadModel> {
        self.store.get(listing_id)
    }

    pub fn list(&self) -> Vec<ListingReadModel> {
        self.store.list()
    }

    pub fn list_for_store(&self, store_id: UserId) -> Vec<ListingReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|l| l.store_id == store_id)
            .collect()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces monotonic sequence per aggregate stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ListingsProjectionError> {
        if envelope.aggregate_type() != "catalog.listing" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Ok(mut cursors) = self.cursors.write() {
            let last = *cursors.get(&aggregate_id).unwrap_or(&0);

            if seq == 0 {
                return Err(ListingsProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                // Duplicate or replay; safe to ignore.
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(ListingsProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: ListingEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ListingsProjectionError::Deserialize(e.to_string()))?;

            let listing_id = match &ev {
                ListingEvent::ListingCreated(e) => e.listing_id,
                ListingEvent::ListingUpdated(e) => e.listing_id,
                ListingEvent::QuantityAdjusted(e) => e.listing_id,
                ListingEvent::ListingDeleted(e) => e.listing_id,
            };

            if listing_id.0 != aggregate_id {
                return Err(ListingsProjectionError::AggregateMismatch);
            }

            match ev {
                ListingEvent::ListingCreated(e) => {
                    let mut rm = ListingReadModel {
                        listing_id: e.listing_id,
                        store_id: e.store_id,
                        title: e.title,
                        description: e.description,
                        contents: e.contents,
                        original_price: e.original_price,
                        discount_price: e.discount_price,
                        quantity: e.quantity,
                        is_active: e.is_active,
                        status: ListingStatus::Sold,
                        created_at: e.occurred_at,
                    };
                    rm.refresh_status();
                    self.store.upsert(e.listing_id, rm);
                }
                ListingEvent::ListingUpdated(e) => {
                    if let Some(mut rm) = self.store.get(&e.listing_id) {
                        if let Some(title) = e.title {
                            rm.title = title;
                        }
                        if let Some(description) = e.description {
                            rm.description = description;
                        }
                        if let Some(contents) = e.contents {
                            rm.contents = contents;
                        }
                        if let Some(original_price) = e.original_price {
                            rm.original_price = original_price;
                        }
                        if let Some(discount_price) = e.discount_price {
                            rm.discount_price = discount_price;
                        }
                        if let Some(quantity) = e.quantity {
                            rm.quantity = quantity;
                        }
                        if let Some(is_active) = e.is_active {
                            rm.is_active = is_active;
                        }
                        rm.refresh_status();
                        self.store.upsert(e.listing_id, rm);
                    }
                }
                ListingEvent::QuantityAdjusted(e) => {
                    if let Some(mut rm) = self.store.get(&e.listing_id) {
                        rm.quantity += e.delta;
                        rm.refresh_status();
                        self.store.upsert(e.listing_id, rm);
                    }
                }
                ListingEvent::ListingDeleted(e) => {
                    self.store.remove(&e.listing_id);
                }
            }

            // Advance cursor after successful apply.
            cursors.insert(aggregate_id, seq);
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ListingsProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();

        // Deterministic replay order: aggregate, sequence.
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

    use surplus_catalog::{ListingCreated, ListingDeleted, QuantityAdjusted};

    use crate::read_model::InMemoryStore;

    fn make_envelope(listing_id: ListingId, seq: u64, event: ListingEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            listing_id.0,
            "catalog.listing".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn created(listing_id: ListingId, store_id: UserId, quantity: i64) -> ListingEvent {
        ListingEvent::ListingCreated(ListingCreated {
            listing_id,
            store_id,
            title: "Evening bag".to_string(),
            description: String::new(),
            contents: String::new(),
            original_price: 10_000,
            discount_price: 7_000,
            quantity,
            is_active: true,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn tracks_quantity_and_derived_status() {
        let store = Arc::new(InMemoryStore::<ListingId, ListingReadModel>::new());
        let proj = ListingsProjection::new(store);

        let listing_id = ListingId::new(AggregateId::new());
        let store_id = UserId::new();

        proj.apply_envelope(&make_envelope(listing_id, 1, created(listing_id, store_id, 2)))
            .unwrap();

        let rm = proj.get(&listing_id).unwrap();
        assert_eq!(rm.quantity, 2);
        assert_eq!(rm.status, ListingStatus::Available);

        proj.apply_envelope(&make_envelope(
            listing_id,
            2,
            ListingEvent::QuantityAdjusted(QuantityAdjusted {
                listing_id,
                delta: -2,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let rm = proj.get(&listing_id).unwrap();
        assert_eq!(rm.quantity, 0);
        assert_eq!(rm.status, ListingStatus::Sold);
    }

    #[test]
    fn replayed_envelopes_are_ignored() {
        let store = Arc::new(InMemoryStore::<ListingId, ListingReadModel>::new());
        let proj = ListingsProjection::new(store);

        let listing_id = ListingId::new(AggregateId::new());
        let env = make_envelope(listing_id, 1, created(listing_id, UserId::new(), 5));

        proj.apply_envelope(&env).unwrap();
        proj.apply_envelope(&env).unwrap();

        assert_eq!(proj.get(&listing_id).unwrap().quantity, 5);
    }

    #[test]
    fn deletion_removes_the_read_model() {
        let store = Arc::new(InMemoryStore::<ListingId, ListingReadModel>::new());
        let proj = ListingsProjection::new(store);

        let listing_id = ListingId::new(AggregateId::new());
        proj.apply_envelope(&make_envelope(listing_id, 1, created(listing_id, UserId::new(), 5)))
            .unwrap();
        proj.apply_envelope(&make_envelope(
            listing_id,
            2,
            ListingEvent::ListingDeleted(ListingDeleted {
                listing_id,
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        assert!(proj.get(&listing_id).is_none());
    }

    #[test]
    fn sequence_gaps_are_rejected() {
        let store = Arc::new(InMemoryStore::<ListingId, ListingReadModel>::new());
        let proj = ListingsProjection::new(store);

        let listing_id = ListingId::new(AggregateId::new());
        proj.apply_envelope(&make_envelope(listing_id, 1, created(listing_id, UserId::new(), 5)))
            .unwrap();

        let err = proj
            .apply_envelope(&make_envelope(
                listing_id,
                3,
                ListingEvent::QuantityAdjusted(QuantityAdjusted {
                    listing_id,
                    delta: -1,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            ListingsProjectionError::NonMonotonicSequence { last: 1, found: 3 }
        ));
    }
}
