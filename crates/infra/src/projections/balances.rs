use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use surplus_core::{AggregateId, UserId};
use surplus_events::EventEnvelope;
use surplus_ledger::{Account, LedgerEvent};

use crate::read_model::ReadModelStore;

/// Read model: one balance per account, reduced from posted ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceReadModel {
    pub account: Account,
    /// Credits minus debits.
    pub balance: i64,
}

#[derive(Debug, Error)]
pub enum BalancesProjectionError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Balances projection: the summation view over the append-only ledger.
#[derive(Debug)]
pub struct BalancesProjection<S>
where
    S: ReadModelStore<Account, BalanceReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> BalancesProjection<S>
where
    S: ReadModelStore<Account, BalanceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, account: &Account) -> Option<BalanceReadModel> {
        self.store.get(account)
    }

    /// A user's spending power; absent account means zero.
    pub fn user_balance(&self, user_id: UserId) -> i64 {
        self.get(&Account::User(user_id)).map(|b| b.balance).unwrap_or(0)
    }

    pub fn list(&self) -> Vec<BalanceReadModel> {
        self.store.list()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), BalancesProjectionError> {
        if envelope.aggregate_type() != "ledger" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Ok(mut cursors) = self.cursors.write() {
            let last = *cursors.get(&aggregate_id).unwrap_or(&0);

            if seq == 0 {
                return Err(BalancesProjectionError::NonMonotonicSequence { last, found: seq });
            }

            if seq <= last {
                return Ok(());
            }

            if seq != last + 1 && last != 0 {
                return Err(BalancesProjectionError::NonMonotonicSequence { last, found: seq });
            }

            let ev: LedgerEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| BalancesProjectionError::Deserialize(e.to_string()))?;

            match ev {
                LedgerEvent::EntryPosted(e) => {
                    for line in &e.lines {
                        let mut rm = self.store.get(&line.account).unwrap_or(BalanceReadModel {
                            account: line.account,
                            balance: 0,
                        });
                        let amount = line.amount as i64;
                        rm.balance += if line.is_debit { -amount } else { amount };
                        self.store.upsert(line.account, rm);
                    }
                }
            }

            cursors.insert(aggregate_id, seq);
        }

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), BalancesProjectionError> {
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

    use chrono::Utc;
    use surplus_ledger::{EntryPosted, LedgerId, PostEntry};

    use crate::read_model::InMemoryStore;

    fn projection() -> BalancesProjection<Arc<InMemoryStore<Account, BalanceReadModel>>> {
        BalancesProjection::new(Arc::new(InMemoryStore::new()))
    }

    fn make_envelope(ledger_id: LedgerId, seq: u64, entry: PostEntry) -> EventEnvelope<JsonValue> {
        let event = LedgerEvent::EntryPosted(EntryPosted {
            ledger_id: entry.ledger_id,
            entry_id: entry.entry_id,
            lines: entry.lines,
            memo: entry.memo,
            occurred_at: entry.occurred_at,
        });
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            ledger_id.0,
            "ledger".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn reduces_entries_to_balances() {
        let proj = projection();
        let ledger_id = LedgerId::new(AggregateId::new());
        let buyer = UserId::new();

        proj.apply_envelope(&make_envelope(
            ledger_id,
            1,
            PostEntry::deposit(ledger_id, uuid::Uuid::now_v7(), buyer, 20_000, Utc::now()),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            ledger_id,
            2,
            PostEntry::hold(ledger_id, uuid::Uuid::now_v7(), buyer, 14_000, Utc::now()),
        ))
        .unwrap();

        assert_eq!(proj.user_balance(buyer), 6_000);
        assert_eq!(proj.get(&Account::Escrow).unwrap().balance, 14_000);

        // Books stay balanced in the reduced view too.
        let total: i64 = proj.list().iter().map(|b| b.balance).sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn unknown_user_reads_as_zero() {
        let proj = projection();
        assert_eq!(proj.user_balance(UserId::new()), 0);
    }

    #[test]
    fn replays_are_idempotent() {
        let proj = projection();
        let ledger_id = LedgerId::new(AggregateId::new());
        let user = UserId::new();

        let env = make_envelope(
            ledger_id,
            1,
            PostEntry::deposit(ledger_id, uuid::Uuid::now_v7(), user, 500, Utc::now()),
        );
        proj.apply_envelope(&env).unwrap();
        proj.apply_envelope(&env).unwrap();

        assert_eq!(proj.user_balance(user), 500);
    }
}
