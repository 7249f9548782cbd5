use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surplus_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use surplus_events::Event;

/// An account money can sit in.
///
/// `User` accounts carry real spending power and may never go negative.
/// `Escrow` holds amounts debited at placement until completion or
/// cancellation settles them. `External` is the counter-account for money
/// entering the system (deposits); both clearing accounts may float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "user_id")]
pub enum Account {
    User(UserId),
    Escrow,
    External,
}

impl Account {
    pub fn is_user(&self) -> bool {
        matches!(self, Account::User(_))
    }
}

/// One side of a ledger entry (immutable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLine {
    pub account: Account,
    /// Positive amount in smallest currency unit.
    pub amount: u64,
    /// true = debit (balance down), false = credit (balance up).
    pub is_debit: bool,
}

impl EntryLine {
    pub fn debit(account: Account, amount: u64) -> Self {
        Self {
            account,
            amount,
            is_debit: true,
        }
    }

    pub fn credit(account: Account, amount: u64) -> Self {
        Self {
            account,
            amount,
            is_debit: false,
        }
    }
}

/// Ledger identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(pub AggregateId);

impl LedgerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Ledger (double-entry journal).
///
/// The aggregate folds posted entries into per-account balances so it can
/// reject entries that would overdraw a user account. Queryable balances for
/// the API come from the projection, not from here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    balances: HashMap<Account, i64>,
    version: u64,
}

impl Ledger {
    /// Empty aggregate for rehydration.
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            balances: HashMap::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    /// Current balance of an account: credits minus debits.
    pub fn balance(&self, account: &Account) -> i64 {
        self.balances.get(account).copied().unwrap_or(0)
    }
}

impl AggregateRoot for Ledger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PostEntry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub ledger_id: LedgerId,
    pub entry_id: uuid::Uuid,
    pub lines: Vec<EntryLine>,
    pub memo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PostEntry {
    fn transfer(
        ledger_id: LedgerId,
        entry_id: uuid::Uuid,
        from: Account,
        to: Account,
        amount: u64,
        memo: &str,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ledger_id,
            entry_id,
            lines: vec![EntryLine::debit(from, amount), EntryLine::credit(to, amount)],
            memo: Some(memo.to_string()),
            occurred_at,
        }
    }

    /// Money enters the system: external → user.
    pub fn deposit(
        ledger_id: LedgerId,
        entry_id: uuid::Uuid,
        user: UserId,
        amount: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::transfer(
            ledger_id,
            entry_id,
            Account::External,
            Account::User(user),
            amount,
            "deposit",
            occurred_at,
        )
    }

    /// Placement debit: buyer → escrow.
    pub fn hold(
        ledger_id: LedgerId,
        entry_id: uuid::Uuid,
        buyer: UserId,
        amount: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::transfer(
            ledger_id,
            entry_id,
            Account::User(buyer),
            Account::Escrow,
            amount,
            "order hold",
            occurred_at,
        )
    }

    /// Completion credit: escrow → seller.
    pub fn release(
        ledger_id: LedgerId,
        entry_id: uuid::Uuid,
        seller: UserId,
        amount: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::transfer(
            ledger_id,
            entry_id,
            Account::Escrow,
            Account::User(seller),
            amount,
            "order completion",
            occurred_at,
        )
    }

    /// Cancellation credit: escrow → buyer.
    pub fn refund_hold(
        ledger_id: LedgerId,
        entry_id: uuid::Uuid,
        buyer: UserId,
        amount: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::transfer(
            ledger_id,
            entry_id,
            Account::Escrow,
            Account::User(buyer),
            amount,
            "order cancellation",
            occurred_at,
        )
    }

    /// Refund of a completed order: seller → buyer.
    pub fn claw_back(
        ledger_id: LedgerId,
        entry_id: uuid::Uuid,
        seller: UserId,
        buyer: UserId,
        amount: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::transfer(
            ledger_id,
            entry_id,
            Account::User(seller),
            Account::User(buyer),
            amount,
            "order refund",
            occurred_at,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    PostEntry(PostEntry),
}

/// Event: EntryPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPosted {
    pub ledger_id: LedgerId,
    pub entry_id: uuid::Uuid,
    pub lines: Vec<EntryLine>,
    pub memo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    EntryPosted(EntryPosted),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::EntryPosted(_) => "ledger.entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::EntryPosted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Ledger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::EntryPosted(e) => {
                self.id = e.ledger_id;
                for line in &e.lines {
                    let delta = signed_delta(line);
                    *self.balances.entry(line.account).or_insert(0) += delta;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::PostEntry(cmd) => self.handle_post(cmd),
        }
    }
}

impl Ledger {
    fn handle_post(&self, cmd: &PostEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("ledger entry must have lines"));
        }

        let mut debit_total: i128 = 0;
        let mut credit_total: i128 = 0;

        for line in &cmd.lines {
            if line.amount == 0 {
                return Err(DomainError::validation("amount must be positive"));
            }
            if line.is_debit {
                debit_total += line.amount as i128;
            } else {
                credit_total += line.amount as i128;
            }
        }

        if debit_total != credit_total {
            return Err(DomainError::invariant("debits must equal credits"));
        }

        // User accounts may never be overdrawn; clearing accounts may float.
        let mut prospective: HashMap<Account, i64> = HashMap::new();
        for line in &cmd.lines {
            let entry = prospective
                .entry(line.account)
                .or_insert_with(|| self.balance(&line.account));
            *entry += signed_delta(line);
        }
        for (account, balance) in &prospective {
            if account.is_user() && *balance < 0 {
                return Err(DomainError::insufficient_funds(format!(
                    "entry would overdraw account (balance {balance})"
                )));
            }
        }

        Ok(vec![LedgerEvent::EntryPosted(EntryPosted {
            ledger_id: cmd.ledger_id,
            entry_id: cmd.entry_id,
            lines: cmd.lines.clone(),
            memo: cmd.memo.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn signed_delta(line: &EntryLine) -> i64 {
    let amount = line.amount as i64;
    if line.is_debit { -amount } else { amount }
}
