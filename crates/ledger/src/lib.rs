//! `surplus-ledger` — append-only balance ledger.
//!
//! User spending power is never a mutable column: it is the reduction of an
//! append-only journal of balanced entries.

pub mod ledger;

pub use ledger::{
    Account, EntryLine, EntryPosted, Ledger, LedgerCommand, LedgerEvent, LedgerId, PostEntry,
};
