//! `surplus-infra` — infrastructure composition for the marketplace.
//!
//! Event store implementations, the command dispatch pipeline, disposable
//! read models/projections and the background job subsystem. Contains no
//! domain decisions; it composes the pure domain crates.

pub mod command_dispatcher;
pub mod event_store;
pub mod jobs;
pub mod projections;
pub mod read_model;

pub use command_dispatcher::{CommandDispatcher, DispatchError, rehydrate};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use read_model::{InMemoryStore, ReadModelStore};
