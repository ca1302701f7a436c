// # leasesync-core
//
// Core library keeping DNS records in sync with static DHCP leases.
//
// ## Architecture Overview
//
// This library provides the core functionality for lease-driven DNS updates:
// - **BindingSource**: Trait for reading desired hostname → address bindings
// - **CacheStore**: Trait for the persisted last-applied state
// - **UpdateApplier**: Trait for sending DNS update transactions
// - **ChangeTrigger**: Trait deciding when the next cycle starts
// - **reconcile / TransactionBuilder**: Pure diffing and update planning
// - **SyncEngine**: Runs fetch → reconcile → apply → persist cycles
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from implementations
// 2. **Library-First**: All core functionality can be used as a library
// 3. **Idempotency**: Every update group can be replayed safely, and the
//    cache is only written after the server accepted the transaction

pub mod binding;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod traits;
pub mod transaction;
pub mod trigger;

// Re-export core types for convenience
pub use binding::{Binding, BindingKey, BindingSet};
pub use cache::{FileCacheStore, MemoryCacheStore, SqliteCacheStore};
pub use config::{
    ApplierConfig, CacheConfig, EngineConfig, RunMode, SourceConfig, SyncConfig, UpdateConfig,
};
pub use engine::{CycleReport, EngineEvent, SyncEngine};
pub use error::{Error, Result};
pub use reconcile::{LifecycleState, Reconciliation, reconcile};
pub use traits::{
    ApplyReport, BindingSource, CacheStore, CacheStoreFactory, ChangeTrigger, Revision,
    UpdateApplier,
};
pub use transaction::{Transaction, TransactionBuilder};
pub use trigger::{PollingTrigger, StreamTrigger};
