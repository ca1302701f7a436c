//! Core traits for the lease sync system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`BindingSource`]: Read desired host bindings
//! - [`CacheStore`]: Persisted last-applied state
//! - [`UpdateApplier`]: Send DNS update transactions
//! - [`ChangeTrigger`]: Schedule the next cycle in continuous mode

pub mod binding_source;
pub mod cache_store;
pub mod change_trigger;
pub mod update_applier;

pub use binding_source::{BindingSource, Revision};
pub use cache_store::{CacheRecord, CacheStore, CacheStoreFactory};
pub use change_trigger::{ChangeTrigger, Wake};
pub use update_applier::{ApplyReport, UpdateApplier};
