// # Update Applier Trait
//
// Defines the interface for sending DNS update transactions to the server.
//
// ## Implementations
//
// - nsupdate (RFC 2136 + TSIG): `leasesync-nsupdate` crate

use async_trait::async_trait;

use crate::transaction::Transaction;

/// Outcome of a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Number of operation groups committed by the server
    pub groups_committed: usize,
    /// Nothing was sent; the engine must not persist the cache
    pub dry_run: bool,
}

impl ApplyReport {
    pub fn committed(groups: usize) -> Self {
        Self {
            groups_committed: groups,
            dry_run: false,
        }
    }

    pub fn dry_run() -> Self {
        Self {
            groups_committed: 0,
            dry_run: true,
        }
    }
}

/// Trait for update applier implementations
///
/// Each [`OperationGroup`](crate::transaction::OperationGroup) of the
/// transaction is its own commit boundary. On failure, groups before the
/// failing one may already be committed; the applier must not try to roll
/// them back. The engine relies on every group being idempotent and simply
/// re-issues the whole transaction on the next cycle.
///
/// Appliers do not retry, and they do not time themselves out: the engine
/// bounds every call with `apply_timeout_secs` and drops the future on
/// expiry, so implementations must release their resources on drop.
#[async_trait]
pub trait UpdateApplier: Send + Sync {
    /// Send a transaction
    ///
    /// # Returns
    ///
    /// - `Ok(ApplyReport)`: Every group was committed (or dry run)
    /// - `Err(Error::Apply)`: A group failed; carries the exit status of the
    ///   protocol exchange when there is one
    async fn apply(&self, transaction: &Transaction) -> Result<ApplyReport, crate::Error>;

    /// Applier name (for logging)
    fn applier_name(&self) -> &'static str;
}
