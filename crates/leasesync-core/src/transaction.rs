//! DNS update transactions
//!
//! [`TransactionBuilder`] turns classified bindings into a [`Transaction`]:
//! an ordered list of [`OperationGroup`]s, each of which the applier commits
//! on its own (one `send` per group in nsupdate terms).
//!
//! Per binding the builder emits:
//!
//! 1. a forward group for `hostname.domain.` (A)
//! 2. for an address change, a stale-reverse group removing the old PTR
//! 3. a reverse group for the address's `in-addr.arpa` name (PTR)
//!
//! Every group is safe to replay. Deletes run before adds, RRset deletes of
//! an absent RRset are no-ops, and adding an RR that already exists is a
//! no-op, so re-sending a group that was already committed changes nothing.
//!
//! Deleted bindings remove their PTR by exact data rather than the whole
//! RRset: if another binding took over the address in the same cycle, its
//! PTR survives no matter which group the server sees first.

use std::fmt;
use std::net::Ipv4Addr;

use crate::binding::{Binding, BindingKey, REVERSE_ZONE_SUFFIX, reverse_name};
use crate::reconcile::{Change, LifecycleState, Reconciliation};

/// Default TTL of generated records
pub const DEFAULT_TTL: u32 = 3600;

/// Record types the builder touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ptr,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::Ptr => f.write_str("PTR"),
        }
    }
}

/// A single RFC 2136 update operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateOp {
    /// Delete every record of `rtype` at `name`
    DeleteRrset { name: String, rtype: RecordType },
    /// Delete the record of `rtype` at `name` whose data is `data`
    DeleteRecord {
        name: String,
        rtype: RecordType,
        data: String,
    },
    /// Add a record
    Add {
        name: String,
        ttl: u32,
        rtype: RecordType,
        data: String,
    },
}

impl UpdateOp {
    pub fn name(&self) -> &str {
        match self {
            Self::DeleteRrset { name, .. }
            | Self::DeleteRecord { name, .. }
            | Self::Add { name, .. } => name,
        }
    }

    pub fn is_delete(&self) -> bool {
        !matches!(self, Self::Add { .. })
    }
}

/// Textual form shared by nsupdate scripts and logs, e.g.
/// `add host1.example.com. 3600 A 10.0.0.2`
impl fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteRrset { name, rtype } => write!(f, "delete {name} {rtype}"),
            Self::DeleteRecord { name, rtype, data } => write!(f, "delete {name} {rtype} {data}"),
            Self::Add {
                name,
                ttl,
                rtype,
                data,
            } => write!(f, "add {name} {ttl} {rtype} {data}"),
        }
    }
}

/// Which side of a binding a group updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// A record at `hostname.domain.`
    Forward,
    /// PTR record at the previous address after an address change
    StaleReverse,
    /// PTR record at the current address
    Reverse,
}

/// Operations committed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationGroup {
    pub key: BindingKey,
    pub kind: GroupKind,
    pub state: LifecycleState,
    pub ops: Vec<UpdateOp>,
}

/// Ordered sequence of independently committed groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    groups: Vec<OperationGroup>,
}

impl Transaction {
    pub fn groups(&self) -> &[OperationGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every operation in send order
    pub fn ops(&self) -> impl Iterator<Item = &UpdateOp> {
        self.groups.iter().flat_map(|group| group.ops.iter())
    }
}

/// Builds update transactions from classified bindings
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    ttl: u32,
    reverse_suffix: String,
    force: bool,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, REVERSE_ZONE_SUFFIX)
    }
}

impl TransactionBuilder {
    pub fn new(ttl: u32, reverse_suffix: impl Into<String>) -> Self {
        Self {
            ttl,
            reverse_suffix: reverse_suffix.into(),
            force: false,
        }
    }

    /// Full resync: clear existing RRsets before every add, new bindings included
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn build(&self, changes: &[Change<'_>]) -> Transaction {
        let groups = changes
            .iter()
            .flat_map(|change| self.groups_for(change))
            .collect();
        Transaction { groups }
    }

    /// Transaction for a whole reconciliation: its operands, then the
    /// removal of PTR records a failed apply left at stale addresses
    pub fn plan(&self, reconciliation: &Reconciliation) -> Transaction {
        let mut transaction = self.build(&reconciliation.operands(self.force));
        transaction.groups.extend(
            reconciliation
                .stale_reverse
                .iter()
                .map(|stale| self.stale_reverse_group(stale, stale.address)),
        );
        transaction
    }

    fn stale_reverse_group(&self, binding: &Binding, stale: Ipv4Addr) -> OperationGroup {
        OperationGroup {
            key: binding.key.clone(),
            kind: GroupKind::StaleReverse,
            state: LifecycleState::Updated,
            ops: vec![UpdateOp::DeleteRecord {
                name: reverse_name(stale, &self.reverse_suffix),
                rtype: RecordType::Ptr,
                data: binding.fqdn(),
            }],
        }
    }

    fn groups_for(&self, change: &Change<'_>) -> Vec<OperationGroup> {
        let binding = change.binding();
        let state = change.state();
        let fqdn = binding.fqdn();
        let ptr_name = reverse_name(binding.address, &self.reverse_suffix);
        let group = |kind, ops| OperationGroup {
            key: binding.key.clone(),
            kind,
            state,
            ops,
        };

        if state == LifecycleState::Deleted {
            return vec![
                group(
                    GroupKind::Forward,
                    vec![UpdateOp::DeleteRrset {
                        name: fqdn.clone(),
                        rtype: RecordType::A,
                    }],
                ),
                group(
                    GroupKind::Reverse,
                    vec![UpdateOp::DeleteRecord {
                        name: ptr_name,
                        rtype: RecordType::Ptr,
                        data: fqdn,
                    }],
                ),
            ];
        }

        let clear_first = self.force || state != LifecycleState::New;
        let mut groups = Vec::with_capacity(3);

        groups.push(group(
            GroupKind::Forward,
            self.replace(&fqdn, RecordType::A, binding.address.to_string(), clear_first),
        ));

        if let Change::Updated(updated) = change
            && updated.previous != binding.address
        {
            groups.push(self.stale_reverse_group(binding, updated.previous));
        }

        groups.push(group(
            GroupKind::Reverse,
            self.replace(&ptr_name, RecordType::Ptr, fqdn, clear_first),
        ));

        groups
    }

    fn replace(
        &self,
        name: &str,
        rtype: RecordType,
        data: String,
        clear_first: bool,
    ) -> Vec<UpdateOp> {
        let mut ops = Vec::with_capacity(2);
        if clear_first {
            ops.push(UpdateOp::DeleteRrset {
                name: name.to_string(),
                rtype,
            });
        }
        ops.push(UpdateOp::Add {
            name: name.to_string(),
            ttl: self.ttl,
            rtype,
            data,
        });
        ops
    }
}
