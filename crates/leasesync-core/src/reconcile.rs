//! Reconciliation of current bindings against the lease cache
//!
//! [`reconcile`] classifies every key of the current binding set and every
//! cached key into exactly one of four lists:
//!
//! | state       | key in current | key in cache | address      |
//! |-------------|----------------|--------------|--------------|
//! | `new`       | yes            | no           | current      |
//! | `updated`   | yes            | yes          | differs      |
//! | `unchanged` | yes            | yes          | equal        |
//! | `deleted`   | no             | yes          | cached       |
//!
//! The lists are disjoint by construction, and a binding's state is the list
//! it lives in, so nothing can reclassify it later in the cycle.
//!
//! The cache only records what the server accepted. Addresses a failed apply
//! may have written anyway are tracked in [`Unconfirmed`] and folded in with
//! [`Reconciliation::carry_over`], so the retry clears them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;

use crate::binding::{Binding, BindingKey, BindingSet};
use crate::error::Result;
use crate::traits::{CacheRecord, CacheStore};

/// Derived lifecycle state of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Unchanged,
    New,
    Updated,
    Deleted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unchanged => "UNCHANGED",
            Self::New => "NEW",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// A binding whose address changed since the last apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedBinding {
    pub binding: Binding,
    /// Address recorded in the cache
    pub previous: Ipv4Addr,
}

/// Several current bindings resolve to the same address
///
/// Their PTR records collide: whichever group is applied last wins the
/// reverse name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub address: Ipv4Addr,
    /// Colliding keys, sorted
    pub keys: Vec<BindingKey>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.keys.iter().map(ToString::to_string).collect();
        write!(f, "{} is bound to {}", self.address, names.join(", "))
    }
}

/// Borrowed view of one classified binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change<'a> {
    New(&'a Binding),
    Updated(&'a UpdatedBinding),
    Unchanged(&'a Binding),
    Deleted(&'a Binding),
}

impl<'a> Change<'a> {
    pub fn state(&self) -> LifecycleState {
        match self {
            Self::New(_) => LifecycleState::New,
            Self::Updated(_) => LifecycleState::Updated,
            Self::Unchanged(_) => LifecycleState::Unchanged,
            Self::Deleted(_) => LifecycleState::Deleted,
        }
    }

    /// The binding as it should be after this cycle (cached one for deletions)
    pub fn binding(&self) -> &'a Binding {
        match self {
            Self::New(b) | Self::Unchanged(b) | Self::Deleted(b) => b,
            Self::Updated(u) => &u.binding,
        }
    }

    pub fn key(&self) -> &'a BindingKey {
        &self.binding().key
    }
}

impl fmt::Display for Change<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated(u) => write!(f, "{}: {} (was {})", self.state(), u.binding, u.previous),
            other => write!(f, "{}: {}", other.state(), other.binding()),
        }
    }
}

/// Result of a reconciliation, four disjoint lists sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub new: Vec<Binding>,
    pub updated: Vec<UpdatedBinding>,
    pub unchanged: Vec<Binding>,
    pub deleted: Vec<Binding>,
    pub conflicts: Vec<Conflict>,
    /// PTR records left behind by a failed apply, as `key → stale address`
    pub stale_reverse: Vec<Binding>,
}

/// Cache writes performed by [`Reconciliation::persist`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub upserted: usize,
    pub deleted: usize,
}

impl Reconciliation {
    /// Every classified binding, ordered by state then key
    pub fn changes(&self) -> Vec<Change<'_>> {
        let mut changes = Vec::with_capacity(self.len());
        changes.extend(self.unchanged.iter().map(Change::Unchanged));
        changes.extend(self.new.iter().map(Change::New));
        changes.extend(self.updated.iter().map(Change::Updated));
        changes.extend(self.deleted.iter().map(Change::Deleted));
        changes
    }

    /// Bindings to hand to the transaction builder
    ///
    /// Without `force`, unchanged bindings are left out. With `force`,
    /// everything is an operand, deletions included, so a full resync still
    /// removes what disappeared from the config.
    pub fn operands(&self, force: bool) -> Vec<Change<'_>> {
        self.changes()
            .into_iter()
            .filter(|change| force || change.state() != LifecycleState::Unchanged)
            .collect()
    }

    /// Nothing to add, change or remove
    pub fn is_up_to_date(&self) -> bool {
        self.new.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.stale_reverse.is_empty()
    }

    /// Fold in addresses a failed apply may have left in DNS
    ///
    /// A key with an unconfirmed address other than its current one can no
    /// longer be sent add-only:
    /// - `new` and `unchanged` bindings become `updated`, with the stale
    ///   address as `previous`, so their RRsets are cleared first
    /// - keys gone from both the config and the cache become `deleted`
    /// - any further stale addresses end up in `stale_reverse`
    pub fn carry_over(&mut self, unconfirmed: &Unconfirmed) {
        for (key, addresses) in &unconfirmed.addresses {
            let current = self.current_address(key);
            let mut stale = addresses
                .iter()
                .copied()
                .filter(|address| Some(*address) != current);

            let Some(first) = stale.next() else {
                continue;
            };

            let covered = if let Some(pos) = self.new.iter().position(|b| &b.key == key) {
                let binding = self.new.remove(pos);
                self.updated.push(UpdatedBinding {
                    binding,
                    previous: first,
                });
                first
            } else if let Some(pos) = self.unchanged.iter().position(|b| &b.key == key) {
                let binding = self.unchanged.remove(pos);
                self.updated.push(UpdatedBinding {
                    binding,
                    previous: first,
                });
                first
            } else if let Some(updated) = self.updated.iter().find(|u| &u.binding.key == key) {
                updated.previous
            } else if let Some(deleted) = self.deleted.iter().find(|b| &b.key == key) {
                deleted.address
            } else {
                self.deleted.push(Binding {
                    key: key.clone(),
                    address: first,
                });
                first
            };

            for address in std::iter::once(first).chain(stale) {
                if address != covered {
                    self.stale_reverse.push(Binding {
                        key: key.clone(),
                        address,
                    });
                }
            }
        }

        self.updated.sort_by(|a, b| a.binding.key.cmp(&b.binding.key));
        self.deleted.sort_by(|a, b| a.key.cmp(&b.key));
    }

    fn current_address(&self, key: &BindingKey) -> Option<Ipv4Addr> {
        self.new
            .iter()
            .chain(self.unchanged.iter())
            .chain(self.updated.iter().map(|u| &u.binding))
            .find(|b| &b.key == key)
            .map(|b| b.address)
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.updated.len() + self.unchanged.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the applied state back: delete removed keys, upsert new and
    /// updated ones, then commit once.
    pub async fn persist(&self, cache: &dyn CacheStore) -> Result<PersistSummary> {
        for binding in &self.deleted {
            cache.delete(&binding.key).await?;
        }

        let upserts = self
            .new
            .iter()
            .chain(self.updated.iter().map(|u| &u.binding));
        let mut upserted = 0;
        for binding in upserts {
            cache.upsert(&binding.key, binding.address).await?;
            upserted += 1;
        }

        cache.commit().await?;

        Ok(PersistSummary {
            upserted,
            deleted: self.deleted.len(),
        })
    }
}

/// Addresses sent by applies that failed before the cache was written
///
/// The server may have committed any prefix of a failed transaction, so
/// every address it tried to add is remembered until a cycle persists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unconfirmed {
    addresses: BTreeMap<BindingKey, BTreeSet<Ipv4Addr>>,
}

impl Unconfirmed {
    /// Remember every address the operands of a failed apply may have added
    pub fn record(&mut self, reconciliation: &Reconciliation, force: bool) {
        for change in reconciliation.operands(force) {
            if change.state() != LifecycleState::Deleted {
                let binding = change.binding();
                self.addresses
                    .entry(binding.key.clone())
                    .or_default()
                    .insert(binding.address);
            }
        }
    }

    pub fn clear(&mut self) {
        self.addresses.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Number of keys with unconfirmed addresses
    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}

/// Classify the current binding set against the lease cache
pub async fn reconcile(current: &BindingSet, cache: &dyn CacheStore) -> Result<Reconciliation> {
    let cached = cache.list_all().await?;
    Ok(classify(current, cached))
}

/// Pure classification step of [`reconcile`]
pub fn classify(
    current: &BindingSet,
    cached: impl IntoIterator<Item = CacheRecord>,
) -> Reconciliation {
    let cached: BTreeMap<BindingKey, Ipv4Addr> = cached
        .into_iter()
        .map(|record| (record.key, record.address))
        .collect();

    let mut result = Reconciliation::default();

    for binding in current.iter() {
        match cached.get(&binding.key) {
            None => result.new.push(binding),
            Some(&previous) if previous != binding.address => {
                result.updated.push(UpdatedBinding { binding, previous })
            }
            Some(_) => result.unchanged.push(binding),
        }
    }

    for (key, address) in cached {
        if !current.contains(&key) {
            result.deleted.push(Binding { key, address });
        }
    }

    result.conflicts = find_conflicts(current);
    result
}

fn find_conflicts(current: &BindingSet) -> Vec<Conflict> {
    let mut by_address: HashMap<Ipv4Addr, Vec<BindingKey>> = HashMap::new();
    for binding in current.iter() {
        by_address.entry(binding.address).or_default().push(binding.key);
    }

    let mut conflicts: Vec<Conflict> = by_address
        .into_iter()
        .filter(|(_, keys)| keys.len() > 1)
        .map(|(address, mut keys)| {
            keys.sort();
            Conflict { address, keys }
        })
        .collect();
    conflicts.sort_by_key(|c| c.address);
    conflicts
}
