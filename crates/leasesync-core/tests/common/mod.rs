//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles: a scripted binding source, an
//! applier that plays transactions against an in-memory zone, and appliers
//! that fail or hang on purpose.

#![allow(dead_code)]

use async_trait::async_trait;
use leasesync_core::cache::{MemoryCacheStore, MemoryCacheStoreFactory};
use leasesync_core::config::CacheConfig;
use leasesync_core::error::{Error, Result};
use leasesync_core::traits::{
    ApplyReport, BindingSource, CacheStore, CacheStoreFactory, Revision, UpdateApplier,
};
use leasesync_core::transaction::{RecordType, Transaction, UpdateOp};
use leasesync_core::{Binding, EngineEvent, SyncConfig, SyncEngine};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shorthand for a binding in `example.com` on `10.0.0.0/24`
pub fn binding(host: &str, last_octet: u8) -> Binding {
    Binding::new("example.com", host, Ipv4Addr::new(10, 0, 0, last_octet))
}

/// A binding source whose bindings the test rewrites at will
///
/// Every [`set_bindings`](Self::set_bindings) bumps the revision, like an
/// edit of the real config file would.
#[derive(Clone)]
pub struct ScriptedSource {
    bindings: Arc<Mutex<Vec<Binding>>>,
    revision: Arc<AtomicUsize>,
    fetch_error: Arc<Mutex<Option<String>>>,
    fetch_call_count: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(bindings: Vec<Binding>) -> Arc<Self> {
        Arc::new(Self {
            bindings: Arc::new(Mutex::new(bindings)),
            revision: Arc::new(AtomicUsize::new(1)),
            fetch_error: Arc::new(Mutex::new(None)),
            fetch_call_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_bindings(&self, bindings: Vec<Binding>) {
        *self.bindings.lock().unwrap() = bindings;
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Make every fetch fail with a parse error until cleared
    pub fn set_parse_error(&self, message: Option<&str>) {
        *self.fetch_error.lock().unwrap() = message.map(str::to_string);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BindingSource for ScriptedSource {
    async fn fetch(&self) -> Result<Vec<Binding>> {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fetch_error.lock().unwrap().clone() {
            return Err(Error::config_parse(message));
        }
        Ok(self.bindings.lock().unwrap().clone())
    }

    async fn revision(&self) -> Result<Option<Revision>> {
        let revision = self.revision.load(Ordering::SeqCst);
        Ok(Some(Revision::new(revision.to_string())))
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// In-memory DNS data: a set of `(owner, type, data)` records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeZone {
    records: HashSet<(String, RecordType, String)>,
}

impl FakeZone {
    pub fn apply_op(&mut self, op: &UpdateOp) {
        match op {
            UpdateOp::DeleteRrset { name, rtype } => {
                self.records.retain(|(n, t, _)| !(n == name && t == rtype));
            }
            UpdateOp::DeleteRecord { name, rtype, data } => {
                self.records
                    .remove(&(name.clone(), *rtype, data.clone()));
            }
            UpdateOp::Add {
                name, rtype, data, ..
            } => {
                self.records.insert((name.clone(), *rtype, data.clone()));
            }
        }
    }

    pub fn apply(&mut self, transaction: &Transaction) {
        for op in transaction.ops() {
            self.apply_op(op);
        }
    }

    /// Data of every record of `rtype` at `name`, sorted
    pub fn lookup(&self, name: &str, rtype: RecordType) -> Vec<String> {
        let mut data: Vec<String> = self
            .records
            .iter()
            .filter(|(n, t, _)| n == name && *t == rtype)
            .map(|(_, _, d)| d.clone())
            .collect();
        data.sort();
        data
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// An applier that plays every transaction against a [`FakeZone`]
pub struct RecordingApplier {
    zone: Arc<Mutex<FakeZone>>,
    transactions: Arc<Mutex<Vec<Transaction>>>,
    apply_call_count: Arc<AtomicUsize>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self {
            zone: Arc::new(Mutex::new(FakeZone::default())),
            transactions: Arc::new(Mutex::new(Vec::new())),
            apply_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a new RecordingApplier that shares its zone and counters
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            zone: Arc::clone(&other.zone),
            transactions: Arc::clone(&other.transactions),
            apply_call_count: Arc::clone(&other.apply_call_count),
        }
    }

    pub fn apply_call_count(&self) -> usize {
        self.apply_call_count.load(Ordering::SeqCst)
    }

    pub fn zone(&self) -> FakeZone {
        self.zone.lock().unwrap().clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions.lock().unwrap().clone()
    }

    pub fn last_transaction(&self) -> Option<Transaction> {
        self.transactions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl UpdateApplier for RecordingApplier {
    async fn apply(&self, transaction: &Transaction) -> Result<ApplyReport> {
        self.apply_call_count.fetch_add(1, Ordering::SeqCst);
        self.zone.lock().unwrap().apply(transaction);
        self.transactions.lock().unwrap().push(transaction.clone());
        Ok(ApplyReport::committed(transaction.len()))
    }

    fn applier_name(&self) -> &'static str {
        "recording"
    }
}

/// An applier that commits the first `commit_groups` groups, then fails
pub struct FailingApplier {
    zone: Arc<Mutex<FakeZone>>,
    commit_groups: usize,
    apply_call_count: Arc<AtomicUsize>,
}

impl FailingApplier {
    pub fn new(commit_groups: usize) -> Self {
        Self {
            zone: Arc::new(Mutex::new(FakeZone::default())),
            commit_groups,
            apply_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn apply_call_count(&self) -> usize {
        self.apply_call_count.load(Ordering::SeqCst)
    }

    pub fn zone(&self) -> FakeZone {
        self.zone.lock().unwrap().clone()
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            zone: Arc::clone(&other.zone),
            commit_groups: other.commit_groups,
            apply_call_count: Arc::clone(&other.apply_call_count),
        }
    }
}

#[async_trait]
impl UpdateApplier for FailingApplier {
    async fn apply(&self, transaction: &Transaction) -> Result<ApplyReport> {
        self.apply_call_count.fetch_add(1, Ordering::SeqCst);
        let mut zone = self.zone.lock().unwrap();
        for group in transaction.groups().iter().take(self.commit_groups) {
            for op in &group.ops {
                zone.apply_op(op);
            }
        }
        Err(Error::apply("failing", Some(2), "update failed: REFUSED"))
    }

    fn applier_name(&self) -> &'static str {
        "failing"
    }
}

/// An applier that fails its first `failures` calls after committing
/// `commit_groups` groups, then commits everything
pub struct FlakyApplier {
    zone: Arc<Mutex<FakeZone>>,
    transactions: Arc<Mutex<Vec<Transaction>>>,
    failures: usize,
    commit_groups: usize,
    apply_call_count: Arc<AtomicUsize>,
}

impl FlakyApplier {
    pub fn new(failures: usize, commit_groups: usize) -> Self {
        Self {
            zone: Arc::new(Mutex::new(FakeZone::default())),
            transactions: Arc::new(Mutex::new(Vec::new())),
            failures,
            commit_groups,
            apply_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            zone: Arc::clone(&other.zone),
            transactions: Arc::clone(&other.transactions),
            failures: other.failures,
            commit_groups: other.commit_groups,
            apply_call_count: Arc::clone(&other.apply_call_count),
        }
    }

    pub fn apply_call_count(&self) -> usize {
        self.apply_call_count.load(Ordering::SeqCst)
    }

    pub fn zone(&self) -> FakeZone {
        self.zone.lock().unwrap().clone()
    }

    pub fn last_transaction(&self) -> Option<Transaction> {
        self.transactions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl UpdateApplier for FlakyApplier {
    async fn apply(&self, transaction: &Transaction) -> Result<ApplyReport> {
        let call = self.apply_call_count.fetch_add(1, Ordering::SeqCst);
        self.transactions.lock().unwrap().push(transaction.clone());
        let mut zone = self.zone.lock().unwrap();

        if call < self.failures {
            for group in transaction.groups().iter().take(self.commit_groups) {
                for op in &group.ops {
                    zone.apply_op(op);
                }
            }
            return Err(Error::apply("flaky", Some(2), "update failed: SERVFAIL"));
        }

        zone.apply(transaction);
        Ok(ApplyReport::committed(transaction.len()))
    }

    fn applier_name(&self) -> &'static str {
        "flaky"
    }
}

/// An applier that never finishes
pub struct HangingApplier;

#[async_trait]
impl UpdateApplier for HangingApplier {
    async fn apply(&self, _transaction: &Transaction) -> Result<ApplyReport> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok(ApplyReport::committed(0))
    }

    fn applier_name(&self) -> &'static str {
        "hanging"
    }
}

/// A cache factory whose store can never be opened
pub struct UnavailableCacheFactory;

#[async_trait]
impl CacheStoreFactory for UnavailableCacheFactory {
    async fn open(&self) -> Result<Box<dyn CacheStore>> {
        Err(Error::cache_store("database is locked"))
    }

    fn backend_name(&self) -> &'static str {
        "unavailable"
    }
}

/// Helper to create a minimal SyncConfig for testing
pub fn minimal_config() -> SyncConfig {
    let mut config = SyncConfig::new("c2VjcmV0");
    config.cache = CacheConfig::Memory;
    config.engine.event_channel_capacity = 100;
    config
}

/// Engine wired to a scripted source, an applier and a shared memory cache
pub fn engine_with(
    source: &Arc<ScriptedSource>,
    applier: impl UpdateApplier + 'static,
    cache: &MemoryCacheStore,
    config: SyncConfig,
) -> (SyncEngine, mpsc::Receiver<EngineEvent>) {
    SyncEngine::new(
        source.clone(),
        Box::new(applier),
        Box::new(MemoryCacheStoreFactory::new(cache.clone())),
        config,
    )
    .expect("engine construction succeeds")
}

/// Drain every event currently queued
pub fn drain_events(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
