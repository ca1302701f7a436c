//! Core sync engine
//!
//! The SyncEngine is responsible for:
//! - Reading the desired bindings via BindingSource
//! - Classifying them against the lease cache
//! - Sending the resulting DNS updates via UpdateApplier
//! - Persisting the cache after a successful apply
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐
//! │ BindingSource │─── Vec<Binding> ───┐
//! └───────────────┘                    │
//!                                      ▼
//!                             ┌──────────────┐        ┌───────────────┐
//!                             │  SyncEngine  │◄───────│ ChangeTrigger │
//!                             └──────────────┘  wake  └───────────────┘
//!                                      │
//!         ┌────────────────────────────┼────────────────────────────┐
//!         │                            │                            │
//!         ▼                            ▼                            ▼
//! ┌───────────────┐          ┌────────────────┐           ┌─────────────┐
//! │  CacheStore   │          │ UpdateApplier  │           │   Events    │
//! │ (diff, write) │          │ (transaction)  │           │  (notify)   │
//! └───────────────┘          └────────────────┘           └─────────────┘
//! ```
//!
//! ## Cycle
//!
//! 1. Fetching: read and validate the binding set
//! 2. Reconciling: open the cache and classify every key
//! 3. Applying: build the transaction and send it, bounded by a timeout
//! 4. Persisting: write the applied state back, one commit
//!
//! A failure in any phase ends the cycle. Nothing is persisted unless the
//! applier accepted the whole transaction, so the next cycle computes the
//! same diff and re-sends the same idempotent groups. The addresses a failed
//! transaction tried to add are remembered, so a retry after a config edit
//! clears them instead of adding next to them.

use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::binding::BindingSet;
use crate::config::{RunMode, SyncConfig};
use crate::error::{Error, Result};
use crate::reconcile::{LifecycleState, PersistSummary, Reconciliation, Unconfirmed, reconcile};
use crate::traits::{ApplyReport, BindingSource, CacheStoreFactory, ChangeTrigger, UpdateApplier};
use crate::transaction::{Transaction, TransactionBuilder};
use crate::trigger::PollingTrigger;

/// Phase a cycle was in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Fetching,
    Reconciling,
    Applying,
    Persisting,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Reconciling => "reconciling",
            Self::Applying => "applying",
            Self::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started { mode: RunMode, force: bool },

    /// A cycle began
    CycleStarted { cycle: u64 },

    /// Bindings were classified against the cache
    Classified {
        new: usize,
        updated: usize,
        unchanged: usize,
        deleted: usize,
    },

    /// Several bindings share one address
    ConflictDetected {
        address: Ipv4Addr,
        hostnames: Vec<String>,
    },

    /// Nothing to send
    UpToDate,

    /// The applier accepted the transaction
    TransactionApplied { groups: usize, dry_run: bool },

    /// The cache was written back
    CachePersisted { upserted: usize, deleted: usize },

    /// A cycle ended with an error
    CycleFailed { phase: CyclePhase, error: String },

    /// Engine stopped
    Stopped { reason: String },
}

/// Outcome of one successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub reconciliation: Reconciliation,
    /// Transaction handed to the applier (empty when up to date)
    pub transaction: Transaction,
    pub applied: Option<ApplyReport>,
    pub persisted: Option<PersistSummary>,
}

impl CycleReport {
    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_none()
    }

    pub fn is_dry_run(&self) -> bool {
        self.applied.as_ref().is_some_and(|report| report.dry_run)
    }
}

/// Core sync engine
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. One-shot: [`SyncEngine::run_once()`]; continuous: [`SyncEngine::run()`]
/// 3. Continuous mode runs until a shutdown signal or the trigger ends
///
/// ## Threading
///
/// Cycles never overlap: the engine runs fetch, reconcile, apply and
/// persist in sequence on the calling task and only suspends between
/// cycles inside the trigger.
pub struct SyncEngine {
    /// Where bindings come from
    source: Arc<dyn BindingSource>,

    /// Sends DNS updates
    applier: Box<dyn UpdateApplier>,

    /// Opens the lease cache once per cycle
    cache: Box<dyn CacheStoreFactory>,

    builder: TransactionBuilder,

    mode: RunMode,

    force: bool,

    dry_run: bool,

    poll_interval: Duration,

    apply_timeout: Duration,

    cycles: AtomicU64,

    /// Addresses of failed applies, until a cycle persists
    unconfirmed: Mutex<Unconfirmed>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new sync engine
    ///
    /// # Parameters
    ///
    /// - `source`: Binding source implementation
    /// - `applier`: Update applier implementation
    /// - `cache`: Cache store factory
    /// - `config`: Sync configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Arc<dyn BindingSource>,
        applier: Box<dyn UpdateApplier>,
        cache: Box<dyn CacheStoreFactory>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let builder = TransactionBuilder::new(config.update.ttl, config.update.reverse_suffix)
            .force(config.engine.force);

        let engine = Self {
            source,
            applier,
            cache,
            builder,
            mode: config.engine.mode,
            force: config.engine.force,
            dry_run: config.applier.dry_run,
            poll_interval: config.engine.effective_poll_interval(),
            apply_timeout: config.engine.apply_timeout(),
            cycles: AtomicU64::new(0),
            unconfirmed: Mutex::new(Unconfirmed::default()),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// The default continuous-mode trigger: revision polling on the
    /// configured interval
    pub fn polling_trigger(&self) -> PollingTrigger {
        PollingTrigger::new(self.source.clone(), self.poll_interval)
    }

    /// Run a single cycle
    ///
    /// # Returns
    ///
    /// - `Ok(CycleReport)`: The cycle completed (possibly with nothing to do)
    /// - `Err(Error)`: The phase that failed; the cache is untouched unless
    ///   the failure happened while persisting
    pub async fn run_once(&self) -> Result<CycleReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Starting sync cycle {}", cycle);
        self.emit_event(EngineEvent::CycleStarted { cycle });

        let mut phase = CyclePhase::Fetching;
        match self.execute_cycle(&mut phase).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Sync cycle {} failed while {}: {}", cycle, phase, e);
                self.emit_event(EngineEvent::CycleFailed {
                    phase,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run cycles until SIGINT/SIGTERM or until the trigger is exhausted
    ///
    /// Cycle errors are logged and reported as events; they never end the
    /// loop.
    pub async fn run(&self, trigger: Box<dyn ChangeTrigger>) -> Result<()> {
        self.run_internal(trigger, None).await
    }

    /// Run cycles until the given shutdown signal fires
    ///
    /// With `None` this behaves like [`run`](Self::run) and listens for OS
    /// signals instead.
    pub async fn run_with_shutdown(
        &self,
        trigger: Box<dyn ChangeTrigger>,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(trigger, shutdown_rx).await
    }

    async fn run_internal(
        &self,
        mut trigger: Box<dyn ChangeTrigger>,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            mode: self.mode,
            force: self.force,
        });
        info!(
            "Sync engine started (source={}, applier={}, cache={}, force={})",
            self.source.source_name(),
            self.applier.applier_name(),
            self.cache.backend_name(),
            self.force
        );

        let mut shutdown: Pin<Box<dyn Future<Output = ()> + Send>> = match shutdown_rx {
            Some(rx) => Box::pin(async move {
                let _ = rx.await;
            }),
            None => Box::pin(shutdown_signal()),
        };

        let reason = loop {
            trigger.arm().await;

            let rerun = match self.run_once().await {
                Ok(_) => self.force,
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Retrying on the next wake-up");
                    } else {
                        warn!("Waiting for a config change before the next cycle");
                    }
                    self.force || e.is_retryable()
                }
            };

            tokio::select! {
                wake = trigger.wait(rerun) => match wake {
                    Some(wake) => debug!("Woke up: {:?}", wake),
                    None => {
                        info!("Change trigger exhausted");
                        break "Trigger exhausted";
                    }
                },

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break "Shutdown signal";
                }
            }
        };

        self.emit_event(EngineEvent::Stopped {
            reason: reason.to_string(),
        });
        info!("Sync engine stopped");

        Ok(())
    }

    async fn execute_cycle(&self, phase: &mut CyclePhase) -> Result<CycleReport> {
        *phase = CyclePhase::Fetching;
        let bindings = self.source.fetch().await?;
        let current = BindingSet::new(bindings)?;
        debug!(
            "Fetched {} bindings from {}",
            current.len(),
            self.source.source_name()
        );

        *phase = CyclePhase::Reconciling;
        let cache = self.cache.open().await?;
        let mut reconciliation = reconcile(&current, cache.as_ref()).await?;
        {
            let unconfirmed = self.unconfirmed.lock().await;
            if !unconfirmed.is_empty() {
                info!(
                    "Clearing addresses of {} bindings from a failed apply",
                    unconfirmed.len()
                );
                reconciliation.carry_over(&unconfirmed);
            }
        }
        self.report_classification(&reconciliation);

        let transaction = self.builder.plan(&reconciliation);

        if transaction.is_empty() {
            info!("DNS records already up to date");
            self.unconfirmed.lock().await.clear();
            self.emit_event(EngineEvent::UpToDate);
            return Ok(CycleReport {
                reconciliation,
                transaction,
                applied: None,
                persisted: None,
            });
        }

        *phase = CyclePhase::Applying;
        info!(
            "Applying {} update groups via {}",
            transaction.len(),
            self.applier.applier_name()
        );
        let outcome = tokio::time::timeout(self.apply_timeout, self.applier.apply(&transaction))
            .await
            .map_err(|_| Error::ApplyTimeout(self.apply_timeout))
            .and_then(|result| result);
        let applied = match outcome {
            Ok(applied) => applied,
            Err(e) => {
                self.unconfirmed
                    .lock()
                    .await
                    .record(&reconciliation, self.force);
                return Err(e);
            }
        };
        self.emit_event(EngineEvent::TransactionApplied {
            groups: applied.groups_committed,
            dry_run: applied.dry_run,
        });

        if self.dry_run || applied.dry_run {
            info!("Dry run: lease cache left untouched");
            return Ok(CycleReport {
                reconciliation,
                transaction,
                applied: Some(applied),
                persisted: None,
            });
        }

        *phase = CyclePhase::Persisting;
        let summary = match reconciliation.persist(cache.as_ref()).await {
            Ok(summary) => summary,
            Err(e) => {
                self.unconfirmed
                    .lock()
                    .await
                    .record(&reconciliation, self.force);
                return Err(e);
            }
        };
        self.unconfirmed.lock().await.clear();
        info!(
            "Lease cache updated: {} upserted, {} deleted",
            summary.upserted, summary.deleted
        );
        self.emit_event(EngineEvent::CachePersisted {
            upserted: summary.upserted,
            deleted: summary.deleted,
        });

        Ok(CycleReport {
            reconciliation,
            transaction,
            applied: Some(applied),
            persisted: Some(summary),
        })
    }

    fn report_classification(&self, reconciliation: &Reconciliation) {
        for change in reconciliation.changes() {
            if change.state() == LifecycleState::Unchanged {
                debug!("{}", change);
            } else {
                info!("{}", change);
            }
        }

        self.emit_event(EngineEvent::Classified {
            new: reconciliation.new.len(),
            updated: reconciliation.updated.len(),
            unchanged: reconciliation.unchanged.len(),
            deleted: reconciliation.deleted.len(),
        });

        for conflict in &reconciliation.conflicts {
            warn!("Address conflict: {}", conflict);
            self.emit_event(EngineEvent::ConflictDetected {
                address: conflict.address,
                hostnames: conflict.keys.iter().map(ToString::to_string).collect(),
            });
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Never blocks: events are dropped when the channel is full
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Event channel full, dropping event. Consider increasing event_channel_capacity."
                );
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Event receiver dropped, discarding event");
            }
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
