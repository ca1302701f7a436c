// # Polling Trigger
//
// Samples the binding source's revision once per period and wakes the
// engine when it differs from the baseline captured before the last cycle.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MIN_POLL_INTERVAL_SECS;
use crate::traits::{BindingSource, ChangeTrigger, Revision, Wake};

/// Revision-polling scheduler
pub struct PollingTrigger {
    source: Arc<dyn BindingSource>,
    period: Duration,
    baseline: Option<Revision>,
}

impl PollingTrigger {
    /// Create a trigger polling `source` every `period`
    ///
    /// Periods shorter than five seconds are raised to five seconds.
    pub fn new(source: Arc<dyn BindingSource>, period: Duration) -> Self {
        Self {
            source,
            period: period.max(Duration::from_secs(MIN_POLL_INTERVAL_SECS)),
            baseline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    async fn sample(&self) -> Option<Revision> {
        match self.source.revision().await {
            Ok(revision) => revision,
            Err(e) => {
                warn!(
                    "Failed to read revision of {}: {}",
                    self.source.source_name(),
                    e
                );
                None
            }
        }
    }
}

#[async_trait]
impl ChangeTrigger for PollingTrigger {
    async fn arm(&mut self) {
        self.baseline = self.sample().await;
        debug!("Polling baseline: {:?}", self.baseline);
    }

    async fn wait(&mut self, rerun: bool) -> Option<Wake> {
        loop {
            tokio::time::sleep(self.period).await;

            let current = self.sample().await;
            if current.is_some() && current != self.baseline {
                debug!("Revision changed: {:?} -> {:?}", self.baseline, current);
                return Some(Wake::Changed);
            }
            if rerun {
                return Some(Wake::Rerun);
            }

            info!("No config changes detected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::binding::Binding;
    use std::sync::Mutex;

    struct RevisionOnly {
        revision: Mutex<Option<Revision>>,
    }

    impl RevisionOnly {
        fn new(marker: &str) -> Arc<Self> {
            Arc::new(Self {
                revision: Mutex::new(Some(Revision::new(marker))),
            })
        }

        fn touch(&self, marker: &str) {
            *self.revision.lock().unwrap() = Some(Revision::new(marker));
        }
    }

    #[async_trait]
    impl BindingSource for RevisionOnly {
        async fn fetch(&self) -> Result<Vec<Binding>, Error> {
            Ok(Vec::new())
        }

        async fn revision(&self) -> Result<Option<Revision>, Error> {
            Ok(self.revision.lock().unwrap().clone())
        }

        fn source_name(&self) -> &'static str {
            "revision-only"
        }
    }

    #[test]
    fn test_period_floor() {
        let trigger = PollingTrigger::new(RevisionOnly::new("r1"), Duration::from_secs(1));
        assert_eq!(trigger.period(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wakes_on_revision_change() {
        let source = RevisionOnly::new("r1");
        let mut trigger = PollingTrigger::new(source.clone(), Duration::from_secs(10));
        trigger.arm().await;

        let touch = {
            let source = source.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(25)).await;
                source.touch("r2");
            }
        };

        let start = tokio::time::Instant::now();
        let (wake, _) = tokio::join!(trigger.wait(false), touch);

        assert_eq!(wake, Some(Wake::Changed));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_wakes_after_one_period() {
        let mut trigger = PollingTrigger::new(RevisionOnly::new("r1"), Duration::from_secs(10));
        trigger.arm().await;

        let start = tokio::time::Instant::now();
        assert_eq!(trigger.wait(true).await, Some(Wake::Rerun));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_revision_keeps_waiting() {
        let mut trigger = PollingTrigger::new(RevisionOnly::new("r1"), Duration::from_secs(10));
        trigger.arm().await;

        let result = tokio::time::timeout(Duration::from_secs(55), trigger.wait(false)).await;
        assert!(result.is_err(), "no change means no wake");
    }
}
