// # Change Trigger Trait
//
// Decides when the next cycle starts in continuous mode.
//
// ## Implementations
//
// - `PollingTrigger`: samples the binding source's revision on a timer
// - `StreamTrigger`: wakes on items of any notification stream

use async_trait::async_trait;

/// Why the engine woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The configuration revision changed
    Changed,
    /// One wait period elapsed and a rerun was requested
    Rerun,
    /// A pushed notification arrived
    Notified,
}

/// Trait for continuous-mode schedulers
#[async_trait]
pub trait ChangeTrigger: Send {
    /// Capture the baseline the next [`wait`](Self::wait) compares against
    ///
    /// The engine calls this right before it fetches bindings, so a change
    /// landing while the cycle runs still wakes the following wait.
    async fn arm(&mut self);

    /// Block until the next cycle should start
    ///
    /// With `rerun` set the trigger wakes after at most one wait period even
    /// if nothing changed (force mode, or the previous cycle failed with a
    /// retryable error).
    ///
    /// # Returns
    ///
    /// - `Some(Wake)`: Start the next cycle
    /// - `None`: The trigger source is exhausted; the engine stops
    async fn wait(&mut self, rerun: bool) -> Option<Wake>;
}
