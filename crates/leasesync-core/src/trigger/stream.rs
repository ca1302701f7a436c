// # Stream Trigger
//
// Push-based scheduler: every item of a notification stream starts a cycle.
// The end of the stream stops the engine.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::config::MIN_POLL_INTERVAL_SECS;
use crate::traits::{ChangeTrigger, Wake};

/// Wakes the engine on stream items
pub struct StreamTrigger<S> {
    stream: S,
    retry_period: Duration,
}

impl<S> StreamTrigger<S>
where
    S: Stream + Send + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            retry_period: Duration::from_secs(MIN_POLL_INTERVAL_SECS),
        }
    }

    /// How long to wait for a notification before a requested rerun
    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }
}

impl<T: Send> StreamTrigger<ReceiverStream<T>> {
    /// Trigger fed by an mpsc channel; dropping every sender stops the engine
    pub fn from_receiver(rx: mpsc::Receiver<T>) -> Self {
        Self::new(ReceiverStream::new(rx))
    }
}

#[async_trait]
impl<S> ChangeTrigger for StreamTrigger<S>
where
    S: Stream + Send + Unpin,
    S::Item: Send,
{
    async fn arm(&mut self) {}

    async fn wait(&mut self, rerun: bool) -> Option<Wake> {
        if !rerun {
            return self.stream.next().await.map(|_| Wake::Notified);
        }

        tokio::select! {
            item = self.stream.next() => item.map(|_| Wake::Notified),
            _ = tokio::time::sleep(self.retry_period) => Some(Wake::Rerun),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notification_wakes() {
        let (tx, rx) = mpsc::channel(4);
        let mut trigger = StreamTrigger::from_receiver(rx);

        tx.send(()).await.unwrap();
        assert_eq!(trigger.wait(false).await, Some(Wake::Notified));
    }

    #[tokio::test]
    async fn test_stream_end_stops() {
        let (tx, rx) = mpsc::channel::<()>(4);
        let mut trigger = StreamTrigger::from_receiver(rx);

        drop(tx);
        assert_eq!(trigger.wait(false).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_without_notification() {
        let (_tx, rx) = mpsc::channel::<()>(4);
        let mut trigger =
            StreamTrigger::from_receiver(rx).with_retry_period(Duration::from_secs(7));

        let start = tokio::time::Instant::now();
        assert_eq!(trigger.wait(true).await, Some(Wake::Rerun));
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }
}
