//! Sink port for live event delivery.
//!
//! The live tailer hands each normalized event to a sink after persistence.
//! Delivery is one-way and best-effort: sink failures are logged by the
//! caller and never reach the upstream subscription.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::TransferEvent;

/// Port for pushing live events downstream.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one normalized event.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails; the caller logs and drops it.
    async fn deliver(&self, event: &TransferEvent) -> Result<()>;
}

#[cfg(test)]
pub mod mocks {
    //! Mock implementations for testing.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::Mutex;

    use super::*;

    /// Mock sink that records delivered events and optionally fails.
    #[derive(Debug, Default)]
    pub struct MockEventSink {
        /// Events delivered so far.
        pub delivered: Mutex<Vec<TransferEvent>>,
        /// Whether to fail on delivery.
        pub should_fail: AtomicBool,
    }

    impl MockEventSink {
        /// Create a new mock sink.
        #[must_use]
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Number of events delivered.
        pub async fn count(&self) -> usize {
            self.delivered.lock().await.len()
        }

        /// Set whether to fail on delivery.
        pub fn set_should_fail(&self, should_fail: bool) {
            self.should_fail.store(should_fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EventSink for MockEventSink {
        async fn deliver(&self, event: &TransferEvent) -> Result<()> {
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(crate::error::AppError::Initialization(
                    "mock delivery failure".into(),
                ));
            }
            self.delivered.lock().await.push(event.clone());
            Ok(())
        }
    }
}
