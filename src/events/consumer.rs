//! The consuming end of the repair pipeline.
//!
//! Holds one pre-built fixer per direction of authority and dispatches each
//! delivery by the direction stamped on the event. A failed repair goes back
//! on the channel (at-least-once); after the attempt cap it is dropped with
//! an error log rather than wedging the partition.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::events::producer::EventSource;
use crate::events::{Delivery, Direction};
use crate::fixer::Fixer;
use crate::shutdown::CancelSignal;
use crate::store::RecordStore;

const DEFAULT_MAX_ATTEMPTS: u32 = 16;
const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

pub struct FixerConsumer<T: Entity> {
    src_authoritative: Fixer<T>,
    dst_authoritative: Fixer<T>,
    max_attempts: u32,
    fix_timeout: Duration,
    retry_backoff: Duration,
}

impl<T: Entity> FixerConsumer<T> {
    pub fn new(src: Arc<dyn RecordStore<T>>, dst: Arc<dyn RecordStore<T>>) -> Self {
        Self {
            src_authoritative: Fixer::new(Arc::clone(&src), Arc::clone(&dst)),
            dst_authoritative: Fixer::new(dst, src),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            fix_timeout: DEFAULT_FIX_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Apply the engine-wide tunables that concern the consumer.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.max_attempts = config.max_delivery_attempts.max(1);
        self.fix_timeout = config.fix_timeout;
        self
    }

    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn fix_timeout(mut self, fix_timeout: Duration) -> Self {
        self.fix_timeout = fix_timeout;
        self
    }

    /// Restrict both fixers' overwrite to these columns.
    pub fn columns(mut self, columns: &[&'static str]) -> Self {
        self.src_authoritative = self.src_authoritative.columns(columns);
        self.dst_authoritative = self.dst_authoritative.columns(columns);
        self
    }

    /// Consume until canceled or the channel closes.
    pub async fn run<S: EventSource>(&self, mut source: S, mut cancel: CancelSignal) {
        loop {
            tokio::select! {
                _ = cancel.canceled() => {
                    tracing::info!("fixer consumer shutting down");
                    return;
                }
                delivery = source.next() => {
                    match delivery {
                        None => {
                            tracing::info!("event channel closed; fixer consumer exiting");
                            return;
                        }
                        Some(delivery) => self.handle(&mut source, delivery).await,
                    }
                }
            }
        }
    }

    async fn handle<S: EventSource>(&self, source: &mut S, delivery: Delivery) {
        let event = &delivery.event;
        let fixer = match event.direction {
            Direction::Src => &self.src_authoritative,
            Direction::Dst => &self.dst_authoritative,
        };
        let result = match timeout(self.fix_timeout, fixer.fix(event.id)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("fix timed out after {:?}", self.fix_timeout)),
        };
        match result {
            Ok(()) => {}
            Err(err) => {
                if delivery.attempt >= self.max_attempts {
                    tracing::error!(
                        err,
                        id = event.id,
                        kind = %event.kind,
                        attempts = delivery.attempt,
                        "dropping inconsistency event after attempt cap"
                    );
                } else {
                    tracing::warn!(
                        err,
                        id = event.id,
                        kind = %event.kind,
                        attempt = delivery.attempt,
                        "repair failed; redelivering"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                    if let Err(send_err) = source.redeliver(delivery) {
                        tracing::error!(%send_err, "redelivery failed; event lost");
                    }
                }
            }
        }
    }
}
