//! Producer side of the inconsistency-event channel.

use async_trait::async_trait;

use crate::error::BusError;
use crate::events::InconsistencyEvent;

/// Publishes inconsistency events onto the bus.
///
/// Implementations must be safe to share across the two concurrent validator
/// sweeps. A Kafka-shaped transport slots in here; the in-memory bus in
/// [`crate::events::memory`] is the in-process implementation.
#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn publish(&self, event: InconsistencyEvent) -> Result<(), BusError>;
}

/// Consumer side: a stream of deliveries with explicit redelivery.
///
/// Completing `next()` without calling `redeliver` acknowledges the message.
/// Handlers are idempotent, so the contract is at-least-once.
#[async_trait]
pub trait EventSource: Send {
    /// Next delivery, or `None` once the channel is closed and drained.
    async fn next(&mut self) -> Option<crate::events::Delivery>;

    /// Put a failed delivery back on the channel with its attempt count
    /// bumped.
    fn redeliver(&mut self, delivery: crate::events::Delivery) -> Result<(), BusError>;
}
