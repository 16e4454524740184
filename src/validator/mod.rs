//! Consistency validation between the two stores.
//!
//! [`sweep::Validator`] runs the paired full/incremental table sweeps;
//! [`feed::ChangeFeedValidator`] re-checks a single row when a change-capture
//! event names it. Both publish through a shared [`Reporter`].

use std::sync::Arc;

use crate::events::{
    Direction, EventCounters, EventProducer, InconsistencyEvent, InconsistencyKind,
};

pub mod feed;
pub mod sweep;

pub use feed::ChangeFeedValidator;
pub use sweep::Validator;

/// Emits one inconsistency event: counts it, publishes it, and logs a publish
/// failure without failing the sweep (the next run will re-detect the row).
pub(crate) struct Reporter {
    direction: Direction,
    producer: Arc<dyn EventProducer>,
    counters: Arc<EventCounters>,
}

impl Reporter {
    pub(crate) fn new(direction: Direction, producer: Arc<dyn EventProducer>) -> Self {
        Self {
            direction,
            producer,
            counters: Arc::new(EventCounters::default()),
        }
    }

    pub(crate) fn with_counters(mut self, counters: Arc<EventCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub(crate) fn counters(&self) -> Arc<EventCounters> {
        Arc::clone(&self.counters)
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) async fn report(&self, id: i64, kind: InconsistencyKind) {
        self.counters.record(kind);
        let event = InconsistencyEvent {
            direction: self.direction,
            id,
            kind,
        };
        if let Err(err) = self.producer.publish(event).await {
            tracing::error!(%err, id, %kind, "failed to publish inconsistency event");
        }
    }
}
