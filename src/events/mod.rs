//! Inconsistency events and the channel contract that moves them.
//!
//! The validator publishes, the fixer consumes. Delivery is at-least-once:
//! repair is idempotent, so a redelivered event is harmless.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub mod consumer;
pub mod memory;
pub mod producer;

pub use consumer::FixerConsumer;
pub use memory::{bus, BusPublisher, BusSubscription};
pub use producer::EventProducer;

/// Which store was treated as authoritative ("base") when the divergence was
/// observed. Determines which pre-built fixer handles the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "SRC")]
    Src,
    #[serde(rename = "DST")]
    Dst,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Src => "SRC",
            Direction::Dst => "DST",
        })
    }
}

/// The three ways two copies of a row can diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// Present in base, absent in target.
    TargetMissing,
    /// Present in target, absent in base.
    BaseMissing,
    /// Present in both, values differ.
    NotEqual,
}

impl fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InconsistencyKind::TargetMissing => "target_missing",
            InconsistencyKind::BaseMissing => "base_missing",
            InconsistencyKind::NotEqual => "not_equal",
        })
    }
}

/// One detected divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InconsistencyEvent {
    pub direction: Direction,
    pub id: i64,
    pub kind: InconsistencyKind,
}

/// One attempt at delivering an event to a consumer. `attempt` starts at 1
/// and counts redeliveries.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: InconsistencyEvent,
    pub attempt: u32,
}

/// Per-kind counters, the operator-facing observability surface for detected
/// divergence. Shared between validation runs so counts span a migration.
#[derive(Debug, Default)]
pub struct EventCounters {
    target_missing: AtomicU64,
    base_missing: AtomicU64,
    not_equal: AtomicU64,
}

impl EventCounters {
    pub fn record(&self, kind: InconsistencyKind) {
        let counter = match kind {
            InconsistencyKind::TargetMissing => &self.target_missing,
            InconsistencyKind::BaseMissing => &self.base_missing,
            InconsistencyKind::NotEqual => &self.not_equal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventCountersSnapshot {
        EventCountersSnapshot {
            target_missing: self.target_missing.load(Ordering::Relaxed),
            base_missing: self.base_missing.load(Ordering::Relaxed),
            not_equal: self.not_equal.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventCountersSnapshot {
    pub target_missing: u64,
    pub base_missing: u64,
    pub not_equal: u64,
}

impl EventCountersSnapshot {
    pub fn total(&self) -> u64 {
        self.target_missing + self.base_missing + self.not_equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_format_matches_the_control_plane() {
        let event = InconsistencyEvent {
            direction: Direction::Src,
            id: 42,
            kind: InconsistencyKind::TargetMissing,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["direction"], "SRC");
        assert_eq!(json["id"], 42);
        assert_eq!(json["kind"], "target_missing");

        let back: InconsistencyEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn counters_split_by_kind() {
        let counters = EventCounters::default();
        counters.record(InconsistencyKind::NotEqual);
        counters.record(InconsistencyKind::NotEqual);
        counters.record(InconsistencyKind::BaseMissing);
        let snap = counters.snapshot();
        assert_eq!(snap.not_equal, 2);
        assert_eq!(snap.base_missing, 1);
        assert_eq!(snap.target_missing, 0);
        assert_eq!(snap.total(), 3);
    }
}
