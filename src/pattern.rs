//! Routing patterns and the shared handle the dual-write pool reads.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::events::Direction;

/// The active routing mode of the dual-write pool.
///
/// An operator walks a migration through these in order:
/// `SrcOnly` → `SrcFirst` → `DstFirst` → `DstOnly`, draining divergence with
/// a validation run between each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Pattern {
    SrcOnly = 0,
    SrcFirst = 1,
    DstFirst = 2,
    DstOnly = 3,
}

impl Pattern {
    /// Whether writes are duplicated to a secondary store.
    pub fn is_dual(self) -> bool {
        matches!(self, Pattern::SrcFirst | Pattern::DstFirst)
    }

    /// Whether the source store is primary (reads and first writes).
    pub fn primary_is_src(self) -> bool {
        matches!(self, Pattern::SrcOnly | Pattern::SrcFirst)
    }

    /// Which store a validation run started under this pattern treats as
    /// authoritative.
    pub fn authority(self) -> Direction {
        if self.primary_is_src() {
            Direction::Src
        } else {
            Direction::Dst
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Pattern::SrcOnly => "src_only",
            Pattern::SrcFirst => "src_first",
            Pattern::DstFirst => "dst_first",
            Pattern::DstOnly => "dst_only",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "src_only" => Ok(Pattern::SrcOnly),
            "src_first" => Ok(Pattern::SrcFirst),
            "dst_first" => Ok(Pattern::DstFirst),
            "dst_only" => Ok(Pattern::DstOnly),
            other => Err(SchedulerError::UnknownPattern(other.to_string())),
        }
    }
}

/// The one piece of shared mutable routing state.
///
/// Constructed once at wiring time and handed to both the dual-write pool and
/// the scheduler; the pool loads it atomically before *every* operation, so a
/// pattern change takes effect mid-stream (an in-flight transaction keeps the
/// lanes it captured at begin time). Defaults to `SrcOnly` — a restart never
/// silently resumes dual-write.
#[derive(Debug, Clone)]
pub struct SharedPattern(Arc<AtomicU8>);

impl SharedPattern {
    pub fn new(initial: Pattern) -> Self {
        Self(Arc::new(AtomicU8::new(initial as u8)))
    }

    pub fn load(&self) -> Pattern {
        match self.0.load(Ordering::Acquire) {
            0 => Pattern::SrcOnly,
            1 => Pattern::SrcFirst,
            2 => Pattern::DstFirst,
            3 => Pattern::DstOnly,
            // store() only ever writes enum discriminants
            _ => unreachable!("invalid pattern discriminant"),
        }
    }

    pub fn store(&self, pattern: Pattern) {
        self.0.store(pattern as u8, Ordering::Release);
    }
}

impl Default for SharedPattern {
    fn default() -> Self {
        Self::new(Pattern::SrcOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_shared_handle() {
        let shared = SharedPattern::default();
        assert_eq!(shared.load(), Pattern::SrcOnly);
        for p in [
            Pattern::SrcFirst,
            Pattern::DstFirst,
            Pattern::DstOnly,
            Pattern::SrcOnly,
        ] {
            shared.store(p);
            assert_eq!(shared.load(), p);
        }
    }

    #[test]
    fn clones_share_state() {
        let shared = SharedPattern::default();
        let other = shared.clone();
        shared.store(Pattern::DstFirst);
        assert_eq!(other.load(), Pattern::DstFirst);
    }

    #[test]
    fn parse_and_display_agree() {
        for p in [
            Pattern::SrcOnly,
            Pattern::SrcFirst,
            Pattern::DstFirst,
            Pattern::DstOnly,
        ] {
            assert_eq!(p.as_str().parse::<Pattern>(), Ok(p));
        }
        assert!("both_first".parse::<Pattern>().is_err());
    }

    #[test]
    fn authority_follows_primary() {
        assert_eq!(Pattern::SrcOnly.authority(), Direction::Src);
        assert_eq!(Pattern::SrcFirst.authority(), Direction::Src);
        assert_eq!(Pattern::DstFirst.authority(), Direction::Dst);
        assert_eq!(Pattern::DstOnly.authority(), Direction::Dst);
    }
}
