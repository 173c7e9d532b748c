//! Run state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage of a reconciliation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Queries planned, nothing issued yet.
    Planned,
    /// Searches in flight.
    Collecting,
    /// Collapsing mirrored payloads.
    Deduping,
    /// Running cross-metric rules.
    Validating,
    /// Walking the fallback chain for missing pairs.
    FallbackFilling,
    /// Computing consensus values.
    Aggregating,
    /// Report produced.
    Done,
}

impl PipelineState {
    /// The stage after this one; `Done` is terminal.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Planned => Some(Self::Collecting),
            Self::Collecting => Some(Self::Deduping),
            Self::Deduping => Some(Self::Validating),
            Self::Validating => Some(Self::FallbackFilling),
            Self::FallbackFilling => Some(Self::Aggregating),
            Self::Aggregating => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Returns true for the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planned => "PLANNED",
            Self::Collecting => "COLLECTING",
            Self::Deduping => "DEDUPING",
            Self::Validating => "VALIDATING",
            Self::FallbackFilling => "FALLBACK_FILLING",
            Self::Aggregating => "AGGREGATING",
            Self::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// One entered stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage entered.
    pub state: PipelineState,
    /// When it was entered.
    pub entered_at: DateTime<Utc>,
}

/// Forward-only tracker of a run's stage.
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: PipelineState,
    trace: Vec<StageRecord>,
}

impl StageTracker {
    /// Starts in `Planned`.
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            current: PipelineState::Planned,
            trace: vec![StageRecord {
                state: PipelineState::Planned,
                entered_at: at,
            }],
        }
    }

    /// Current stage.
    #[must_use]
    pub const fn current(&self) -> PipelineState {
        self.current
    }

    /// Moves to the following stage. Returns `false` once `Done`.
    pub fn advance(&mut self, at: DateTime<Utc>) -> bool {
        let Some(next) = self.current.next() else {
            return false;
        };
        self.current = next;
        self.trace.push(StageRecord { state: next, entered_at: at });
        true
    }

    /// Stages entered so far.
    #[must_use]
    pub fn trace(&self) -> &[StageRecord] {
        &self.trace
    }

    /// Consumes the tracker.
    #[must_use]
    pub fn into_trace(self) -> Vec<StageRecord> {
        self.trace
    }
}
