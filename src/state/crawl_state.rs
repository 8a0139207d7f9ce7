/// Crawl run state definitions
///
/// A run moves `Initializing → Running` and then ends in exactly one terminal state.
use std::fmt;

/// Represents the lifecycle state of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    // ===== Active States =====
    /// Job record created, exclusion set not yet loaded
    Initializing,

    /// Walking the ID range
    Running,

    // ===== Terminal States =====
    /// The cursor passed the end of the range
    Completed,

    /// A cancellation request was observed
    Cancelled,

    /// The consecutive "not found" threshold was reached and the window rolled back
    CircuitTripped,

    /// The run could not proceed
    Failed,
}

impl CrawlState {
    /// Returns true if no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Initializing | Self::Running)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::CircuitTripped => "circuit_tripped",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(Self::Initializing),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "circuit_tripped" => Some(Self::CircuitTripped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
