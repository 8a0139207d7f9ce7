//! Consecutive "not found" circuit breaker
//!
//! A long run of absent IDs means the scan has walked past the end of the
//! data. The breaker counts that streak and remembers which IDs belong to it,
//! so their absence markers can be rolled back when it trips: IDs past the
//! end of the data are not known to be permanently absent.

use crate::crawler::fetcher::Outcome;
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_invalid: u32,
    window: BTreeSet<i64>,
    reset_on_transient: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_on_transient: bool) -> Self {
        Self {
            threshold,
            consecutive_invalid: 0,
            window: BTreeSet::new(),
            reset_on_transient,
        }
    }

    /// Feeds the final outcome for `id` into the breaker
    pub fn record(&mut self, id: i64, outcome: &Outcome) {
        match outcome {
            Outcome::Absent => {
                self.consecutive_invalid = self.consecutive_invalid.saturating_add(1);
                self.window.insert(id);
            }
            Outcome::Success(_) => self.reset(),
            Outcome::TransientError(_) if self.reset_on_transient => self.reset(),
            Outcome::TransientError(_) | Outcome::Throttled => {}
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive_invalid >= self.threshold
    }

    pub fn consecutive_invalid(&self) -> u32 {
        self.consecutive_invalid
    }

    /// Resets the breaker and hands back the IDs whose markers must be deleted,
    /// ascending
    pub fn trip(&mut self) -> Vec<i64> {
        let rolled_back = std::mem::take(&mut self.window).into_iter().collect();
        self.consecutive_invalid = 0;
        rolled_back
    }

    fn reset(&mut self) {
        self.consecutive_invalid = 0;
        self.window.clear();
    }
}
