//! State module for tracking crawl jobs
//!
//! # Components
//!
//! - `CrawlState`: lifecycle of a run (initializing, running, and the terminal states)
//! - `CrawlMode`: which known IDs a run skips
//! - `CrawlJob` / `JobStats`: the persisted job snapshot and its progress counters

mod crawl_state;
mod job;

// Re-export main types
pub use crawl_state::CrawlState;
pub use job::{CrawlJob, CrawlMode, JobStats, NewJob};
