//! Progressive timeline scanning: collect posts from an infinite-scroll feed,
//! deduplicate them, stop on a count or time window, and summarize the
//! collection through a hosted proxy or the Anthropic API.

pub mod analysis;
pub mod config;
pub mod dedup;
pub mod dom;
pub mod extractor;
pub mod post;
pub mod scanner;
pub mod scroll;
pub mod settings;
pub mod stop;

pub use analysis::{Analysis, AnalysisError, Dispatcher};
pub use config::Config;
pub use post::{BatchSummary, Post};
pub use scanner::{ScanController, ScanEvent, ScanHandle, ScanOutcome, ScanPhase};
pub use stop::{StopCondition, StopReason, VibeMode};
