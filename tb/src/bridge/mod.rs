//! Subscription multiplexer
//!
//! - `core`: the [`Bridge`] context and its builder
//! - `sync`: reconciliation of desired interest against local subscriptions
//! - `pipeline`: the per-delivery path from bus message to dispatched record
//! - `schedule`: periodic reconciliation and liveness loops
//! - `state`: the lock-protected state shared by all of the above

mod core;
mod pipeline;
mod schedule;
mod state;
mod stats;
mod sync;

pub use self::core::{Bridge, BridgeBuilder};
pub use pipeline::MessagePipeline;
pub use schedule::{liveness_tick, run_liveness_loop, run_sync_loop};
pub use stats::BridgeStats;
pub use sync::PassReport;
