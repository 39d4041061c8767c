//! Recovery sweeper - re-submits outbox records whose publication never completed.
//!
//! - `RecoverySweeper` - one sweep: release stalled attempts, then claim and publish pending records
//! - `SweeperThread` - runs sweeps periodically on a background thread

#[allow(clippy::module_inception)]
mod sweeper;
mod thread;

pub use sweeper::{RecoverySweeper, SweepResult};
pub use thread::{SweeperStats, SweeperThread};
