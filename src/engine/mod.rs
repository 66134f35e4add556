pub mod arbiter;
pub mod dispatch;
pub mod ledger;
pub mod registry;
pub mod sweeper;
pub mod window;

pub use arbiter::{ClaimArbiter, ClaimOutcome};
pub use dispatch::DispatchEngine;
pub use window::{BroadcastStatus, BroadcastWindow};
