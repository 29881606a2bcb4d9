//! Convenience re-exports for planner users

pub use crate::command::{Command, CopyAddr, Plan};
pub use crate::error::{PlanError, PlanResult};
pub use crate::layout::{FlashLayout, PlannerConfig};
pub use crate::moves::Move;
pub use crate::observer::{NullObserver, Pass, PassObserver, TimingObserver};
pub use crate::planner::MovePlanner;
pub use crate::simulator::{verify_plan, FlashVm, VmError};
pub use crate::stats::PlanStats;
