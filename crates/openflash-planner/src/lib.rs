//! In-place firmware update planning for OpenFlash
//!
//! This crate turns a binary-delta's block moves into an ordered program
//! for a small flash VM that rewrites the old image in place. The target
//! device offers block-granular erase, write-once bytes between erases,
//! and a single block-sized RAM cache; the planner's job is to order the
//! writes so every read happens before its source is destroyed, breaking
//! dependency cycles through the cache while keeping erases and cache
//! round-trips down.
//!
//! # Overview
//!
//! - [`MovePlanner`]: the scheduler; construct once per geometry, feed it
//!   [`Move`] lists, get [`Plan`]s of [`Command`]s.
//! - [`simulator`]: a byte-accurate VM used by the test suite (and
//!   available to callers) to prove a plan reproduces its moves.
//! - [`PassObserver`]: optional per-pass instrumentation hook.
//!
//! The planner performs no I/O and holds no global state; planners with
//! different geometries coexist freely.
//!
//! # Example
//!
//! ```
//! use openflash_planner::prelude::*;
//!
//! let planner = MovePlanner::new(PlannerConfig::default())?;
//! let moves = vec![
//!     Move::new(100, 100, 400),
//!     Move::new(100, 100, 100),
//! ];
//! let plan = planner.plan(&moves)?;
//!
//! // The emitted program stages block 0 through the cache and rewrites it.
//! assert!(plan.commands().iter().any(|c| matches!(c, Command::LoadAndFlush { block: 0 })));
//! # Ok::<(), openflash_planner::PlanError>(())
//! ```

#![deny(unsafe_code, clippy::unwrap_used)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod cache;
pub mod command;
pub mod error;
pub mod graph;
pub mod layout;
pub mod moves;
pub mod observer;
pub mod planner;
pub mod prelude;
pub mod simulator;
pub mod stats;

mod emit;

pub use command::{Command, CopyAddr, Plan};
pub use error::{PlanError, PlanResult};
pub use layout::{FlashLayout, PlannerConfig};
pub use moves::Move;
pub use observer::{NullObserver, Pass, PassObserver, TimingObserver};
pub use planner::MovePlanner;
pub use simulator::{verify_plan, FlashVm, VmError};
pub use stats::PlanStats;
