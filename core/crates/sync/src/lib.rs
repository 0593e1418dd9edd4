//! Incremental sync of a live collection: pending snapshots are diffed against it, the deltas
//! applied with cohort timestamps and the result verified.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod backup;
mod engine;
mod error;
mod options;
mod report;
mod state;

pub use backup::RestoreStats;
pub use engine::SyncEngine;
pub use error::Error;
pub use options::{ApplyStrategy, SyncOptions};
pub use report::{ApplyStats, LiveMeta, SyncReport, SyncStatus, VerifyReport};
pub use state::SyncState;
