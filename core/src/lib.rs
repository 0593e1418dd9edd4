//! Gene annotation hub: merges registered source collections into versioned snapshots and keeps
//! a live collection in sync with the latest one.
//!
//! The engines live in their own crates, re-exported here. [`Hub`] wires them together from a
//! persisted [`HubConfig`].

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

mod config;
mod error;
mod hub;
mod logging;

pub use config::{HubConfig, CONFIG_FILE_NAME};
pub use error::Error;
pub use hub::{Hub, BUILD_JOURNAL, SOURCE_STORE, TARGET_STORE};
pub use logging::init_logging;

pub use gh_core_backend as backend;
pub use gh_core_databuild as databuild;
pub use gh_core_diff as diff;
pub use gh_core_mapper as mapper;
pub use gh_core_sync as sync;
pub use gh_task_system as task_system;
