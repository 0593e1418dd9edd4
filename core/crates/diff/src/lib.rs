//! Collection diffing: compares two document collections key by key and produces a
//! [`DeltaSet`], the artifact the sync engine applies to a live collection.

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

mod archive;
mod delta;
mod doc;
mod engine;
mod error;
mod tasks;

pub use archive::DeltaArchive;
pub use delta::{AttrDiff, DeltaSet, DeltaStats};
pub use doc::{diff_doc, values_equal, CompareMode, DiffOptions, DEFAULT_DIFF_BATCH_SIZE};
pub use engine::DiffEngine;
pub use error::Error;
