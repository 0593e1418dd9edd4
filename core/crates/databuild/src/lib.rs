//! Merges many source collections into one canonical per-gene collection.
//!
//! Root sources define which canonical keys exist, every other source only enriches them
//! through partial updates. A failed merge is recorded on the build configuration history with
//! a resume point, so it can be continued without rebuilding the root.

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

use gh_core_backend::Document;
use serde::{de::DeserializeOwned, Serialize};

mod builder;
mod catalog;
mod config;
mod error;
mod mappers;
mod options;
mod run;
mod tasks;

pub use builder::{MergeBuilder, MergeRequest};
pub use catalog::{SourceCatalog, SourceMeta, SRC_MASTER};
pub use config::{BuildConfig, BuildConfigStore, DEFAULT_MAX_BUILD_HISTORY, SRC_BUILD};
pub use error::Error;
pub use mappers::{MappingSpec, Mappers};
pub use options::{BuildOptions, MergeMode};
pub use run::{
	BuildMeta, BuildRun, BuildStats, BuildStatus, CountMismatch, ResumePoint, RootStats,
	SourceMergeStats,
};

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Document, Error> {
	let value = serde_json::to_value(value).map_err(|e| {
		Error::Backend(gh_core_backend::Error::InvalidDocument(e.to_string()))
	})?;

	Ok(Document::try_from(value)?)
}

pub(crate) fn from_document<T: DeserializeOwned>(
	collection: &str,
	doc: Document,
) -> Result<T, Error> {
	let id = doc.id.clone();

	serde_json::from_value(doc.into_value()).map_err(|error| Error::StoredDocument {
		collection: collection.to_string(),
		id,
		error,
	})
}
