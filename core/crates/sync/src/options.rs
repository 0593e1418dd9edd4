use std::path::PathBuf;

use gh_core_backend::DEFAULT_STEP;
use serde::{Deserialize, Serialize};

/// How update entries of a delta are applied to the live collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStrategy {
	/// Set added and updated attributes, unset deleted ones.
	#[default]
	Partial,
	/// Replace every updated document with its snapshot version.
	Reindex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
	/// Keys fetched, inserted or removed per backend call.
	pub batch_size: usize,
	pub strategy: ApplyStrategy,
	/// Applied deltas are archived here when set.
	pub archive_dir: Option<PathBuf>,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			batch_size: DEFAULT_STEP,
			strategy: ApplyStrategy::Partial,
			archive_dir: None,
		}
	}
}
