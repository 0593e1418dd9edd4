use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_BUILD_HISTORY;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeMode {
	/// One stream per source, in process.
	#[default]
	Sequential,
	/// Every source is split into `[skip, skip + partition_size)` ranges merged by the task system.
	Parallel { partition_size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
	pub batch_size: usize,
	pub mode: MergeMode,
	/// Prefix of generated target names: `<prefix>_<config>_<YYYYMMDD>_<token>`.
	pub target_prefix: String,
	/// Attribute holding the species of root records.
	pub species_attr: String,
	/// Attributes stripped from every record before it reaches the target.
	pub merge_exclude_attrs: Vec<String>,
	/// Drop repeated members when list attributes of several records are combined.
	pub dedup_lists: bool,
	/// Fail the run when the target count doesn't match the root key universe.
	pub strict_counts: bool,
	pub max_build_history: usize,
}

impl Default for BuildOptions {
	fn default() -> Self {
		Self {
			batch_size: 10_000,
			mode: MergeMode::default(),
			target_prefix: "genedoc".to_string(),
			species_attr: "taxid".to_string(),
			merge_exclude_attrs: vec!["taxid".to_string()],
			dedup_lists: true,
			strict_counts: false,
			max_build_history: DEFAULT_MAX_BUILD_HISTORY,
		}
	}
}
