use std::{collections::BTreeMap, fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use gh_core_backend::{BackendKind, DocId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
	Building,
	Success,
	Failed,
}

/// Where a failed merge can be continued from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
	/// Sources to merge after the root phase, in order.
	pub plan: Vec<String>,
	/// Position in `plan` of the first source that didn't fully complete.
	pub next: usize,
	/// Root key universe captured once the root phase completed.
	pub canonical_keys: Vec<DocId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootStats {
	/// Records inserted per root source.
	pub per_source: BTreeMap<String, usize>,
	/// Foreign-keyed root records left out because another root source already covers them.
	pub overlap: usize,
	/// Records left out by the species filter.
	pub filtered: usize,
	pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMergeStats {
	/// Source records read.
	pub records: usize,
	/// Source records resolving entirely outside the root key universe.
	pub dropped: usize,
	/// Target records touched.
	pub updated: usize,
}

impl std::ops::AddAssign for SourceMergeStats {
	fn add_assign(&mut self, rhs: Self) {
		self.records += rhs.records;
		self.dropped += rhs.dropped;
		self.updated += rhs.updated;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMismatch {
	pub expected: usize,
	pub actual: usize,
}

impl fmt::Display for CountMismatch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"expected {} documents, target holds {}",
			self.expected, self.actual
		)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub root: Option<RootStats>,
	#[serde(default)]
	pub merged: BTreeMap<String, SourceMergeStats>,
	/// Sources skipped because their identifier mapper was unavailable.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub skipped_sources: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_count: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub count_mismatch: Option<CountMismatch>,
}

/// One merge attempt of a build configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRun {
	pub status: BuildStatus,
	pub started_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub finished_at: Option<DateTime<Utc>>,
	pub target_name: String,
	pub target_backend: BackendKind,
	#[serde(default)]
	pub stats: BuildStats,
	/// Catalog version of every merged source.
	#[serde(default)]
	pub src_version: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resume_point: Option<ResumePoint>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub logfile: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl BuildRun {
	#[must_use]
	pub fn start(
		target_name: impl Into<String>,
		target_backend: BackendKind,
		logfile: Option<PathBuf>,
	) -> Self {
		Self {
			status: BuildStatus::Building,
			started_at: Utc::now(),
			finished_at: None,
			target_name: target_name.into(),
			target_backend,
			stats: BuildStats::default(),
			src_version: BTreeMap::new(),
			resume_point: None,
			logfile,
			error: None,
		}
	}

	pub(crate) fn finish(&mut self, res: Result<(), String>) {
		self.finished_at = Some(Utc::now());
		match res {
			Ok(()) => self.status = BuildStatus::Success,
			Err(e) => {
				self.status = BuildStatus::Failed;
				self.error = Some(e);
			}
		}
	}
}

impl fmt::Display for BuildRun {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"BuildRun <target='{}', started_at='{}'> {:?}",
			self.target_name, self.started_at, self.status
		)
	}
}

/// Metadata attached to a successfully built target collection, picked up by the sync of its
/// live collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildMeta {
	pub build_config: String,
	pub target_name: String,
	#[serde(default)]
	pub src_version: BTreeMap<String, String>,
	#[serde(default)]
	pub stats: BuildStats,
	/// Search index mapping merged from the schemas of every source of the build.
	pub index_schema: Value,
	pub built_at: DateTime<Utc>,
}
