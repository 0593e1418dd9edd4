use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use gh_core_diff::DeltaStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SyncState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	Success,
	Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
	pub added: usize,
	pub deleted: usize,
	/// Documents updated attribute by attribute.
	pub updated: usize,
	/// Documents replaced whole from the snapshot.
	pub reindexed: usize,
	/// Update entries whose key was missing on the live collection.
	pub missed: usize,
}

/// Post-apply consistency checks. Failures are reported, never fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
	pub added_expected: usize,
	pub added_found: usize,
	/// Deleted keys still present on the live collection.
	pub deleted_remaining: usize,
	/// Live documents without a cohort timestamp.
	pub unstamped: usize,
	/// Size of `add ∪ update`.
	pub stamped_expected: usize,
	/// Live documents carrying the delta timestamp.
	pub stamped_found: usize,
	/// Whether the stamped documents are exactly `add ∪ update`.
	pub stamped_match: bool,
}

impl VerifyReport {
	#[must_use]
	pub fn failures(&self) -> Vec<String> {
		let mut failures = vec![];

		if self.added_found != self.added_expected {
			failures.push(format!(
				"added documents: expected {}, found {}",
				self.added_expected, self.added_found
			));
		}
		if self.deleted_remaining != 0 {
			failures.push(format!(
				"deleted documents still present: {}",
				self.deleted_remaining
			));
		}
		if self.unstamped != 0 {
			failures.push(format!("documents without timestamp: {}", self.unstamped));
		}
		if !self.stamped_match {
			failures.push(format!(
				"stamped documents: expected {}, found {}",
				self.stamped_expected, self.stamped_found
			));
		}

		failures
	}

	#[must_use]
	pub fn is_ok(&self) -> bool {
		self.failures().is_empty()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
	pub snapshot: String,
	pub status: SyncStatus,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delta: Option<DeltaStats>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub apply: Option<ApplyStats>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub verify: Option<VerifyReport>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub archived: Option<PathBuf>,
	/// Stage that failed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub failed_stage: Option<SyncState>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl SyncReport {
	pub(crate) fn start(snapshot: impl Into<String>) -> Self {
		let now = Utc::now();

		Self {
			snapshot: snapshot.into(),
			status: SyncStatus::Success,
			started_at: now,
			finished_at: now,
			delta: None,
			apply: None,
			verify: None,
			archived: None,
			failed_stage: None,
			error: None,
		}
	}

	#[must_use]
	pub fn is_success(&self) -> bool {
		self.status == SyncStatus::Success
	}
}

impl fmt::Display for SyncReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"SyncReport <snapshot='{}', started_at='{}'> {:?}",
			self.snapshot, self.started_at, self.status
		)
	}
}

/// Metadata stamped on the live collection by every successful sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMeta {
	/// Snapshot the live collection was last synced from.
	pub source: String,
	pub synced_at: DateTime<Utc>,
	/// Build metadata the snapshot carried, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub build: Option<Value>,
}
