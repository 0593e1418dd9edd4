use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a sync engine stands. Stages run `Idle -> Diffing -> Applying -> Verifying -> Idle`,
/// any stage error leaves the engine `Failed` until it is reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
	#[default]
	Idle,
	Diffing,
	Applying,
	Verifying,
	Failed,
}

impl fmt::Display for SyncState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Idle => "idle",
			Self::Diffing => "diffing",
			Self::Applying => "applying",
			Self::Verifying => "verifying",
			Self::Failed => "failed",
		};

		f.write_str(name)
	}
}
