use std::path::Path;

use gh_utils::error::FileIOError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("a sync is already running <live='{0}'>")]
	Busy(String),
	#[error("sync engine failed and must be reset first <live='{0}'>")]
	NeedsReset(String),
	#[error("change history needs at least one of `before` or `after`")]
	MissingHistoryBound,
	#[error("invalid live collection metadata <live='{live}'>: {source}")]
	InvalidLiveMeta {
		live: String,
		#[source]
		source: serde_json::Error,
	},
	#[error("invalid timestamp backup line <path='{}', line={line}>: {content}", .path.display())]
	InvalidBackupLine {
		path: Box<Path>,
		line: usize,
		content: String,
	},

	#[error(transparent)]
	Backend(#[from] gh_core_backend::Error),
	#[error(transparent)]
	Diff(#[from] gh_core_diff::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}
