use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use gh_core_backend::CohortTimestamp;
use gh_utils::error::FileIOError;
use tokio::fs;
use tracing::{debug, trace};

use crate::{delta::DeltaSet, Error};

const FILE_PREFIX: &str = "changes_";
const FILE_EXTENSION: &str = ".json";

/// Directory backed cold storage of applied deltas, one `changes_<YYYYMMDD>.json` file per
/// cohort timestamp.
#[derive(Debug, Clone)]
pub struct DeltaArchive {
	dir: PathBuf,
}

impl DeltaArchive {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	#[must_use]
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	#[must_use]
	pub fn path_for(&self, timestamp: CohortTimestamp) -> PathBuf {
		self.dir
			.join(format!("{FILE_PREFIX}{timestamp}{FILE_EXTENSION}"))
	}

	/// Stores `delta`, replacing any delta archived with the same timestamp.
	pub async fn put(&self, delta: &DeltaSet) -> Result<PathBuf, Error> {
		let path = self.path_for(delta.timestamp);
		delta.save(&path).await?;

		debug!(path = %path.display(), "Archived delta");

		Ok(path)
	}

	pub async fn get(&self, timestamp: CohortTimestamp) -> Result<Option<DeltaSet>, Error> {
		DeltaSet::load(self.path_for(timestamp)).await
	}

	/// Timestamps of archived deltas, oldest first. A missing directory is an empty archive.
	pub async fn list(&self) -> Result<Vec<CohortTimestamp>, Error> {
		let mut read_dir = match fs::read_dir(&self.dir).await {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
			Err(e) => return Err(FileIOError::from_std_io_err(&self.dir, e).into()),
		};

		let mut timestamps = vec![];

		while let Some(entry) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from_std_io_err(&self.dir, e))?
		{
			let file_name = entry.file_name();
			let Some(timestamp) = file_name
				.to_str()
				.and_then(|name| name.strip_prefix(FILE_PREFIX))
				.and_then(|name| name.strip_suffix(FILE_EXTENSION))
				.and_then(|date| date.parse::<CohortTimestamp>().ok())
			else {
				trace!(?file_name, "Skipping unrelated file in delta archive");
				continue;
			};

			timestamps.push(timestamp);
		}

		timestamps.sort_unstable();

		Ok(timestamps)
	}

	pub async fn latest(&self) -> Result<Option<DeltaSet>, Error> {
		match self.list().await?.last() {
			Some(timestamp) => self.get(*timestamp).await,
			None => Ok(None),
		}
	}
}
