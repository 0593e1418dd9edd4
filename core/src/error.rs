use std::path::Path;

use gh_utils::error::JsonFileError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("unsupported config version <path='{}', found={found}, supported={supported}>", .path.display())]
	UnsupportedConfigVersion {
		path: Box<Path>,
		found: u32,
		supported: u32,
	},
	#[error("failed to initialize logging: {0}")]
	Logging(String),

	#[error(transparent)]
	JsonFile(#[from] JsonFileError),
	#[error(transparent)]
	FileIO(#[from] gh_utils::error::FileIOError),
}
