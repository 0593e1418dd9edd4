use gh_utils::error::FileIOError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("mapping source is missing <mapper='{mapper}', collection='{collection}'>")]
	MappingIncomplete { mapper: String, collection: String },
	#[error(transparent)]
	Backend(#[from] gh_core_backend::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to encode identifier map blob: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("failed to decode identifier map blob: {0}")]
	Decode(#[from] rmp_serde::decode::Error),
}
