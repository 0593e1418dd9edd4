use crate::DocId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("backend unavailable <backend='{backend}'>: {reason}")]
	Unavailable { backend: String, reason: String },
	#[error("document not found <collection='{collection}', id='{id}'>")]
	NotFound { collection: String, id: DocId },
	#[error("duplicate key <collection='{collection}', id='{id}'>")]
	DuplicateKey { collection: String, id: DocId },
	#[error("collection already exists <name='{0}'>")]
	CollectionExists(String),
	#[error("unknown collection <name='{0}'>")]
	UnknownCollection(String),
	#[error("invalid document: {0}")]
	InvalidDocument(String),
	#[error("invalid cohort timestamp <value='{0}'>")]
	InvalidTimestamp(String),
	#[error("invalid snapshot name <name='{0}'>")]
	InvalidSnapshotName(String),
}

impl Error {
	pub(crate) fn offline(backend: &str) -> Self {
		Self::Unavailable {
			backend: backend.to_string(),
			reason: "backend is offline".to_string(),
		}
	}

	/// Whether this error comes from the storage layer being unreachable, as opposed to a
	/// problem with the request itself.
	#[must_use]
	pub const fn is_unavailable(&self) -> bool {
		matches!(self, Self::Unavailable { .. })
	}
}
