use std::ops::Range;

use gh_task_system::{DispatcherShutdownError, TaskSystemError};

use crate::run::CountMismatch;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid build configuration <name='{name}'>: {reason}")]
	Configuration { name: String, reason: String },
	#[error("unknown build configuration <name='{0}'>")]
	UnknownConfig(String),
	#[error("a build is already in progress <config='{0}'>")]
	AlreadyBuilding(String),
	#[error("unknown sources: {}", .0.join(", "))]
	UnknownSource(Vec<String>),
	#[error("no identifier mapper available <source='{src_name}', id_mapping_type='{mapping_type}'>: {reason}")]
	MissingMapper {
		src_name: String,
		mapping_type: String,
		reason: String,
	},
	#[error("nothing to resume <config='{0}'>: the latest run has no resume point")]
	NothingToResume(String),
	#[error("resume position out of the merge plan <position={position}, plan_len={plan_len}>")]
	InvalidResumePoint { position: usize, plan_len: usize },
	#[error("merge partition failed <source='{src_name}', partition={partition:?}>: {reason}")]
	WorkerFailure {
		src_name: String,
		partition: Range<usize>,
		reason: String,
	},
	#[error("target count mismatch: {0}")]
	CountMismatch(CountMismatch),
	#[error("invalid stored document <collection='{collection}', id='{id}'>: {error}")]
	StoredDocument {
		collection: String,
		id: String,
		#[source]
		error: serde_json::Error,
	},
	#[error(transparent)]
	Backend(#[from] gh_core_backend::Error),
	#[error(transparent)]
	Mapper(#[from] gh_core_mapper::Error),
	#[error(transparent)]
	TaskSystem(#[from] TaskSystemError),
	#[error("task system is shutdown <tasks_count={0}>")]
	TaskSystemShutdown(usize),
}

impl From<DispatcherShutdownError<Self>> for Error {
	fn from(DispatcherShutdownError(tasks): DispatcherShutdownError<Self>) -> Self {
		Self::TaskSystemShutdown(tasks.len())
	}
}
