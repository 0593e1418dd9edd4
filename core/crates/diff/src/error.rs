use gh_core_backend::DocId;
use gh_task_system::{DispatcherShutdownError, TaskSystemError};
use gh_utils::error::JsonFileError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("diff chunk failed <chunk={chunk}>: {reason}")]
	WorkerFailure { chunk: usize, reason: String },
	#[error("document vanished while diffing <collection='{collection}', id='{id}'>")]
	VanishedDocument { collection: String, id: DocId },

	#[error(transparent)]
	Backend(#[from] gh_core_backend::Error),
	#[error(transparent)]
	JsonFile(#[from] JsonFileError),
	#[error(transparent)]
	FileIO(#[from] gh_utils::error::FileIOError),
	#[error(transparent)]
	TaskSystem(#[from] TaskSystemError),
	#[error("task system shutdown while dispatching <tasks_count={0}>")]
	TaskSystemShutdown(usize),
}

impl From<DispatcherShutdownError<Self>> for Error {
	fn from(DispatcherShutdownError(tasks): DispatcherShutdownError<Self>) -> Self {
		Self::TaskSystemShutdown(tasks.len())
	}
}
