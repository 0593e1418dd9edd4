use std::{error::Error, fmt};

use thiserror::Error;

use super::task::{Task, TaskId};

/// Task error types must be `Send` and `'static` so that they can cross worker boundaries.
pub trait RunError: Error + fmt::Debug + Send + Sync + 'static {}

impl<T: Error + fmt::Debug + Send + Sync + 'static> RunError for T {}

#[derive(Debug, Error)]
pub enum SystemError {
	#[error("task join error <id='{0}'>")]
	TaskJoin(TaskId),
}

/// Returned by a dispatch attempt after the system was shutdown, giving the tasks back.
#[derive(Debug, Error)]
#[error("task system already shutdown and can't dispatch more tasks: <tasks_count={}>", .0.len())]
pub struct DispatcherShutdownError<E: RunError>(pub Vec<Box<dyn Task<E>>>);
