use std::sync::Arc;

use async_channel as chan;
use tokio::{spawn, sync::Mutex, task::JoinHandle};
use tracing::{error, trace, warn, Instrument};

use super::{
	error::{DispatcherShutdownError, RunError},
	task::{IntoTask, TaskHandle, TaskStatus, QueuedTask},
	worker::{self, RunningTasks},
};

/// How many queued tasks each worker may have waiting before `dispatch` starts to wait.
const QUEUE_SLOTS_PER_WORKER: usize = 8;

#[derive(Debug)]
pub struct System<E: RunError> {
	workers_count: usize,
	queue_rx: chan::Receiver<QueuedTask<E>>,
	dispatcher: Dispatcher<E>,
	running: Arc<RunningTasks>,
	handles: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl<E: RunError> System<E> {
	/// Creates a system with one worker per available CPU core.
	///
	/// # Panics
	///
	/// Must be called from within a tokio runtime.
	#[must_use]
	pub fn new() -> Self {
		let workers_count = std::thread::available_parallelism().map_or_else(
			|e| {
				error!("Failed to get available parallelism in the task system: {e:#?}");
				1
			},
			std::num::NonZeroUsize::get,
		);

		Self::with_workers(workers_count)
	}

	/// Creates a system with a fixed amount of workers, at least one.
	///
	/// # Panics
	///
	/// Must be called from within a tokio runtime.
	#[must_use]
	pub fn with_workers(workers_count: usize) -> Self {
		let workers_count = workers_count.max(1);

		let (queue_tx, queue_rx) = chan::bounded(workers_count * QUEUE_SLOTS_PER_WORKER);

		let running = Arc::new(RunningTasks::default());

		let handles = (0..workers_count)
			.map(|worker_id| {
				spawn(
					worker::run(worker_id, queue_rx.clone(), Arc::clone(&running))
						.in_current_span(),
				)
			})
			.collect::<Vec<_>>();

		trace!(workers_count, "Task system started");

		Self {
			workers_count,
			queue_rx,
			dispatcher: Dispatcher { queue_tx },
			running,
			handles: Mutex::new(Some(handles)),
		}
	}

	#[must_use]
	pub const fn workers_count(&self) -> usize {
		self.workers_count
	}

	pub async fn dispatch(
		&self,
		into_task: impl IntoTask<E>,
	) -> Result<TaskHandle<E>, DispatcherShutdownError<E>> {
		self.dispatcher.dispatch(into_task).await
	}

	pub async fn dispatch_many<I: IntoTask<E>>(
		&self,
		into_tasks: impl IntoIterator<Item = I>,
	) -> Result<Vec<TaskHandle<E>>, DispatcherShutdownError<E>> {
		self.dispatcher.dispatch_many(into_tasks).await
	}

	#[must_use]
	pub fn get_dispatcher(&self) -> Dispatcher<E> {
		self.dispatcher.clone()
	}

	/// Stops accepting tasks, gives queued tasks back as [`TaskStatus::Shutdown`], asks running
	/// tasks to pause and waits for every worker to exit.
	pub async fn shutdown(&self) {
		let Some(handles) = self.handles.lock().await.take() else {
			warn!("Trying to shutdown the tasks system that was already shutdown");
			return;
		};

		self.running.begin_shutdown().await;
		self.dispatcher.queue_tx.close();

		while let Ok(work) = self.queue_rx.try_recv() {
			let QueuedTask { task, done_tx, .. } = work;
			if done_tx.send(Ok(TaskStatus::Shutdown(task))).is_err() {
				trace!("Task handle dropped before receiving shutdown status");
			}
		}

		for handle in handles {
			if let Err(e) = handle.await {
				error!(?e, "Task system worker failed to shutdown");
			}
		}

		trace!("Task system shutdown");
	}
}

impl<E: RunError> Default for System<E> {
	fn default() -> Self {
		Self::new()
	}
}

/// A cloneable handle that can dispatch tasks to the system from anywhere.
#[derive(Debug)]
pub struct Dispatcher<E: RunError> {
	queue_tx: chan::Sender<QueuedTask<E>>,
}

impl<E: RunError> Clone for Dispatcher<E> {
	fn clone(&self) -> Self {
		Self {
			queue_tx: self.queue_tx.clone(),
		}
	}
}

impl<E: RunError> Dispatcher<E> {
	pub async fn dispatch(
		&self,
		into_task: impl IntoTask<E>,
	) -> Result<TaskHandle<E>, DispatcherShutdownError<E>> {
		let (work, handle) = QueuedTask::new(into_task.into_task());

		trace!(task_id = %handle.task_id(), "Dispatching task");

		self.queue_tx
			.send(work)
			.await
			.map(|()| handle)
			.map_err(|chan::SendError(work)| DispatcherShutdownError(vec![work.task]))
	}

	pub async fn dispatch_many<I: IntoTask<E>>(
		&self,
		into_tasks: impl IntoIterator<Item = I>,
	) -> Result<Vec<TaskHandle<E>>, DispatcherShutdownError<E>> {
		let mut handles = Vec::new();
		let mut into_tasks = into_tasks.into_iter();

		while let Some(into_task) = into_tasks.next() {
			match self.dispatch(into_task).await {
				Ok(handle) => handles.push(handle),
				Err(DispatcherShutdownError(mut tasks)) => {
					handles.iter().for_each(TaskHandle::cancel);
					tasks.extend(into_tasks.map(IntoTask::into_task));
					return Err(DispatcherShutdownError(tasks));
				}
			}
		}

		Ok(handles)
	}
}
