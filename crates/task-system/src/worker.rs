use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_channel as chan;
use tokio::{spawn, sync::Mutex};
use tracing::{error, instrument, trace, Instrument};

use super::{
	error::{RunError, SystemError},
	task::{ExecStatus, InterruptionKind, TaskId, TaskRemoteController, TaskStatus, QueuedTask},
};

pub type WorkerId = usize;

/// Tasks currently being run by some worker, so a shutting down system can interrupt them.
#[derive(Debug, Default)]
pub(crate) struct RunningTasks {
	controllers: Mutex<HashMap<TaskId, TaskRemoteController>>,
	shutting_down: AtomicBool,
}

impl RunningTasks {
	pub(crate) fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::SeqCst)
	}

	pub(crate) async fn begin_shutdown(&self) {
		self.shutting_down.store(true, Ordering::SeqCst);

		for controller in self.controllers.lock().await.values() {
			controller.pause();
		}
	}
}

#[instrument(name = "task_system_worker", skip(queue_rx, running))]
pub(crate) async fn run<E: RunError>(
	worker_id: WorkerId,
	queue_rx: chan::Receiver<QueuedTask<E>>,
	running: Arc<RunningTasks>,
) {
	trace!("Worker starting...");

	while let Ok(work) = queue_rx.recv().await {
		if running.is_shutting_down() {
			trace!(task_id = %work.id(), "Giving back queued task due to shutdown");
			let QueuedTask { task, done_tx, .. } = work;
			if done_tx.send(Ok(TaskStatus::Shutdown(task))).is_err() {
				trace!("Task handle dropped before receiving shutdown status");
			}
			continue;
		}

		run_single_task(work, &running).await;
	}

	trace!("Task queue closed, worker exiting");
}

async fn run_single_task<E: RunError>(work: QueuedTask<E>, running: &RunningTasks) {
	let QueuedTask {
		mut task,
		interrupter,
		controller,
		done_tx,
	} = work;

	let task_id = controller.task_id;

	if let Some(InterruptionKind::Cancel) = interrupter.try_check_interrupt() {
		trace!(%task_id, "Task canceled before starting");
		if done_tx.send(Ok(TaskStatus::Canceled)).is_err() {
			trace!(%task_id, "Task handle dropped before receiving cancel status");
		}
		return;
	}

	{
		let mut controllers = running.controllers.lock().await;
		// A shutdown may have started after we took this task from the queue
		if running.is_shutting_down() {
			controller.pause();
		}
		controllers.insert(task_id, controller);
	}

	let handle = spawn(
		async move {
			let res = task.run(&interrupter).await;
			(task, res)
		}
		.in_current_span(),
	);

	let res = match handle.await {
		Ok((_, Ok(ExecStatus::Done(out)))) => Ok(TaskStatus::Done(out)),
		Ok((_, Ok(ExecStatus::Canceled))) => Ok(TaskStatus::Canceled),
		Ok((task, Ok(ExecStatus::Paused))) => Ok(TaskStatus::Shutdown(task)),
		Ok((_, Err(e))) => Ok(TaskStatus::Error(e)),
		Err(e) => {
			if e.is_panic() {
				error!(%task_id, ?e, "Task panicked");
			}
			Err(SystemError::TaskJoin(task_id))
		}
	};

	running.controllers.lock().await.remove(&task_id);

	if done_tx.send(res).is_err() {
		trace!(%task_id, "Task handle dropped before receiving the task result");
	}
}
