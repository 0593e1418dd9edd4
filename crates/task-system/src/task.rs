use std::{
	fmt,
	future::{self, Future},
	pin::Pin,
	task::{Context, Poll},
};

use async_channel as chan;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use tokio::sync::oneshot;
use tracing::{trace, warn};
use uuid::Uuid;

use super::error::{RunError, SystemError};

pub type TaskId = Uuid;

/// Type-erased task result, recovered by the dispatcher with `downcast`.
pub trait AnyTaskOutput: Send + Downcast + 'static {}

impl_downcast!(AnyTaskOutput);

impl<T: Send + 'static> AnyTaskOutput for T {}

impl fmt::Debug for Box<dyn AnyTaskOutput> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<AnyTaskOutput>")
	}
}

/// Boxes any sendable value as a [`TaskOutput::Out`].
pub trait IntoAnyTaskOutput {
	fn into_output(self) -> TaskOutput;
}

impl<T: AnyTaskOutput> IntoAnyTaskOutput for T {
	fn into_output(self) -> TaskOutput {
		TaskOutput::Out(Box::new(self))
	}
}

#[derive(Debug)]
pub enum TaskOutput {
	Out(Box<dyn AnyTaskOutput>),
	Empty,
}

impl From<()> for TaskOutput {
	fn from((): ()) -> Self {
		Self::Empty
	}
}

/// What a [`TaskHandle`] resolves to.
#[derive(Debug)]
pub enum TaskStatus<E: RunError> {
	/// The task ran to completion. The id is on the handle, see [`TaskHandle::task_id`].
	Done(TaskOutput),
	Canceled,
	/// The system shut down before the task could finish. The task is handed back so it can be
	/// downcast and dispatched again.
	Shutdown(Box<dyn Task<E>>),
	Error(E),
}

/// Returned by [`Task::run`].
#[derive(Debug)]
pub enum ExecStatus {
	Done(TaskOutput),
	/// The task stopped on a [`InterruptionKind::Pause`] and can be run again later.
	Paused,
	Canceled,
}

pub trait IntoTask<E>: Send {
	fn into_task(self) -> Box<dyn Task<E>>;
}

impl<T: Task<E>, E: RunError> IntoTask<E> for T {
	fn into_task(self) -> Box<dyn Task<E>> {
		Box::new(self)
	}
}

/// A unit of work for the task system.
///
/// Every task of one system shares the error type `E`. Long running tasks should check the
/// [`Interrupter`] between batches, see [`check_interruption!`](crate::check_interruption).
#[async_trait]
pub trait Task<E: RunError>: Downcast + Send + Sync + 'static {
	fn id(&self) -> TaskId;

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;
}

impl_downcast!(Task<E> where E: RunError);

impl<E: RunError> fmt::Debug for Box<dyn Task<E>> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Task id='{}'>", self.id())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
	/// Requested by a shutting down system
	Pause,
	Cancel,
}

/// Receiving side of a task's interruption requests.
///
/// [`Interrupter::wait`] parks until a request arrives, [`Interrupter::try_check_interrupt`]
/// polls without waiting.
#[derive(Debug)]
pub struct Interrupter {
	interrupt_rx: chan::Receiver<InterruptionKind>,
}

impl Interrupter {
	pub(crate) const fn new(interrupt_rx: chan::Receiver<InterruptionKind>) -> Self {
		Self { interrupt_rx }
	}

	pub fn try_check_interrupt(&self) -> Option<InterruptionKind> {
		let kind = self.interrupt_rx.try_recv().ok()?;
		trace!(?kind, "Interruption requested");
		Some(kind)
	}

	/// Waits for the next interruption request.
	///
	/// Never resolves once every [`TaskRemoteController`] is gone.
	pub async fn wait(&self) -> InterruptionKind {
		if let Ok(kind) = self.interrupt_rx.recv().await {
			trace!(?kind, "Interruption received while waiting");
			return kind;
		}

		warn!("Interruption channel closed, waiting forever");
		future::pending().await
	}
}

impl Drop for Interrupter {
	fn drop(&mut self) {
		self.interrupt_rx.close();
	}
}

/// Returns early from a task `run` with [`ExecStatus::Canceled`] or [`ExecStatus::Paused`]
/// when an interruption was requested.
#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		if let Some(kind) = interrupter.try_check_interrupt() {
			::tracing::trace!(?kind, "Stopping task at interruption point");
			return Ok(match kind {
				$crate::InterruptionKind::Cancel => $crate::ExecStatus::Canceled,
				$crate::InterruptionKind::Pause => $crate::ExecStatus::Paused,
			});
		}
	};
}

/// Sends interruption requests to one task, cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskRemoteController {
	pub(crate) task_id: TaskId,
	pub(crate) interrupt_tx: chan::Sender<InterruptionKind>,
}

impl TaskRemoteController {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.task_id
	}

	/// Asks the task to stop at its next interruption point. Queued tasks are skipped entirely.
	/// Canceling a finished task is a no-op.
	pub fn cancel(&self) {
		self.request(InterruptionKind::Cancel);
	}

	pub(crate) fn pause(&self) {
		self.request(InterruptionKind::Pause);
	}

	fn request(&self, kind: InterruptionKind) {
		// The channel holds one request, a pending one wins
		if let Err(e) = self.interrupt_tx.try_send(kind) {
			trace!(task_id = %self.task_id, ?kind, closed = e.is_closed(), "Interruption not delivered");
		}
	}
}

/// Returned by a dispatch, resolves to the task's [`TaskStatus`].
#[derive(Debug)]
pub struct TaskHandle<E: RunError> {
	pub(crate) done_rx: oneshot::Receiver<Result<TaskStatus<E>, SystemError>>,
	pub(crate) controller: TaskRemoteController,
}

impl<E: RunError> Future for TaskHandle<E> {
	type Output = Result<TaskStatus<E>, SystemError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let task_id = self.task_id();

		// A dropped sender means the worker died before reporting
		match Pin::new(&mut self.done_rx).poll(cx) {
			Poll::Ready(Ok(res)) => Poll::Ready(res),
			Poll::Ready(Err(_)) => Poll::Ready(Err(SystemError::TaskJoin(task_id))),
			Poll::Pending => Poll::Pending,
		}
	}
}

impl<E: RunError> TaskHandle<E> {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.controller.task_id
	}

	pub fn cancel(&self) {
		self.controller.cancel();
	}

	#[must_use]
	pub fn remote_controller(&self) -> TaskRemoteController {
		self.controller.clone()
	}
}

/// A dispatched task travelling through the queue, with everything needed to report back.
pub(crate) struct QueuedTask<E: RunError> {
	pub(crate) task: Box<dyn Task<E>>,
	pub(crate) interrupter: Interrupter,
	pub(crate) controller: TaskRemoteController,
	pub(crate) done_tx: oneshot::Sender<Result<TaskStatus<E>, SystemError>>,
}

impl<E: RunError> QueuedTask<E> {
	pub(crate) fn new(task: Box<dyn Task<E>>) -> (Self, TaskHandle<E>) {
		let (done_tx, done_rx) = oneshot::channel();
		let (interrupt_tx, interrupt_rx) = chan::bounded(1);

		let controller = TaskRemoteController {
			task_id: task.id(),
			interrupt_tx,
		};

		let handle = TaskHandle {
			done_rx,
			controller: controller.clone(),
		};

		(
			Self {
				task,
				interrupter: Interrupter::new(interrupt_rx),
				controller,
				done_tx,
			},
			handle,
		)
	}

	pub(crate) const fn id(&self) -> TaskId {
		self.controller.task_id
	}
}
