use gh_task_system::{
	check_interruption, ExecStatus, Interrupter, InterruptionKind, IntoAnyTaskOutput, Task,
	TaskId, TaskOutput,
};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("Sample error")]
	SampleError,
}

#[derive(Debug)]
pub struct NeverTask {
	id: TaskId,
}

impl Default for NeverTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for NeverTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		match interrupter.wait().await {
			InterruptionKind::Pause => {
				info!("Pausing NeverTask <id='{}'>", self.id);
				Ok(ExecStatus::Paused)
			}
			InterruptionKind::Cancel => {
				info!("Canceling NeverTask <id='{}'>", self.id);
				Ok(ExecStatus::Canceled)
			}
		}
	}
}

#[derive(Debug)]
pub struct ReadyTask {
	id: TaskId,
}

impl Default for ReadyTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done(TaskOutput::Empty))
	}
}

#[derive(Debug)]
pub struct BogusTask {
	id: TaskId,
}

impl Default for BogusTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for BogusTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Err(SampleError::SampleError)
	}
}

/// Sleeps a given amount of time and then returns its index, so callers can check ordering.
#[derive(Debug)]
pub struct IndexedTask {
	id: TaskId,
	index: usize,
	delay: Duration,
}

impl IndexedTask {
	pub fn new(index: usize, delay: Duration) -> Self {
		Self {
			id: TaskId::new_v4(),
			index,
			delay,
		}
	}
}

#[async_trait]
impl Task<SampleError> for IndexedTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		check_interruption!(interrupter);

		tokio::time::sleep(self.delay).await;

		Ok(ExecStatus::Done(self.index.into_output()))
	}
}

/// Signals when it begins running, then waits for an interruption.
#[derive(Debug)]
pub struct SignalingTask {
	id: TaskId,
	began_tx: Option<oneshot::Sender<()>>,
}

impl SignalingTask {
	pub fn new() -> (Self, oneshot::Receiver<()>) {
		let (began_tx, began_rx) = oneshot::channel();
		(
			Self {
				id: TaskId::new_v4(),
				began_tx: Some(began_tx),
			},
			began_rx,
		)
	}
}

#[async_trait]
impl Task<SampleError> for SignalingTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		if let Some(began_tx) = self.began_tx.take() {
			began_tx.send(()).ok();
		}

		match interrupter.wait().await {
			InterruptionKind::Pause => Ok(ExecStatus::Paused),
			InterruptionKind::Cancel => Ok(ExecStatus::Canceled),
		}
	}
}
