//!
//! # Task System
//!
//! A bounded worker pool used by the merge and diff engines to run partitioned work
//! (source partitions, common-key chunks) in parallel.
//!
//! Bring your own unified error type and dispatch some tasks, the system will handle enqueueing,
//! parallel execution and error handling for you:
//! - A fixed number of workers pull tasks from a single bounded queue, so dispatching blocks
//!   when the queue is full instead of buffering an unbounded amount of work;
//! - Tasks can be gracefully canceled at safe points defined by the task itself;
//! - When the system is shutdown, it will return all pending and running tasks to theirs
//!   dispatchers, so they can be re-dispatched later;
//! - Handles are plain futures, so joining a `Vec` of them keeps results in dispatch order.
//!
//!
//! ## Basic example
//!
//! ```
//! use gh_task_system::{TaskSystem, Task, TaskId, ExecStatus, TaskOutput, Interrupter, TaskStatus};
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum SampleError {
//!     #[error("Sample error")]
//!     SampleError,
//! }
//!
//! #[derive(Debug)]
//! pub struct ReadyTask {
//!     id: TaskId,
//! }
//!
//! #[async_trait]
//! impl Task<SampleError> for ReadyTask {
//!     fn id(&self) -> TaskId {
//!         self.id
//!     }
//!
//!     async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
//!         Ok(ExecStatus::Done(TaskOutput::Empty))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = TaskSystem::<SampleError>::with_workers(2);
//!
//!     let handle = system.dispatch(ReadyTask { id: TaskId::new_v4() }).await.unwrap();
//!
//!     assert!(matches!(
//!         handle.await,
//!         Ok(TaskStatus::Done(TaskOutput::Empty))
//!     ));
//!
//!     system.shutdown().await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod system;
mod task;
mod worker;

pub use error::{DispatcherShutdownError, RunError, SystemError as TaskSystemError};
pub use system::{Dispatcher as TaskDispatcher, System as TaskSystem};
pub use task::{
	AnyTaskOutput, ExecStatus, Interrupter, InterruptionKind,
	IntoAnyTaskOutput, IntoTask, Task, TaskHandle, TaskId, TaskOutput, TaskRemoteController,
	TaskStatus,
};
