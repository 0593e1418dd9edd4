use gh_task_system::{TaskOutput, TaskStatus, TaskSystem};

use std::time::Duration;

use futures_concurrency::future::Join;
use tracing::info;
use tracing_test::traced_test;

mod common;

use common::tasks::{BogusTask, IndexedTask, NeverTask, ReadyTask, SampleError, SignalingTask};

#[tokio::test]
#[traced_test]
async fn shutdown_test() {
	let system = TaskSystem::<SampleError>::with_workers(2);

	let handle = system.dispatch(NeverTask::default()).await.unwrap();

	system.shutdown().await;

	assert!(matches!(handle.await, Ok(TaskStatus::Shutdown(_))));
}

#[tokio::test]
#[traced_test]
async fn shutdown_gives_back_running_task_test() {
	let system = TaskSystem::<SampleError>::with_workers(1);

	let (task, began_rx) = SignalingTask::new();
	let handle = system.dispatch(task).await.unwrap();

	began_rx.await.unwrap();

	system.shutdown().await;

	match handle.await {
		Ok(TaskStatus::Shutdown(task)) => assert!(task.downcast_ref::<SignalingTask>().is_some()),
		other => panic!("unexpected task status: {other:?}"),
	}
}

#[tokio::test]
#[traced_test]
async fn dispatch_after_shutdown_test() {
	let system = TaskSystem::<SampleError>::with_workers(1);

	system.shutdown().await;

	let err = system.dispatch(ReadyTask::default()).await.unwrap_err();
	assert_eq!(err.0.len(), 1);

	// Shutting down twice is a no-op
	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn cancel_test() {
	let system = TaskSystem::<SampleError>::with_workers(2);

	let (task, began_rx) = SignalingTask::new();
	let handle = system.dispatch(task).await.unwrap();

	began_rx.await.unwrap();

	info!("issuing cancel");
	handle.cancel();

	assert!(matches!(handle.await, Ok(TaskStatus::Canceled)));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn cancel_after_done_is_a_no_op_test() {
	let system = TaskSystem::<SampleError>::with_workers(1);

	let handle = system.dispatch(ReadyTask::default()).await.unwrap();
	let controller = handle.remote_controller();
	let task_id = handle.task_id();

	assert!(matches!(
		handle.await,
		Ok(TaskStatus::Done(TaskOutput::Empty))
	));

	// The task is gone, so the request is just dropped
	assert_eq!(controller.task_id(), task_id);
	controller.cancel();
	controller.cancel();

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn done_test() {
	let system = TaskSystem::<SampleError>::with_workers(2);

	let handle = system.dispatch(ReadyTask::default()).await.unwrap();

	assert!(matches!(
		handle.await,
		Ok(TaskStatus::Done(TaskOutput::Empty))
	));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn error_test() {
	let system = TaskSystem::<SampleError>::with_workers(2);

	let handle = system.dispatch(BogusTask::default()).await.unwrap();

	assert!(matches!(
		handle.await,
		Ok(TaskStatus::Error(SampleError::SampleError))
	));

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn joined_handles_keep_dispatch_order_test() {
	let system = TaskSystem::<SampleError>::with_workers(4);

	// Earlier tasks sleep longer, so they finish last
	let tasks = (0..16)
		.map(|i| IndexedTask::new(i, Duration::from_millis(5 * (16 - i) as u64)))
		.collect::<Vec<_>>();

	let handles = system.dispatch_many(tasks).await.unwrap();

	let indexes = handles
		.join()
		.await
		.into_iter()
		.map(|res| match res {
			Ok(TaskStatus::Done(TaskOutput::Out(out))) => *out.downcast::<usize>().unwrap(),
			other => panic!("unexpected task status: {other:?}"),
		})
		.collect::<Vec<_>>();

	assert_eq!(indexes, (0..16).collect::<Vec<_>>());

	system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn dispatcher_clone_test() {
	let system = TaskSystem::<SampleError>::with_workers(2);

	let dispatcher = system.get_dispatcher();

	let handle = tokio::spawn(async move { dispatcher.dispatch(ReadyTask::default()).await })
		.await
		.unwrap()
		.unwrap();

	assert!(matches!(handle.await, Ok(TaskStatus::Done(_))));

	system.shutdown().await;
}
