use std::{collections::BTreeSet, sync::Arc};

use futures::TryStreamExt;
use futures_concurrency::future::Join;
use gh_core_backend::{Backend, CohortTimestamp, DocId, DocumentBackend, SnapshotName, DEFAULT_STEP};
use gh_task_system::{TaskOutput, TaskStatus, TaskSystem};
use tracing::{debug, info, instrument, warn};

use crate::{
	delta::{AttrDiff, DeltaSet},
	doc::DiffOptions,
	tasks::diff_chunk::{DiffChunk, DiffChunkTask},
	Error,
};

#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
	options: Arc<DiffOptions>,
	task_system: Option<Arc<TaskSystem<Error>>>,
}

impl DiffEngine {
	#[must_use]
	pub fn new(options: DiffOptions) -> Self {
		Self {
			options: Arc::new(options),
			task_system: None,
		}
	}

	/// Chunks of common keys are compared as tasks on `task_system`.
	#[must_use]
	pub fn with_task_system(mut self, task_system: Arc<TaskSystem<Error>>) -> Self {
		self.task_system = Some(task_system);
		self
	}

	#[must_use]
	pub fn options(&self) -> &DiffOptions {
		&self.options
	}

	/// Changes turning `old` into `new`. The delta is stamped with the date of `new` when it is
	/// a snapshot collection, today otherwise.
	#[instrument(skip_all, fields(old = %old.name(), new = %new.name()), err)]
	pub async fn diff(&self, old: &Arc<Backend>, new: &Arc<Backend>) -> Result<DeltaSet, Error> {
		let timestamp = SnapshotName::parse(new.name()).map_or_else(
			|_| {
				debug!("New collection is not a snapshot, stamping delta with today's date");
				CohortTimestamp::today()
			},
			|name| name.timestamp(),
		);

		let old_ids = collect_ids(old).await?;
		let new_ids = collect_ids(new).await?;

		let mut delta = DeltaSet::new(new.name(), timestamp);
		delta.delete = old_ids.difference(&new_ids).cloned().collect();
		delta.add = new_ids.difference(&old_ids).cloned().collect();

		let common = old_ids.intersection(&new_ids).cloned().collect::<Vec<_>>();

		info!(
			old_count = old_ids.len(),
			new_count = new_ids.len(),
			only_old = delta.delete.len(),
			only_new = delta.add.len(),
			common = common.len(),
			"Comparing collections"
		);

		let chunks = common
			.chunks(self.options.batch_size.max(1))
			.enumerate()
			.map(|(index, ids)| DiffChunk {
				index,
				old: Arc::clone(old),
				new: Arc::clone(new),
				ids: ids.to_vec(),
				options: Arc::clone(&self.options),
			})
			.collect::<Vec<_>>();

		delta.update = match &self.task_system {
			Some(task_system) => diff_parallel(chunks, task_system).await?,
			None => {
				let mut updates = vec![];
				for chunk in chunks {
					updates.extend(chunk.compare().await?);
				}
				updates
			}
		};

		info!(changed = delta.update.len(), "Collections compared");

		Ok(delta)
	}
}

async fn collect_ids(backend: &Backend) -> Result<BTreeSet<DocId>, Error> {
	backend
		.get_id_list(DEFAULT_STEP)
		.try_fold(BTreeSet::new(), |mut ids, page| async move {
			ids.extend(page);
			Ok(ids)
		})
		.await
		.map_err(Into::into)
}

async fn diff_parallel(
	chunks: Vec<DiffChunk>,
	task_system: &TaskSystem<Error>,
) -> Result<Vec<AttrDiff>, Error> {
	let handles = task_system
		.dispatch_many(chunks.into_iter().map(DiffChunkTask::new))
		.await?;

	let mut updates = vec![];

	for (chunk, res) in handles.join().await.into_iter().enumerate() {
		let reason = match res {
			Ok(TaskStatus::Done(TaskOutput::Out(out))) => match out.downcast::<Vec<AttrDiff>>() {
				Ok(chunk_updates) => {
					updates.extend(*chunk_updates);
					continue;
				}
				Err(_) => "unexpected task output".to_string(),
			},
			Ok(TaskStatus::Done(TaskOutput::Empty)) => "task returned an empty output".to_string(),
			Ok(TaskStatus::Error(e)) => e.to_string(),
			Ok(TaskStatus::Canceled) => "chunk was canceled".to_string(),
			Ok(TaskStatus::Shutdown(_)) => "task system shutdown".to_string(),
			Err(e) => e.to_string(),
		};

		warn!(chunk, %reason, "Diff chunk failed, dropping partial results");

		return Err(Error::WorkerFailure { chunk, reason });
	}

	Ok(updates)
}
