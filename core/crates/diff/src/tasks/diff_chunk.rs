use std::{collections::BTreeMap, sync::Arc};

use gh_core_backend::{Backend, DocId, Document, DocumentBackend};
use gh_task_system::{
	check_interruption, ExecStatus, Interrupter, IntoAnyTaskOutput, Task, TaskId,
};
use tracing::{instrument, trace, Level};

use crate::{
	delta::AttrDiff,
	doc::{diff_doc, DiffOptions},
	Error,
};

/// One chunk of the keys present on both sides.
#[derive(Debug, Clone)]
pub struct DiffChunk {
	pub index: usize,
	pub old: Arc<Backend>,
	pub new: Arc<Backend>,
	pub ids: Vec<DocId>,
	pub options: Arc<DiffOptions>,
}

impl DiffChunk {
	async fn fetch(backend: &Backend, ids: &[DocId]) -> Result<BTreeMap<DocId, Document>, Error> {
		let docs = backend.mget(ids).await?;

		if docs.len() != ids.len() {
			let found = docs.iter().map(|doc| doc.id.as_str()).collect::<Vec<_>>();
			let missing = ids
				.iter()
				.find(|id| !found.contains(&id.as_str()))
				.cloned()
				.unwrap_or_default();

			return Err(Error::VanishedDocument {
				collection: backend.name().to_string(),
				id: missing,
			});
		}

		Ok(docs.into_iter().map(|doc| (doc.id.clone(), doc)).collect())
	}

	/// Both sides are fetched and compared pairwise in key order.
	pub async fn compare(&self) -> Result<Vec<AttrDiff>, Error> {
		let old = Self::fetch(&self.old, &self.ids).await?;
		let new = Self::fetch(&self.new, &self.ids).await?;

		let updates = old
			.values()
			.zip(new.values())
			.filter_map(|(old, new)| diff_doc(old, new, &self.options))
			.collect::<Vec<_>>();

		trace!(
			chunk = self.index,
			compared = self.ids.len(),
			changed = updates.len(),
			"Compared chunk"
		);

		Ok(updates)
	}
}

#[derive(Debug)]
pub struct DiffChunkTask {
	id: TaskId,
	chunk: DiffChunk,
}

impl DiffChunkTask {
	#[must_use]
	pub fn new(chunk: DiffChunk) -> Self {
		Self {
			id: TaskId::new_v4(),
			chunk,
		}
	}
}

#[async_trait::async_trait]
impl Task<Error> for DiffChunkTask {
	fn id(&self) -> TaskId {
		self.id
	}

	#[instrument(
		skip_all,
		fields(
			task_id = %self.id,
			chunk = self.chunk.index,
			keys_count = self.chunk.ids.len(),
		),
		ret(level = Level::TRACE),
		err,
	)]
	#[allow(clippy::blocks_in_conditions)] // Due to `err` on `instrument` macro above
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		check_interruption!(interrupter);

		let updates = self.chunk.compare().await?;

		Ok(ExecStatus::Done(updates.into_output()))
	}
}
