use std::{
	collections::{BTreeMap, BTreeSet},
	mem,
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

use crate::{memory::first_duplicate, Attrs, DocId, Document, DocumentBackend, Error};

pub const DEFAULT_BULK_SIZE: usize = 1_000;

#[derive(Debug)]
enum BulkOp {
	Create(Document),
	Update { id: DocId, attrs: Attrs },
	Unset { id: DocId, attrs: Vec<String> },
	Replace(Document),
	Delete(DocId),
}

#[derive(Debug, Default)]
struct IndexState {
	/// Keys as seen by writers, kept up to date eagerly so writes don't need a refresh.
	ids: BTreeSet<DocId>,
	/// Documents visible to readers.
	committed: BTreeMap<DocId, Attrs>,
	pending: Vec<BulkOp>,
	/// Refreshes since the last compaction.
	segments: usize,
}

impl IndexState {
	fn refresh(&mut self) {
		if self.pending.is_empty() {
			return;
		}

		let ops = mem::take(&mut self.pending);
		trace!(ops_count = ops.len(), "Refreshing index");

		for op in ops {
			match op {
				BulkOp::Create(Document { id, attrs }) => {
					self.committed.insert(id, attrs);
				}
				BulkOp::Replace(Document { id, attrs }) => {
					if let Some(existing) = self.committed.get_mut(&id) {
						*existing = attrs;
					}
				}
				BulkOp::Update { id, attrs } => {
					if let Some(existing) = self.committed.get_mut(&id) {
						existing.extend(attrs);
					}
				}
				BulkOp::Unset { id, attrs } => {
					if let Some(existing) = self.committed.get_mut(&id) {
						for attr in &attrs {
							existing.remove(attr);
						}
					}
				}
				BulkOp::Delete(id) => {
					self.committed.remove(&id);
				}
			}
		}

		self.segments += 1;
	}
}

/// Bulk-append search index. Writes are buffered and become visible to readers on the next
/// refresh, which happens when the buffer reaches `bulk_size` or before any read.
#[derive(Debug)]
pub struct IndexBackend {
	name: String,
	bulk_size: usize,
	state: RwLock<IndexState>,
	online: AtomicBool,
}

impl IndexBackend {
	pub fn new(name: impl Into<String>) -> Self {
		Self::with_bulk_size(name, DEFAULT_BULK_SIZE)
	}

	pub fn with_bulk_size(name: impl Into<String>, bulk_size: usize) -> Self {
		Self {
			name: name.into(),
			bulk_size: bulk_size.max(1),
			state: RwLock::default(),
			online: AtomicBool::new(true),
		}
	}

	/// Taking a backend offline makes every following call fail with [`Error::Unavailable`].
	pub fn set_online(&self, online: bool) {
		self.online.store(online, Ordering::SeqCst);
	}

	/// Buffered operations not yet visible to readers.
	pub async fn pending_ops(&self) -> usize {
		self.state.read().await.pending.len()
	}

	fn check_online(&self) -> Result<(), Error> {
		if self.online.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(Error::offline(&self.name))
		}
	}

	async fn push(&self, ops: impl IntoIterator<Item = BulkOp> + Send) {
		let mut state = self.state.write().await;
		state.pending.extend(ops);
		if state.pending.len() >= self.bulk_size {
			state.refresh();
		}
	}

	/// Runs `f` over the committed documents after making every buffered write visible.
	async fn read<T>(&self, f: impl FnOnce(&BTreeMap<DocId, Attrs>) -> T + Send) -> T {
		let mut state = self.state.write().await;
		state.refresh();
		f(&state.committed)
	}
}

#[async_trait]
impl DocumentBackend for IndexBackend {
	fn name(&self) -> &str {
		&self.name
	}

	#[instrument(skip_all, fields(collection = %self.name, docs_count = docs.len()), err)]
	async fn insert(&self, docs: Vec<Document>) -> Result<usize, Error> {
		self.check_online()?;

		let mut state = self.state.write().await;

		if let Some(id) = first_duplicate(&docs, |id| state.ids.contains(id)) {
			return Err(Error::DuplicateKey {
				collection: self.name.clone(),
				id,
			});
		}

		let inserted = docs.len();
		state.ids.extend(docs.iter().map(|doc| doc.id.clone()));
		state.pending.extend(docs.into_iter().map(BulkOp::Create));
		if state.pending.len() >= self.bulk_size {
			state.refresh();
		}

		Ok(inserted)
	}

	async fn partial_update(&self, id: &str, attrs: Attrs) -> Result<bool, Error> {
		self.check_online()?;

		if !self.state.read().await.ids.contains(id) {
			return Ok(false);
		}

		self.push([BulkOp::Update {
			id: id.to_string(),
			attrs,
		}])
		.await;

		Ok(true)
	}

	async fn unset(&self, id: &str, attrs: &[String]) -> Result<bool, Error> {
		self.check_online()?;

		if !self.state.read().await.ids.contains(id) {
			return Ok(false);
		}

		self.push([BulkOp::Unset {
			id: id.to_string(),
			attrs: attrs.to_vec(),
		}])
		.await;

		Ok(true)
	}

	async fn replace(&self, doc: Document) -> Result<bool, Error> {
		self.check_online()?;

		if !self.state.read().await.ids.contains(&doc.id) {
			return Ok(false);
		}

		self.push([BulkOp::Replace(doc)]).await;

		Ok(true)
	}

	async fn id_page(&self, skip: usize, limit: usize) -> Result<Vec<DocId>, Error> {
		self.check_online()?;

		Ok(self
			.read(|committed| committed.keys().skip(skip).take(limit).cloned().collect())
			.await)
	}

	async fn scan(&self, skip: usize, limit: usize) -> Result<Vec<Document>, Error> {
		self.check_online()?;

		Ok(self
			.read(|committed| {
				committed
					.iter()
					.skip(skip)
					.take(limit)
					.map(|(id, attrs)| Document::new(id.clone(), attrs.clone()))
					.collect()
			})
			.await)
	}

	async fn get(&self, id: &str) -> Result<Document, Error> {
		self.check_online()?;

		self.read(|committed| {
			committed
				.get(id)
				.map(|attrs| Document::new(id, attrs.clone()))
		})
		.await
		.ok_or_else(|| Error::NotFound {
			collection: self.name.clone(),
			id: id.to_string(),
		})
	}

	async fn mget(&self, ids: &[DocId]) -> Result<Vec<Document>, Error> {
		self.check_online()?;

		Ok(self
			.read(|committed| {
				ids.iter()
					.filter_map(|id| {
						committed
							.get(id)
							.map(|attrs| Document::new(id.clone(), attrs.clone()))
					})
					.collect()
			})
			.await)
	}

	async fn remove(&self, ids: &[DocId]) -> Result<usize, Error> {
		self.check_online()?;

		let mut state = self.state.write().await;

		let removed = ids
			.iter()
			.filter(|id| state.ids.remove(id.as_str()))
			.cloned()
			.collect::<Vec<_>>();
		let removed_count = removed.len();

		state.pending.extend(removed.into_iter().map(BulkOp::Delete));
		if state.pending.len() >= self.bulk_size {
			state.refresh();
		}

		Ok(removed_count)
	}

	async fn purge(&self) -> Result<(), Error> {
		self.check_online()?;

		*self.state.write().await = IndexState::default();

		Ok(())
	}

	async fn count(&self) -> Result<usize, Error> {
		self.check_online()?;

		Ok(self.state.read().await.ids.len())
	}

	async fn count_from_ids(&self, ids: &[DocId]) -> Result<usize, Error> {
		self.check_online()?;

		let state = self.state.read().await;

		Ok(ids
			.iter()
			.map(String::as_str)
			.collect::<BTreeSet<_>>()
			.into_iter()
			.filter(|id| state.ids.contains(*id))
			.count())
	}

	async fn finalize(&self) -> Result<(), Error> {
		self.check_online()?;

		let mut state = self.state.write().await;
		state.refresh();

		debug!(
			collection = %self.name,
			segments = state.segments,
			docs_count = state.committed.len(),
			"Index flushed and compacted"
		);
		state.segments = 0;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;

	fn doc(id: &str, value: i64) -> Document {
		Document::new(id, Attrs::new()).with_attr("a", value)
	}

	#[tokio::test]
	async fn writes_are_buffered_until_bulk_size() {
		let index = IndexBackend::with_bulk_size("genes", 3);

		index.insert(vec![doc("1", 1), doc("2", 2)]).await.unwrap();
		assert_eq!(index.pending_ops().await, 2);
		// Counting doesn't need a refresh
		assert_eq!(index.count().await.unwrap(), 2);

		assert!(index
			.partial_update("1", Attrs::from_iter([("b".to_string(), json!(true))]))
			.await
			.unwrap());
		assert_eq!(index.pending_ops().await, 0);

		let one = index.get("1").await.unwrap();
		assert_eq!(one.get("b"), Some(&json!(true)));
	}

	#[tokio::test]
	async fn reads_refresh_pending_ops() {
		let index = IndexBackend::with_bulk_size("genes", 100);

		index.insert(vec![doc("1", 1)]).await.unwrap();
		index.remove(&["1".to_string()]).await.unwrap();
		index.insert(vec![doc("1", 5)]).await.unwrap();
		assert_eq!(index.pending_ops().await, 3);

		assert_eq!(index.get("1").await.unwrap().get("a"), Some(&json!(5)));
		assert_eq!(index.pending_ops().await, 0);
	}

	#[tokio::test]
	async fn partial_update_on_missing_key_is_not_buffered() {
		let index = IndexBackend::new("genes");

		assert!(!index.partial_update("42", Attrs::new()).await.unwrap());
		assert_eq!(index.pending_ops().await, 0);
		assert_eq!(index.count().await.unwrap(), 0);
	}
}
