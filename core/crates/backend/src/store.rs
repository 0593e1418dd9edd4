use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::{
	index::DEFAULT_BULK_SIZE, Attrs, DocId, Document, DocumentBackend, Error, IndexBackend,
	MemoryBackend,
};

/// Storage kinds a collection can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
	#[default]
	Memory,
	Index,
}

#[derive(Debug)]
pub enum Backend {
	Memory(MemoryBackend),
	Index(IndexBackend),
}

impl Backend {
	pub fn new(kind: BackendKind, name: impl Into<String>, bulk_size: usize) -> Self {
		match kind {
			BackendKind::Memory => Self::Memory(MemoryBackend::new(name)),
			BackendKind::Index => Self::Index(IndexBackend::with_bulk_size(name, bulk_size)),
		}
	}

	#[must_use]
	pub const fn kind(&self) -> BackendKind {
		match self {
			Self::Memory(_) => BackendKind::Memory,
			Self::Index(_) => BackendKind::Index,
		}
	}

	pub fn set_online(&self, online: bool) {
		match self {
			Self::Memory(backend) => backend.set_online(online),
			Self::Index(backend) => backend.set_online(online),
		}
	}
}

macro_rules! delegate {
	($self:ident, $backend:ident => $call:expr) => {
		match $self {
			Self::Memory($backend) => $call,
			Self::Index($backend) => $call,
		}
	};
}

#[async_trait]
impl DocumentBackend for Backend {
	fn name(&self) -> &str {
		delegate!(self, b => b.name())
	}

	async fn insert(&self, docs: Vec<Document>) -> Result<usize, Error> {
		delegate!(self, b => b.insert(docs).await)
	}

	async fn partial_update(&self, id: &str, attrs: Attrs) -> Result<bool, Error> {
		delegate!(self, b => b.partial_update(id, attrs).await)
	}

	async fn unset(&self, id: &str, attrs: &[String]) -> Result<bool, Error> {
		delegate!(self, b => b.unset(id, attrs).await)
	}

	async fn replace(&self, doc: Document) -> Result<bool, Error> {
		delegate!(self, b => b.replace(doc).await)
	}

	async fn id_page(&self, skip: usize, limit: usize) -> Result<Vec<DocId>, Error> {
		delegate!(self, b => b.id_page(skip, limit).await)
	}

	async fn scan(&self, skip: usize, limit: usize) -> Result<Vec<Document>, Error> {
		delegate!(self, b => b.scan(skip, limit).await)
	}

	async fn get(&self, id: &str) -> Result<Document, Error> {
		delegate!(self, b => b.get(id).await)
	}

	async fn mget(&self, ids: &[DocId]) -> Result<Vec<Document>, Error> {
		delegate!(self, b => b.mget(ids).await)
	}

	async fn remove(&self, ids: &[DocId]) -> Result<usize, Error> {
		delegate!(self, b => b.remove(ids).await)
	}

	async fn purge(&self) -> Result<(), Error> {
		delegate!(self, b => b.purge().await)
	}

	async fn count(&self) -> Result<usize, Error> {
		delegate!(self, b => b.count().await)
	}

	async fn count_from_ids(&self, ids: &[DocId]) -> Result<usize, Error> {
		delegate!(self, b => b.count_from_ids(ids).await)
	}

	async fn finalize(&self) -> Result<(), Error> {
		delegate!(self, b => b.finalize().await)
	}

	fn get_id_list(&self, step: usize) -> BoxStream<'_, Result<Vec<DocId>, Error>> {
		delegate!(self, b => b.get_id_list(step))
	}
}

/// A named set of collections sharing one storage kind, like the "source" and "target"
/// databases of the hub.
#[derive(Debug)]
pub struct Store {
	name: String,
	kind: BackendKind,
	bulk_size: usize,
	collections: RwLock<BTreeMap<String, Arc<Backend>>>,
	// Collection level metadata, like the `_meta` of a search index mapping
	metas: RwLock<BTreeMap<String, Value>>,
}

impl Store {
	pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
		Self::with_bulk_size(name, kind, DEFAULT_BULK_SIZE)
	}

	pub fn with_bulk_size(name: impl Into<String>, kind: BackendKind, bulk_size: usize) -> Self {
		Self {
			name: name.into(),
			kind,
			bulk_size,
			collections: RwLock::default(),
			metas: RwLock::default(),
		}
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub const fn kind(&self) -> BackendKind {
		self.kind
	}

	#[instrument(skip(self), fields(store = %self.name), err)]
	pub async fn create_collection(&self, name: &str) -> Result<Arc<Backend>, Error> {
		let mut collections = self.collections.write().await;

		if collections.contains_key(name) {
			return Err(Error::CollectionExists(name.to_string()));
		}

		let backend = Arc::new(Backend::new(self.kind, name, self.bulk_size));
		collections.insert(name.to_string(), Arc::clone(&backend));

		debug!("Created collection");

		Ok(backend)
	}

	pub async fn collection(&self, name: &str) -> Result<Arc<Backend>, Error> {
		self.collections
			.read()
			.await
			.get(name)
			.cloned()
			.ok_or_else(|| Error::UnknownCollection(name.to_string()))
	}

	pub async fn get_or_create(&self, name: &str) -> Arc<Backend> {
		Arc::clone(
			self.collections
				.write()
				.await
				.entry(name.to_string())
				.or_insert_with(|| Arc::new(Backend::new(self.kind, name, self.bulk_size))),
		)
	}

	pub async fn has_collection(&self, name: &str) -> bool {
		self.collections.read().await.contains_key(name)
	}

	pub async fn collection_names(&self) -> Vec<String> {
		self.collections.read().await.keys().cloned().collect()
	}

	/// Drops the collection's documents and forgets it, returns whether it existed.
	#[instrument(skip(self), fields(store = %self.name), err)]
	pub async fn drop_collection(&self, name: &str) -> Result<bool, Error> {
		let Some(backend) = self.collections.write().await.remove(name) else {
			return Ok(false);
		};

		backend.purge().await?;
		self.metas.write().await.remove(name);

		debug!("Dropped collection");

		Ok(true)
	}

	/// Replaces the metadata attached to an existing collection.
	#[instrument(skip(self, meta), fields(store = %self.name), err)]
	pub async fn set_collection_meta(&self, name: &str, meta: Value) -> Result<(), Error> {
		if !self.has_collection(name).await {
			return Err(Error::UnknownCollection(name.to_string()));
		}

		self.metas.write().await.insert(name.to_string(), meta);

		debug!("Updated collection metadata");

		Ok(())
	}

	pub async fn collection_meta(&self, name: &str) -> Option<Value> {
		self.metas.read().await.get(name).cloned()
	}
}
