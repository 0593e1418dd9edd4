use std::{
	collections::{BTreeMap, BTreeSet, HashSet},
	ops::Bound,
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use futures::{
	stream::{self, BoxStream},
	StreamExt,
};
use tokio::sync::RwLock;
use tracing::{instrument, trace};

use crate::{Attrs, DocId, Document, DocumentBackend, Error};

/// Mutable document store with per-document atomic updates, the equivalent of a document
/// database collection.
#[derive(Debug)]
pub struct MemoryBackend {
	name: String,
	docs: RwLock<BTreeMap<DocId, Attrs>>,
	online: AtomicBool,
}

impl MemoryBackend {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			docs: RwLock::default(),
			online: AtomicBool::new(true),
		}
	}

	/// Taking a backend offline makes every following call fail with [`Error::Unavailable`].
	pub fn set_online(&self, online: bool) {
		self.online.store(online, Ordering::SeqCst);
	}

	fn check_online(&self) -> Result<(), Error> {
		if self.online.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(Error::offline(&self.name))
		}
	}

	/// Up to `limit` keys strictly after `after`, in key order.
	async fn ids_after(&self, after: Option<&str>, limit: usize) -> Result<Vec<DocId>, Error> {
		self.check_online()?;

		let lower = after.map_or(Bound::Unbounded, Bound::Excluded);

		Ok(self
			.docs
			.read()
			.await
			.range::<str, _>((lower, Bound::Unbounded))
			.take(limit)
			.map(|(id, _)| id.clone())
			.collect())
	}

	fn not_found(&self, id: &str) -> Error {
		Error::NotFound {
			collection: self.name.clone(),
			id: id.to_string(),
		}
	}
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
	fn name(&self) -> &str {
		&self.name
	}

	#[instrument(skip_all, fields(collection = %self.name, docs_count = docs.len()), err)]
	async fn insert(&self, docs: Vec<Document>) -> Result<usize, Error> {
		self.check_online()?;

		let mut stored = self.docs.write().await;

		// Reject the whole batch before touching anything
		if let Some(id) = first_duplicate(&docs, |id| stored.contains_key(id)) {
			return Err(Error::DuplicateKey {
				collection: self.name.clone(),
				id,
			});
		}

		let inserted = docs.len();
		stored.extend(docs.into_iter().map(|Document { id, attrs }| (id, attrs)));

		trace!(inserted, "Inserted documents");

		Ok(inserted)
	}

	async fn partial_update(&self, id: &str, attrs: Attrs) -> Result<bool, Error> {
		self.check_online()?;

		Ok(self
			.docs
			.write()
			.await
			.get_mut(id)
			.map(|existing| existing.extend(attrs))
			.is_some())
	}

	async fn unset(&self, id: &str, attrs: &[String]) -> Result<bool, Error> {
		self.check_online()?;

		Ok(self
			.docs
			.write()
			.await
			.get_mut(id)
			.map(|existing| {
				for attr in attrs {
					existing.remove(attr);
				}
			})
			.is_some())
	}

	async fn replace(&self, doc: Document) -> Result<bool, Error> {
		self.check_online()?;

		Ok(self
			.docs
			.write()
			.await
			.get_mut(&doc.id)
			.map(|existing| *existing = doc.attrs)
			.is_some())
	}

	async fn id_page(&self, skip: usize, limit: usize) -> Result<Vec<DocId>, Error> {
		self.check_online()?;

		Ok(self
			.docs
			.read()
			.await
			.keys()
			.skip(skip)
			.take(limit)
			.cloned()
			.collect())
	}

	async fn scan(&self, skip: usize, limit: usize) -> Result<Vec<Document>, Error> {
		self.check_online()?;

		Ok(self
			.docs
			.read()
			.await
			.iter()
			.skip(skip)
			.take(limit)
			.map(|(id, attrs)| Document::new(id.clone(), attrs.clone()))
			.collect())
	}

	async fn get(&self, id: &str) -> Result<Document, Error> {
		self.check_online()?;

		self.docs
			.read()
			.await
			.get(id)
			.map(|attrs| Document::new(id, attrs.clone()))
			.ok_or_else(|| self.not_found(id))
	}

	async fn mget(&self, ids: &[DocId]) -> Result<Vec<Document>, Error> {
		self.check_online()?;

		let docs = self.docs.read().await;

		Ok(ids
			.iter()
			.filter_map(|id| {
				docs.get(id)
					.map(|attrs| Document::new(id.clone(), attrs.clone()))
			})
			.collect())
	}

	async fn remove(&self, ids: &[DocId]) -> Result<usize, Error> {
		self.check_online()?;

		let mut docs = self.docs.write().await;

		Ok(ids.iter().filter(|id| docs.remove(*id).is_some()).count())
	}

	async fn purge(&self) -> Result<(), Error> {
		self.check_online()?;

		self.docs.write().await.clear();

		Ok(())
	}

	async fn count(&self) -> Result<usize, Error> {
		self.check_online()?;

		Ok(self.docs.read().await.len())
	}

	async fn count_from_ids(&self, ids: &[DocId]) -> Result<usize, Error> {
		self.check_online()?;

		let docs = self.docs.read().await;

		Ok(ids
			.iter()
			.collect::<BTreeSet<_>>()
			.into_iter()
			.filter(|id| docs.contains_key(*id))
			.count())
	}

	/// Pages by key range from the last seen key instead of skipping from the start.
	fn get_id_list(&self, step: usize) -> BoxStream<'_, Result<Vec<DocId>, Error>> {
		let step = step.max(1);

		stream::try_unfold(Some(None::<DocId>), move |cursor| async move {
			let Some(after) = cursor else {
				return Ok(None);
			};

			let page = self.ids_after(after.as_deref(), step).await?;
			let next = (page.len() == step).then(|| page.last().cloned());

			Ok::<_, Error>((!page.is_empty()).then_some((page, next)))
		})
		.boxed()
	}

	async fn finalize(&self) -> Result<(), Error> {
		self.check_online()
	}
}

/// First key of the batch that either already exists or shows up twice in the batch itself.
pub(crate) fn first_duplicate(docs: &[Document], exists: impl Fn(&str) -> bool) -> Option<DocId> {
	let mut seen = HashSet::with_capacity(docs.len());

	docs.iter()
		.find(|doc| exists(&doc.id) || !seen.insert(doc.id.as_str()))
		.map(|doc| doc.id.clone())
}
