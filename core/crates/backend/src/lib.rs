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

use std::{collections::BTreeSet, fmt, ops::Range};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

mod document;
mod error;
mod index;
mod memory;
mod snapshot;
mod store;

pub use document::{Attrs, CohortTimestamp, DocId, Document, ID_ATTR, TIMESTAMP_ATTR};
pub use error::Error;
pub use index::{IndexBackend, DEFAULT_BULK_SIZE};
pub use memory::MemoryBackend;
pub use snapshot::SnapshotName;
pub use store::{Backend, BackendKind, Store};

/// Default page size for lazy key and document feeds.
pub const DEFAULT_STEP: usize = 10_000;

/// A collection of documents addressed by `_id`.
///
/// Implementations must allow concurrent `partial_update` calls touching different attributes of
/// the same key without any locking on the caller side. Nothing at this layer is retried.
#[async_trait]
pub trait DocumentBackend: fmt::Debug + Send + Sync {
	/// Collection name, used in logs and errors.
	fn name(&self) -> &str;

	/// Bulk insert, fails with [`Error::DuplicateKey`] if any key already exists.
	async fn insert(&self, docs: Vec<Document>) -> Result<usize, Error>;

	/// Merges `attrs` into the existing record (`$set` semantics). Never creates a record,
	/// returns whether a record was touched.
	async fn partial_update(&self, id: &str, attrs: Attrs) -> Result<bool, Error>;

	/// Removes the given attributes from an existing record, no-op for a missing key.
	async fn unset(&self, id: &str, attrs: &[String]) -> Result<bool, Error>;

	/// Replaces every attribute of an existing record. Never creates a record.
	async fn replace(&self, doc: Document) -> Result<bool, Error>;

	/// A page of keys in storage-native order.
	async fn id_page(&self, skip: usize, limit: usize) -> Result<Vec<DocId>, Error>;

	/// A page of documents in storage-native order.
	async fn scan(&self, skip: usize, limit: usize) -> Result<Vec<Document>, Error>;

	async fn get(&self, id: &str) -> Result<Document, Error>;

	/// Batch read, misses are silently dropped and no order is guaranteed.
	async fn mget(&self, ids: &[DocId]) -> Result<Vec<Document>, Error>;

	/// Removes the given keys, returning how many existed.
	async fn remove(&self, ids: &[DocId]) -> Result<usize, Error>;

	/// Removes every record.
	async fn purge(&self) -> Result<(), Error>;

	async fn count(&self) -> Result<usize, Error>;

	/// How many of the distinct `ids` exist.
	async fn count_from_ids(&self, ids: &[DocId]) -> Result<usize, Error> {
		let unique = ids.iter().cloned().collect::<BTreeSet<_>>();
		let unique = unique.into_iter().collect::<Vec<_>>();

		self.mget(&unique).await.map(|docs| docs.len())
	}

	/// Flush, compact or optimize, whatever the storage kind needs after a bulk of writes.
	async fn finalize(&self) -> Result<(), Error>;

	/// Lazy, restartable stream of every key, fetched `step` keys at a time.
	fn get_id_list(&self, step: usize) -> BoxStream<'_, Result<Vec<DocId>, Error>> {
		let step = step.max(1);

		stream::try_unfold(0, move |skip| async move {
			let page = self.id_page(skip, step).await?;
			let next = skip + page.len();
			Ok::<_, Error>((!page.is_empty()).then_some((page, next)))
		})
		.boxed()
	}

	/// Lazy stream of document batches of at most `step` documents, optionally restricted to the
	/// `[skip, skip + limit)` partition given by `range`.
	fn doc_feeder(
		&self,
		range: Option<Range<usize>>,
		step: usize,
	) -> BoxStream<'_, Result<Vec<Document>, Error>> {
		let step = step.max(1);
		let Range { start, end } = range.unwrap_or(0..usize::MAX);

		stream::try_unfold(start, move |skip| async move {
			if skip >= end {
				return Ok(None);
			}

			let batch = self.scan(skip, step.min(end - skip)).await?;
			let next = skip + batch.len();
			Ok::<_, Error>((!batch.is_empty()).then_some((batch, next)))
		})
		.boxed()
	}
}
