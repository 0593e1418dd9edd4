use std::{
	collections::{BTreeMap, BTreeSet},
	future::Future,
	sync::Arc,
};

use chrono::Utc;
use futures::TryStreamExt;
use gh_core_backend::{
	Attrs, Backend, CohortTimestamp, DocId, Document, DocumentBackend, SnapshotName, Store,
	TIMESTAMP_ATTR,
};
use gh_core_diff::{DeltaArchive, DeltaSet, DiffEngine};
use serde_json::Value;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::{
	options::{ApplyStrategy, SyncOptions},
	report::{ApplyStats, LiveMeta, SyncReport, SyncStatus, VerifyReport},
	Error, SyncState,
};

/// Keeps the live collection of one snapshot prefix in sync with the snapshots built for it.
#[derive(Debug)]
pub struct SyncEngine {
	pub(crate) prefix: String,
	store: Arc<Store>,
	pub(crate) live: Arc<Backend>,
	diff: DiffEngine,
	pub(crate) options: SyncOptions,
	archive: Option<DeltaArchive>,
	state: watch::Sender<SyncState>,
	// Held for the whole of a sync, so only one runs at a time
	flight: Mutex<()>,
}

impl SyncEngine {
	/// Opens the `<prefix>_current` live collection of `store`, creating it when missing.
	pub async fn new(
		store: Arc<Store>,
		prefix: impl Into<String>,
		diff: DiffEngine,
		options: SyncOptions,
	) -> Self {
		let prefix = prefix.into();
		let live = store.get_or_create(&SnapshotName::live_name(&prefix)).await;
		let archive = options.archive_dir.clone().map(DeltaArchive::new);
		let (state, _) = watch::channel(SyncState::Idle);

		Self {
			prefix,
			store,
			live,
			diff,
			options,
			archive,
			state,
			flight: Mutex::new(()),
		}
	}

	#[must_use]
	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	#[must_use]
	pub fn live(&self) -> &Arc<Backend> {
		&self.live
	}

	#[must_use]
	pub fn state(&self) -> SyncState {
		*self.state.borrow()
	}

	/// Receives every state transition.
	#[must_use]
	pub fn subscribe(&self) -> watch::Receiver<SyncState> {
		self.state.subscribe()
	}

	fn set_state(&self, state: SyncState) {
		let previous = self.state.send_replace(state);
		debug!(live = %self.live.name(), %previous, %state, "Sync state changed");
	}

	fn acquire(&self) -> Result<MutexGuard<'_, ()>, Error> {
		let guard = self
			.flight
			.try_lock()
			.map_err(|_| Error::Busy(self.live.name().to_string()))?;

		if self.state() == SyncState::Failed {
			return Err(Error::NeedsReset(self.live.name().to_string()));
		}

		Ok(guard)
	}

	/// Clears a failed state so syncs can run again.
	pub fn reset(&self) -> Result<(), Error> {
		let _guard = self
			.flight
			.try_lock()
			.map_err(|_| Error::Busy(self.live.name().to_string()))?;

		if self.state() == SyncState::Failed {
			info!(live = %self.live.name(), "Resetting failed sync engine");
		}
		self.set_state(SyncState::Idle);

		Ok(())
	}

	/// Snapshot collections of this prefix, oldest first.
	pub async fn snapshots(&self) -> Vec<SnapshotName> {
		let mut snapshots = self
			.store
			.collection_names()
			.await
			.into_iter()
			.filter_map(|name| SnapshotName::parse_with_prefix(&self.prefix, &name))
			.collect::<Vec<_>>();

		snapshots.sort();

		snapshots
	}

	/// Most recent cohort timestamp on the live collection, epoch when it holds none.
	pub async fn latest_timestamp(&self) -> Result<CohortTimestamp, Error> {
		Ok(self
			.timestamp_stats()
			.await?
			.into_keys()
			.next_back()
			.unwrap_or_else(CohortTimestamp::epoch))
	}

	/// Snapshots newer than the live collection, oldest first.
	pub async fn discover_pending(&self) -> Result<Vec<SnapshotName>, Error> {
		let latest = self.latest_timestamp().await?;

		let pending = self
			.snapshots()
			.await
			.into_iter()
			.filter(|snapshot| snapshot.timestamp() > latest)
			.collect::<Vec<_>>();

		debug!(%latest, pending_count = pending.len(), "Discovered pending snapshots");

		Ok(pending)
	}

	/// Diffs `snapshot` against the live collection, applies the delta and verifies it.
	///
	/// Only a concurrent sync or a failed engine are returned as errors, stage failures are
	/// recorded on the report and leave the engine [`SyncState::Failed`].
	#[instrument(skip(self), fields(live = %self.live.name()), err)]
	pub async fn sync(&self, snapshot: &str) -> Result<SyncReport, Error> {
		let _guard = self.acquire()?;

		Ok(self.sync_locked(snapshot).await)
	}

	/// Syncs every pending snapshot in order, stopping at the first failure.
	#[instrument(skip(self), fields(live = %self.live.name()), err)]
	pub async fn sync_pending(&self) -> Result<Vec<SyncReport>, Error> {
		let _guard = self.acquire()?;

		let pending = self.discover_pending().await?;

		let mut reports = Vec::with_capacity(pending.len());

		for snapshot in pending {
			let report = self.sync_locked(&snapshot.to_string()).await;
			let success = report.is_success();
			reports.push(report);

			if !success {
				break;
			}
		}

		Ok(reports)
	}

	async fn sync_locked(&self, snapshot: &str) -> SyncReport {
		let mut report = SyncReport::start(snapshot);

		let res = self.run_stages(snapshot, &mut report).await;

		report.finished_at = Utc::now();

		match res {
			Ok(()) => {
				self.set_state(SyncState::Idle);
				info!(%report, "Snapshot synced");
			}
			Err((stage, e)) => {
				warn!(%stage, ?e, "Sync stage failed");
				self.set_state(SyncState::Failed);
				report.status = SyncStatus::Failed;
				report.failed_stage = Some(stage);
				report.error = Some(e.to_string());
			}
		}

		report
	}

	async fn stage<T>(
		&self,
		stage: SyncState,
		fut: impl Future<Output = Result<T, Error>> + Send,
	) -> Result<T, (SyncState, Error)> {
		self.set_state(stage);
		fut.await.map_err(|e| (stage, e))
	}

	async fn run_stages(
		&self,
		snapshot: &str,
		report: &mut SyncReport,
	) -> Result<(), (SyncState, Error)> {
		let delta = self
			.stage(SyncState::Diffing, async {
				let new = self.store.collection(snapshot).await?;
				Ok(self.diff.diff(&self.live, &new).await?)
			})
			.await?;

		let stats = delta.stats();
		stats.log(&delta);
		report.delta = Some(stats);

		report.apply = Some(
			self.stage(SyncState::Applying, self.apply(&delta))
				.await?,
		);

		let verify = self
			.stage(SyncState::Verifying, self.verify(&delta))
			.await?;

		for failure in verify.failures() {
			warn!(%failure, "Verification failed");
		}
		report.verify = Some(verify);

		if let Some(archive) = &self.archive {
			match archive.put(&delta).await {
				Ok(path) => report.archived = Some(path),
				Err(e) => warn!(?e, "Failed to archive applied delta"),
			}
		}

		if let Err(e) = self.stamp_live_meta(snapshot).await {
			warn!(?e, "Failed to update live collection metadata");
		}

		Ok(())
	}

	async fn stamp_live_meta(&self, snapshot: &str) -> Result<(), Error> {
		let meta = LiveMeta {
			source: snapshot.to_string(),
			synced_at: Utc::now(),
			build: self.store.collection_meta(snapshot).await,
		};

		let meta = serde_json::to_value(&meta).map_err(|source| Error::InvalidLiveMeta {
			live: self.live.name().to_string(),
			source,
		})?;

		Ok(self
			.store
			.set_collection_meta(self.live.name(), meta)
			.await?)
	}

	/// What the live collection was last synced from, `None` before the first successful sync.
	pub async fn live_meta(&self) -> Result<Option<LiveMeta>, Error> {
		self.store
			.collection_meta(self.live.name())
			.await
			.map(|meta| {
				serde_json::from_value(meta).map_err(|source| Error::InvalidLiveMeta {
					live: self.live.name().to_string(),
					source,
				})
			})
			.transpose()
	}

	/// Applies `delta` to the live collection: adds, then deletes, then updates, every touched
	/// document stamped with the delta timestamp.
	#[instrument(skip_all, fields(source = %delta.source, timestamp = %delta.timestamp), err)]
	pub async fn apply(&self, delta: &DeltaSet) -> Result<ApplyStats, Error> {
		let snapshot = self.store.collection(&delta.source).await?;
		let batch_size = self.options.batch_size.max(1);
		let mut stats = ApplyStats::default();

		for ids in delta.add.chunks(batch_size) {
			let mut docs = snapshot.mget(ids).await?;
			for doc in &mut docs {
				doc.set_timestamp(delta.timestamp);
			}
			stats.added += self.live.insert(docs).await?;
		}

		for ids in delta.delete.chunks(batch_size) {
			stats.deleted += self.live.remove(ids).await?;
		}

		for diff in &delta.update {
			let reindex = diff.is_bare() || self.options.strategy == ApplyStrategy::Reindex;

			let touched = if reindex {
				let mut doc = snapshot.get(&diff.id).await?;
				doc.set_timestamp(delta.timestamp);
				self.live.replace(doc).await?
			} else {
				let mut attrs = diff.set_attrs();
				attrs.extend(Self::stamp(delta.timestamp));

				let touched = self.live.partial_update(&diff.id, attrs).await?;
				if touched && !diff.delete.is_empty() {
					self.live.unset(&diff.id, &diff.delete).await?;
				}
				touched
			};

			match (touched, reindex) {
				(false, _) => {
					warn!(id = %diff.id, "Updated document missing from live collection");
					stats.missed += 1;
				}
				(true, true) => stats.reindexed += 1,
				(true, false) => stats.updated += 1,
			}
		}

		self.live.finalize().await?;

		info!(?stats, "Delta applied");

		Ok(stats)
	}

	/// Checks the live collection against an applied `delta`.
	#[instrument(skip_all, fields(source = %delta.source), err)]
	pub async fn verify(&self, delta: &DeltaSet) -> Result<VerifyReport, Error> {
		let mut report = VerifyReport {
			added_expected: delta.add.len(),
			added_found: self.live.count_from_ids(&delta.add).await?,
			deleted_remaining: self.live.count_from_ids(&delta.delete).await?,
			..Default::default()
		};

		let expected = delta.touched_ids();
		let mut stamped = BTreeSet::<DocId>::new();

		self.for_each_doc(|doc| match doc.timestamp() {
			None => report.unstamped += 1,
			Some(timestamp) if timestamp == delta.timestamp => {
				stamped.insert(doc.id);
			}
			Some(_) => {}
		})
		.await?;

		report.stamped_expected = expected.len();
		report.stamped_found = stamped.len();
		report.stamped_match = stamped == expected;

		Ok(report)
	}

	pub(crate) async fn for_each_doc(&self, mut f: impl FnMut(Document) + Send) -> Result<(), Error> {
		let mut feeder = self.live.doc_feeder(None, self.options.batch_size);
		while let Some(batch) = feeder.try_next().await? {
			batch.into_iter().for_each(&mut f);
		}

		Ok(())
	}

	/// Live document count per cohort timestamp, unstamped documents left out.
	pub async fn timestamp_stats(&self) -> Result<BTreeMap<CohortTimestamp, usize>, Error> {
		let mut stats = BTreeMap::<CohortTimestamp, usize>::new();

		self.for_each_doc(|doc| {
			if let Some(timestamp) = doc.timestamp() {
				*stats.entry(timestamp).or_default() += 1;
			}
		})
		.await?;

		Ok(stats)
	}

	/// Live documents stamped strictly between `after` and `before`.
	pub async fn change_history(
		&self,
		before: Option<CohortTimestamp>,
		after: Option<CohortTimestamp>,
	) -> Result<Vec<Document>, Error> {
		if before.is_none() && after.is_none() {
			return Err(Error::MissingHistoryBound);
		}

		let mut docs = vec![];

		self.for_each_doc(|doc| {
			let in_range = doc.timestamp().is_some_and(|timestamp| {
				before.map_or(true, |before| timestamp < before)
					&& after.map_or(true, |after| timestamp > after)
			});

			if in_range {
				docs.push(doc);
			}
		})
		.await?;

		Ok(docs)
	}

	/// Drops all but the `keep_last` most recent snapshots of this prefix, returning the
	/// dropped collection names.
	#[instrument(skip(self), fields(prefix = %self.prefix), err)]
	pub async fn clean_snapshots(&self, keep_last: usize) -> Result<Vec<String>, Error> {
		let snapshots = self.snapshots().await;
		let obsolete = snapshots.len().saturating_sub(keep_last);

		let mut dropped = Vec::with_capacity(obsolete);
		for snapshot in &snapshots[..obsolete] {
			let name = snapshot.to_string();
			if self.store.drop_collection(&name).await? {
				info!(%name, "Dropped obsolete snapshot");
				dropped.push(name);
			}
		}

		Ok(dropped)
	}

	pub(crate) fn stamp(timestamp: CohortTimestamp) -> Attrs {
		Attrs::from_iter([(
			TIMESTAMP_ATTR.to_string(),
			Value::String(timestamp.to_string()),
		)])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use gh_core_backend::BackendKind;
	use tracing_test::traced_test;

	#[tokio::test]
	#[traced_test]
	async fn concurrent_syncs_are_rejected() {
		let store = Arc::new(Store::new("genehub", BackendKind::Memory));
		let engine =
			SyncEngine::new(store, "genedoc", DiffEngine::default(), SyncOptions::default()).await;

		let guard = engine.flight.lock().await;

		assert!(matches!(
			engine.sync("genedoc_20240101_abcdefgh").await,
			Err(Error::Busy(_))
		));
		assert!(matches!(engine.sync_pending().await, Err(Error::Busy(_))));
		assert!(matches!(engine.reset(), Err(Error::Busy(_))));

		drop(guard);

		let report = engine.sync("genedoc_20240101_abcdefgh").await.unwrap();
		assert_eq!(report.status, SyncStatus::Failed);
		assert_eq!(report.failed_stage, Some(SyncState::Diffing));
	}
}
