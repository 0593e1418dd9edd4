use gh_core_backend::{
	BackendKind, CohortTimestamp, Document, DocumentBackend, SnapshotName, Store,
};
use gh_core_diff::{DiffEngine, DiffOptions};
use gh_core_sync::{
	ApplyStrategy, Error, SyncEngine, SyncOptions, SyncState, SyncStatus,
};

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tracing_test::traced_test;

const PREFIX: &str = "genedoc";

fn date(ymd: &str) -> CohortTimestamp {
	ymd.parse().unwrap()
}

async fn snapshot(store: &Store, ymd: &str, docs: Vec<Value>) -> String {
	let name = SnapshotName::generate(PREFIX, date(ymd)).to_string();
	store
		.create_collection(&name)
		.await
		.unwrap()
		.insert(
			docs.into_iter()
				.map(|doc| Document::try_from(doc).unwrap())
				.collect(),
		)
		.await
		.unwrap();
	name
}

async fn engine(store: &Arc<Store>, options: SyncOptions) -> SyncEngine {
	SyncEngine::new(Arc::clone(store), PREFIX, DiffEngine::default(), options).await
}

async fn live_docs(engine: &SyncEngine) -> Vec<Value> {
	let count = engine.live().count().await.unwrap();
	engine
		.live()
		.scan(0, count)
		.await
		.unwrap()
		.into_iter()
		.map(Document::into_value)
		.collect()
}

#[tokio::test]
#[traced_test]
async fn first_sync_stamps_every_document() {
	for kind in [BackendKind::Memory, BackendKind::Index] {
		let store = Arc::new(Store::new("genehub", kind));
		let first = snapshot(&store, "20240101", vec![json!({"_id": 1, "a": 1})]).await;
		let engine = engine(&store, SyncOptions::default()).await;

		assert_eq!(engine.live().name(), "genedoc_current");
		assert_eq!(engine.latest_timestamp().await.unwrap(), CohortTimestamp::epoch());

		let pending = engine.discover_pending().await.unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].to_string(), first);

		let report = engine.sync(&first).await.unwrap();
		assert_eq!(report.status, SyncStatus::Success);
		assert_eq!(report.apply.unwrap().added, 1);
		assert!(report.verify.unwrap().is_ok());

		assert_eq!(
			live_docs(&engine).await,
			[json!({"_id": "1", "a": 1, "_timestamp": "20240101"})]
		);
		assert_eq!(engine.latest_timestamp().await.unwrap(), date("20240101"));
		assert!(engine.discover_pending().await.unwrap().is_empty());
		assert_eq!(engine.state(), SyncState::Idle);
	}
}

#[tokio::test]
#[traced_test]
async fn updates_are_applied_with_the_snapshot_timestamp() {
	let store = Arc::new(Store::new("genehub", BackendKind::Memory));
	let first = snapshot(
		&store,
		"20240101",
		vec![
			json!({"_id": 1, "a": 1, "old": true}),
			json!({"_id": 2, "a": 2}),
			json!({"_id": 5, "a": 5}),
		],
	)
	.await;
	let second = snapshot(
		&store,
		"20240201",
		vec![
			json!({"_id": 1, "a": 2, "go": ["GO:1"]}),
			json!({"_id": 3, "a": 3}),
			json!({"_id": 5, "a": 5}),
		],
	)
	.await;

	let engine = engine(&store, SyncOptions::default()).await;
	engine.sync(&first).await.unwrap();

	let report = engine.sync(&second).await.unwrap();
	assert!(report.is_success());

	let delta = report.delta.unwrap();
	assert_eq!((delta.add, delta.delete, delta.update), (1, 1, 1));

	let apply = report.apply.unwrap();
	assert_eq!((apply.added, apply.deleted, apply.updated), (1, 1, 1));

	let verify = report.verify.unwrap();
	assert!(verify.is_ok(), "{:?}", verify.failures());
	assert_eq!(verify.stamped_found, 2);

	assert_eq!(
		live_docs(&engine).await,
		[
			json!({"_id": "1", "a": 2, "go": ["GO:1"], "_timestamp": "20240201"}),
			json!({"_id": "3", "a": 3, "_timestamp": "20240201"}),
			json!({"_id": "5", "a": 5, "_timestamp": "20240101"}),
		]
	);

	let stats = engine.timestamp_stats().await.unwrap();
	assert_eq!(
		stats.into_iter().collect::<Vec<_>>(),
		[(date("20240101"), 1), (date("20240201"), 2)]
	);

	let recent = engine
		.change_history(None, Some(date("20240101")))
		.await
		.unwrap();
	assert_eq!(recent.len(), 2);
	let older = engine
		.change_history(Some(date("20240201")), None)
		.await
		.unwrap();
	assert_eq!(older.len(), 1);
	assert!(matches!(
		engine.change_history(None, None).await,
		Err(Error::MissingHistoryBound)
	));
}

#[tokio::test]
#[traced_test]
async fn reindex_strategy_replaces_whole_documents() {
	let store = Arc::new(Store::new("genehub", BackendKind::Index));
	let first = snapshot(&store, "20240101", vec![json!({"_id": 1, "a": 1, "b": 1})]).await;
	let second = snapshot(&store, "20240201", vec![json!({"_id": 1, "a": 2})]).await;

	for (strategy, fast) in [(ApplyStrategy::Reindex, false), (ApplyStrategy::Partial, true)] {
		let engine = SyncEngine::new(
			Arc::clone(&store),
			PREFIX,
			DiffEngine::new(DiffOptions {
				fast,
				..Default::default()
			}),
			SyncOptions {
				strategy,
				..Default::default()
			},
		)
		.await;

		engine.live().purge().await.unwrap();

		engine.sync(&first).await.unwrap();
		let report = engine.sync(&second).await.unwrap();

		assert!(report.is_success());
		assert_eq!(report.apply.unwrap().reindexed, 1);
		assert_eq!(
			live_docs(&engine).await,
			[json!({"_id": "1", "a": 2, "_timestamp": "20240201"})]
		);
	}
}

#[tokio::test]
#[traced_test]
async fn pending_snapshots_sync_in_order() {
	let store = Arc::new(Store::new("genehub", BackendKind::Memory));
	let dir = tempfile::tempdir().unwrap();

	let newest = snapshot(&store, "20240301", vec![json!({"_id": 1, "a": 3})]).await;
	let oldest = snapshot(&store, "20240101", vec![json!({"_id": 1, "a": 1})]).await;
	let middle = snapshot(&store, "20240201", vec![json!({"_id": 1, "a": 2})]).await;
	snapshot(&store, "20240101", vec![]).await;
	store.create_collection("other_20240101_abcdefgh").await.unwrap();

	let engine = engine(
		&store,
		SyncOptions {
			archive_dir: Some(dir.path().to_path_buf()),
			..Default::default()
		},
	)
	.await;

	let reports = engine.sync_pending().await.unwrap();
	let synced = reports
		.iter()
		.map(|report| report.snapshot.as_str())
		.collect::<Vec<_>>();

	// Both 20240101 snapshots come first, in token order
	assert_eq!(synced.len(), 4);
	assert!(synced[..2].contains(&oldest.as_str()));
	assert_eq!(synced[2..], [middle.as_str(), newest.as_str()]);
	assert!(reports.iter().all(|report| report.is_success()));

	assert_eq!(engine.latest_timestamp().await.unwrap(), date("20240301"));
	assert!(reports[3]
		.archived
		.as_ref()
		.unwrap()
		.ends_with("changes_20240301.json"));

	let dropped = engine.clean_snapshots(1).await.unwrap();
	assert_eq!(dropped.len(), 3);
	assert_eq!(
		engine
			.snapshots()
			.await
			.into_iter()
			.map(|snapshot| snapshot.to_string())
			.collect::<Vec<_>>(),
		[newest]
	);
	assert!(store.has_collection("other_20240101_abcdefgh").await);
}

#[tokio::test]
#[traced_test]
async fn failed_stage_needs_reset() {
	let store = Arc::new(Store::new("genehub", BackendKind::Memory));
	let first = snapshot(&store, "20240101", vec![json!({"_id": 1, "a": 1})]).await;
	let engine = engine(&store, SyncOptions::default()).await;
	let mut states = engine.subscribe();

	let source = store.collection(&first).await.unwrap();
	source.set_online(false);

	let report = engine.sync(&first).await.unwrap();
	assert_eq!(report.status, SyncStatus::Failed);
	assert_eq!(report.failed_stage, Some(SyncState::Diffing));
	assert!(report.error.is_some());
	assert_eq!(*states.borrow_and_update(), SyncState::Failed);

	source.set_online(true);

	assert!(matches!(
		engine.sync(&first).await,
		Err(Error::NeedsReset(_))
	));
	assert!(matches!(
		engine.sync_pending().await,
		Err(Error::NeedsReset(_))
	));

	engine.reset().unwrap();
	assert_eq!(engine.state(), SyncState::Idle);
	assert!(engine.sync(&first).await.unwrap().is_success());
}

#[tokio::test]
#[traced_test]
async fn updates_to_vanished_documents_are_missed() {
	let store = Arc::new(Store::new("genehub", BackendKind::Memory));
	let first = snapshot(
		&store,
		"20240101",
		vec![json!({"_id": 1, "a": 1}), json!({"_id": 2, "a": 2})],
	)
	.await;
	let second = snapshot(
		&store,
		"20240201",
		vec![json!({"_id": 1, "a": 10}), json!({"_id": 2, "a": 20})],
	)
	.await;
	let engine = engine(&store, SyncOptions::default()).await;
	engine.sync(&first).await.unwrap();

	let delta = DiffEngine::default()
		.diff(engine.live(), &store.collection(&second).await.unwrap())
		.await
		.unwrap();
	assert_eq!(delta.update.len(), 2);

	// Removed behind the engine's back between the diff and the apply
	engine.live().remove(&["1".to_string()]).await.unwrap();

	let stats = engine.apply(&delta).await.unwrap();
	assert_eq!((stats.updated, stats.missed), (1, 1));
	assert_eq!(engine.live().count().await.unwrap(), 1);
	assert!(engine.live().get("1").await.is_err());
	assert_eq!(
		live_docs(&engine).await,
		[json!({"_id": "2", "a": 20, "_timestamp": "20240201"})]
	);
}

#[tokio::test]
#[traced_test]
async fn successful_sync_stamps_live_meta() {
	let store = Arc::new(Store::new("genehub", BackendKind::Memory));
	let first = snapshot(&store, "20240101", vec![json!({"_id": 1, "a": 1})]).await;
	let second = snapshot(&store, "20240201", vec![json!({"_id": 1, "a": 2})]).await;
	store
		.set_collection_meta(&first, json!({"src_version": {"ncbi_gene": "2024-01"}}))
		.await
		.unwrap();

	let engine = engine(&store, SyncOptions::default()).await;
	assert_eq!(engine.live_meta().await.unwrap(), None);

	assert!(engine.sync(&first).await.unwrap().is_success());

	let meta = engine.live_meta().await.unwrap().unwrap();
	assert_eq!(meta.source, first);
	assert_eq!(
		meta.build,
		Some(json!({"src_version": {"ncbi_gene": "2024-01"}}))
	);

	store.collection(&second).await.unwrap().set_online(false);
	assert!(!engine.sync(&second).await.unwrap().is_success());

	// Failed syncs leave the previous stamp alone
	assert_eq!(engine.live_meta().await.unwrap(), Some(meta.clone()));

	store.collection(&second).await.unwrap().set_online(true);
	engine.reset().unwrap();
	assert!(engine.sync(&second).await.unwrap().is_success());

	let meta = engine.live_meta().await.unwrap().unwrap();
	assert_eq!(meta.source, second);
	assert_eq!(meta.build, None);
}

#[tokio::test]
#[traced_test]
async fn verification_reports_inconsistencies() {
	let store = Arc::new(Store::new("genehub", BackendKind::Memory));
	let first = snapshot(
		&store,
		"20240101",
		vec![json!({"_id": 1, "a": 1}), json!({"_id": 2, "a": 2})],
	)
	.await;
	let engine = engine(&store, SyncOptions::default()).await;

	let delta = DiffEngine::default()
		.diff(engine.live(), &store.collection(&first).await.unwrap())
		.await
		.unwrap();
	engine.apply(&delta).await.unwrap();

	engine.live().remove(&["2".to_string()]).await.unwrap();
	engine
		.live()
		.insert(vec![Document::try_from(json!({"_id": 9})).unwrap()])
		.await
		.unwrap();

	let report = engine.verify(&delta).await.unwrap();

	assert_eq!((report.added_expected, report.added_found), (2, 1));
	assert_eq!(report.unstamped, 1);
	assert!(!report.stamped_match);
	assert_eq!(report.failures().len(), 3);
}

#[tokio::test]
#[traced_test]
async fn timestamps_backup_and_restore() {
	let store = Arc::new(Store::new("genehub", BackendKind::Memory));
	let first = snapshot(
		&store,
		"20240101",
		vec![json!({"_id": 1, "a": 1}), json!({"_id": 2, "a": 2})],
	)
	.await;
	let engine = engine(&store, SyncOptions::default()).await;
	engine.sync(&first).await.unwrap();

	let dir = tempfile::tempdir().unwrap();

	for compress in [false, true] {
		let path = dir.path().join(engine.backup_file_name(compress));
		assert_eq!(
			path.extension().unwrap(),
			if compress { "gz" } else { "txt" }
		);

		assert_eq!(engine.backup_timestamps(&path, compress).await.unwrap(), 2);

		if !compress {
			assert_eq!(
				tokio::fs::read_to_string(&path).await.unwrap(),
				"1\t20240101\n2\t20240101\n"
			);
		}

		engine
			.live()
			.unset("1", &["_timestamp".to_string()])
			.await
			.unwrap();
		engine.live().remove(&["2".to_string()]).await.unwrap();

		let stats = engine.restore_timestamps(&path).await.unwrap();
		assert_eq!((stats.restamped, stats.missing), (1, 1));
		assert_eq!(
			engine.live().get("1").await.unwrap().timestamp(),
			Some(date("20240101"))
		);

		engine
			.live()
			.insert(vec![Document::try_from(
				json!({"_id": 2, "a": 2, "_timestamp": "20240101"}),
			)
			.unwrap()])
			.await
			.unwrap();
	}

	let broken = dir.path().join("broken.txt");
	tokio::fs::write(&broken, "1\t2024-01-01\n").await.unwrap();
	assert!(matches!(
		engine.restore_timestamps(&broken).await,
		Err(Error::InvalidBackupLine { line: 1, .. })
	));
}
