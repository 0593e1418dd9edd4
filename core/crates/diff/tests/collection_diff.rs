use gh_core_backend::{Backend, BackendKind, CohortTimestamp, Document, DocumentBackend, Store};
use gh_core_diff::{AttrDiff, CompareMode, DeltaArchive, DeltaSet, DiffEngine, DiffOptions};
use gh_task_system::TaskSystem;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tracing_test::traced_test;

async fn collection(store: &Store, name: &str, docs: Vec<Value>) -> Arc<Backend> {
	let backend = store.create_collection(name).await.unwrap();
	backend
		.insert(
			docs.into_iter()
				.map(|doc| Document::try_from(doc).unwrap())
				.collect(),
		)
		.await
		.unwrap();
	backend
}

fn date(ymd: &str) -> CohortTimestamp {
	ymd.parse().unwrap()
}

#[tokio::test]
#[traced_test]
async fn added_and_deleted_keys() {
	let store = Store::new("genehub", BackendKind::Memory);
	let old = collection(
		&store,
		"genedoc_current",
		vec![json!({"_id": 1, "a": 1}), json!({"_id": 2, "a": 2})],
	)
	.await;
	let new = collection(
		&store,
		"genedoc_20240301_abcd1234",
		vec![json!({"_id": 1, "a": 1}), json!({"_id": 3, "a": 3})],
	)
	.await;

	let delta = DiffEngine::default().diff(&old, &new).await.unwrap();

	assert_eq!(delta.source, "genedoc_20240301_abcd1234");
	assert_eq!(delta.timestamp, date("20240301"));
	assert_eq!(delta.add, ["3"]);
	assert_eq!(delta.delete, ["2"]);
	assert!(delta.update.is_empty());
}

#[tokio::test]
#[traced_test]
async fn changed_attribute_yields_one_update() {
	let store = Store::new("genehub", BackendKind::Index);
	let old = collection(&store, "old", vec![json!({"_id": 1, "a": 1})]).await;
	let new = collection(&store, "new", vec![json!({"_id": 1, "a": 2})]).await;

	let delta = DiffEngine::default().diff(&old, &new).await.unwrap();

	assert!(delta.add.is_empty());
	assert!(delta.delete.is_empty());
	assert_eq!(
		serde_json::to_value(&delta.update).unwrap(),
		json!([{"_id": "1", "update": {"a": 2}}])
	);
	// Not a snapshot name
	assert_eq!(delta.timestamp, CohortTimestamp::today());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn parallel_diff_keeps_chunk_order() {
	let store = Store::new("genehub", BackendKind::Memory);
	let old = collection(
		&store,
		"old",
		(0..25).map(|i| json!({"_id": format!("{i:02}"), "n": i})).collect(),
	)
	.await;
	let new = collection(
		&store,
		"new",
		(0..25)
			.map(|i| json!({"_id": format!("{i:02}"), "n": if i % 3 == 0 { i * 10 } else { i }}))
			.collect(),
	)
	.await;

	let options = DiffOptions {
		batch_size: 4,
		..Default::default()
	};

	let sequential = DiffEngine::new(options.clone())
		.diff(&old, &new)
		.await
		.unwrap();

	let task_system = Arc::new(TaskSystem::with_workers(3));
	let parallel = DiffEngine::new(options)
		.with_task_system(Arc::clone(&task_system))
		.diff(&old, &new)
		.await
		.unwrap();

	assert_eq!(parallel, sequential);
	assert_eq!(
		parallel.updated_ids().cloned().collect::<Vec<_>>(),
		["00", "03", "06", "09", "12", "15", "18", "21", "24"]
	);

	task_system.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn unordered_lists_ignore_member_order() {
	let store = Store::new("genehub", BackendKind::Memory);
	let old = collection(
		&store,
		"old",
		vec![
			json!({"_id": 1, "go": ["GO:1", "GO:2"], "pathway": [{"id": "p1", "genes": [1, 2]}]}),
			json!({"_id": 2, "go": ["GO:1"]}),
		],
	)
	.await;
	let new = collection(
		&store,
		"new",
		vec![
			json!({"_id": 1, "go": ["GO:2", "GO:1"], "pathway": [{"genes": [2, 1], "id": "p1"}]}),
			json!({"_id": 2, "go": ["GO:1", "GO:3"]}),
		],
	)
	.await;

	let strict = DiffEngine::default().diff(&old, &new).await.unwrap();
	assert_eq!(strict.updated_ids().cloned().collect::<Vec<_>>(), ["1", "2"]);

	let unordered = DiffEngine::new(DiffOptions {
		compare: CompareMode::UnorderedLists,
		..Default::default()
	})
	.diff(&old, &new)
	.await
	.unwrap();

	assert_eq!(unordered.update.len(), 1);
	assert_eq!(unordered.update[0].id, "2");
	assert_eq!(
		unordered.update[0].update.get("go"),
		Some(&json!(["GO:1", "GO:3"]))
	);
}

#[tokio::test]
#[traced_test]
async fn fast_diff_reports_bare_entries() {
	let store = Store::new("genehub", BackendKind::Memory);
	let old = collection(&store, "old", vec![json!({"_id": 1, "a": 1, "b": 1})]).await;
	let new = collection(&store, "new", vec![json!({"_id": 1, "a": 1, "b": 2})]).await;

	let delta = DiffEngine::new(DiffOptions {
		fast: true,
		..Default::default()
	})
	.diff(&old, &new)
	.await
	.unwrap();

	assert_eq!(delta.update, [AttrDiff::bare("1")]);
	assert_eq!(delta.stats().bare_updates, 1);
}

#[tokio::test]
#[traced_test]
async fn delta_artifacts_and_archive() {
	let dir = tempfile::tempdir().unwrap();
	let archive = DeltaArchive::new(dir.path().join("deltas"));

	assert!(archive.list().await.unwrap().is_empty());
	assert!(archive.latest().await.unwrap().is_none());

	let mut older = DeltaSet::new("genedoc_20240101_aaaaaaaa", date("20240101"));
	older.add = vec!["7".to_string()];

	let mut newer = DeltaSet::new("genedoc_20240301_bbbbbbbb", date("20240301"));
	newer.delete = vec!["2".to_string()];
	newer.update = vec![serde_json::from_value(json!({
		"_id": "1",
		"add": {"go": ["GO:1"]},
		"update": {"a": 2},
		"delete": ["old"]
	}))
	.unwrap()];

	let path = archive.put(&newer).await.unwrap();
	assert!(path.ends_with("changes_20240301.json"));
	archive.put(&older).await.unwrap();
	tokio::fs::write(dir.path().join("deltas").join("notes.txt"), "hi")
		.await
		.unwrap();

	assert_eq!(
		archive.list().await.unwrap(),
		[date("20240101"), date("20240301")]
	);
	assert_eq!(archive.latest().await.unwrap(), Some(newer.clone()));
	assert_eq!(DeltaSet::load(&path).await.unwrap(), Some(newer.clone()));

	let stats = newer.stats();
	assert_eq!((stats.add, stats.delete, stats.update), (0, 1, 1));
	assert_eq!(stats.added_attrs.into_iter().collect::<Vec<_>>(), ["go"]);
	assert_eq!(stats.deleted_attrs.into_iter().collect::<Vec<_>>(), ["old"]);
	assert_eq!(
		newer.touched_ids().into_iter().collect::<Vec<_>>(),
		["1"]
	);
}
