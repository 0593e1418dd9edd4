use gh_core::{
	backend::{CohortTimestamp, Document, DocumentBackend},
	databuild::{BuildConfig, BuildMeta, BuildStatus, MappingSpec, MergeRequest, SourceMeta},
	sync::{Error as SyncError, SyncState, SyncStatus},
	Hub, HubConfig, BUILD_JOURNAL,
};

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tracing_test::traced_test;

async fn add_source(hub: &Hub, meta: SourceMeta, docs: Vec<Value>) {
	hub.source()
		.create_collection(meta.collection_name())
		.await
		.unwrap()
		.insert(
			docs.into_iter()
				.map(|doc| Document::try_from(doc).unwrap())
				.collect(),
		)
		.await
		.unwrap();

	hub.builder().catalog().register(meta).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn built_snapshot_syncs_into_live_collection() {
	let dir = tempfile::tempdir().unwrap();

	let mut config = HubConfig::default_with_dir(dir.path());
	config.workers = Some(2);
	config
		.mappings
		.insert("ensembl".into(), MappingSpec::new("ensembl_map", "entrez"));
	config.save().await.unwrap();

	let hub = Hub::new(HubConfig::load_from(dir.path()).await.unwrap())
		.await
		.unwrap();

	add_source(
		&hub,
		SourceMeta::new("ncbi_gene").with_version("2024-01"),
		vec![
			json!({"_id": 1, "taxid": 9606, "symbol": "CDK2"}),
			json!({"_id": 3, "taxid": 9606, "symbol": "TP53"}),
		],
	)
	.await;
	add_source(
		&hub,
		SourceMeta::new("ensembl_gene").with_id_mapping_type("ensembl"),
		vec![json!({"_id": "ENSG3", "ensembl": {"gene": "ENSG3"}})],
	)
	.await;
	hub.source()
		.create_collection("ensembl_map")
		.await
		.unwrap()
		.insert(vec![
			Document::try_from(json!({"_id": "ENSG3", "entrez": "3"})).unwrap(),
		])
		.await
		.unwrap();

	let builder = hub.builder();
	builder
		.configs()
		.save(&BuildConfig::new(
			"genes",
			["ncbi_gene", "ensembl_gene"],
			["ncbi_gene"],
		))
		.await
		.unwrap();

	let run = builder
		.merge("genes", MergeRequest::default())
		.await
		.unwrap();
	assert_eq!(run.status, BuildStatus::Success);
	assert_eq!(run.stats.target_count, Some(2));

	let journal = run.logfile.clone().unwrap();
	assert_eq!(journal, dir.path().join("logs").join(BUILD_JOURNAL));
	assert!(tokio::fs::read_to_string(&journal)
		.await
		.unwrap()
		.contains(&run.target_name));

	let engine = hub.sync_engine("genedoc_genes").await;
	let reports = engine.sync_pending().await.unwrap();

	assert_eq!(reports.len(), 1);
	assert_eq!(reports[0].status, SyncStatus::Success);
	assert_eq!(reports[0].snapshot, run.target_name);

	let archived = reports[0].archived.clone().unwrap();
	assert!(archived.starts_with(dir.path().join("deltas")));
	assert!(archived.exists());

	let live = engine.live();
	let tp53 = live.get("3").await.unwrap();
	assert_eq!(tp53.get("symbol"), Some(&json!("TP53")));
	assert_eq!(tp53.get("ensembl"), Some(&json!({"gene": "ENSG3"})));
	assert_eq!(tp53.timestamp(), Some(CohortTimestamp::today()));

	assert!(engine.discover_pending().await.unwrap().is_empty());

	let live_meta = engine.live_meta().await.unwrap().unwrap();
	assert_eq!(live_meta.source, run.target_name);
	let build_meta: BuildMeta = serde_json::from_value(live_meta.build.unwrap()).unwrap();
	assert_eq!(build_meta.build_config, "genes");
	assert_eq!(build_meta.src_version["ncbi_gene"], "2024-01");

	hub.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn hub_creates_its_directories() {
	let dir = tempfile::tempdir().unwrap();
	let data_dir = dir.path().join("hub");

	let hub = Hub::new(HubConfig::load_from(&data_dir).await.unwrap())
		.await
		.unwrap();

	assert!(hub.config().logs_dir().is_dir());
	assert!(hub.config().backups_dir().is_dir());
	assert!(data_dir.join("deltas").is_dir());
	assert!(data_dir.join(gh_core::CONFIG_FILE_NAME).is_file());

	hub.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn sync_engines_are_shared_per_prefix() {
	let dir = tempfile::tempdir().unwrap();

	let hub = Hub::new(HubConfig::load_from(dir.path()).await.unwrap())
		.await
		.unwrap();

	let engine = hub.sync_engine("genedoc").await;
	let report = engine.sync("genedoc_20240101_abcdefgh").await.unwrap();
	assert_eq!(report.status, SyncStatus::Failed);

	// Asking again hands out the same engine, still waiting for a reset
	let again = hub.sync_engine("genedoc").await;
	assert!(Arc::ptr_eq(&engine, &again));
	assert_eq!(again.state(), SyncState::Failed);
	assert!(matches!(
		again.sync("genedoc_20240101_abcdefgh").await,
		Err(SyncError::NeedsReset(_))
	));

	let other = hub.sync_engine("othergene").await;
	assert!(!Arc::ptr_eq(&engine, &other));
	assert_eq!(other.state(), SyncState::Idle);

	again.reset().unwrap();
	assert_eq!(engine.state(), SyncState::Idle);

	assert!(Arc::ptr_eq(&hub.builder(), &hub.builder()));

	hub.shutdown().await;
}
