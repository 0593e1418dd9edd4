use std::{collections::HashMap, sync::Arc};

use gh_core_backend::Store;
use gh_core_databuild::MergeBuilder;
use gh_core_diff::DiffEngine;
use gh_core_sync::SyncEngine;
use gh_task_system::{RunError, TaskSystem};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{Error, HubConfig};

pub const SOURCE_STORE: &str = "genehub_src";
pub const TARGET_STORE: &str = "genehub";

/// Build journal file name, under the logs directory.
pub const BUILD_JOURNAL: &str = "databuild.log";

/// Wires the storage, task systems and engines of one hub instance from its [`HubConfig`].
///
/// The merge builder and the sync engine of each prefix are shared by every caller, so build
/// history writes and syncs of one live collection never run concurrently.
#[derive(Debug)]
pub struct Hub {
	config: HubConfig,
	source: Arc<Store>,
	target: Arc<Store>,
	build_tasks: Arc<TaskSystem<gh_core_databuild::Error>>,
	diff_tasks: Arc<TaskSystem<gh_core_diff::Error>>,
	builder: Arc<MergeBuilder>,
	sync_engines: Mutex<HashMap<String, Arc<SyncEngine>>>,
}

impl Hub {
	/// # Panics
	///
	/// Must be called from within a tokio runtime, task system workers are spawned here.
	#[instrument(skip_all, fields(data_dir = %config.data_dir.display()), err)]
	pub async fn new(config: HubConfig) -> Result<Self, Error> {
		config.ensure_directories().await?;

		let build_tasks: TaskSystem<gh_core_databuild::Error> = task_system(config.workers);
		let diff_tasks: TaskSystem<gh_core_diff::Error> = task_system(config.workers);

		info!(
			workers = build_tasks.workers_count(),
			source_backend = ?config.source_backend,
			target_backend = ?config.target_backend,
			"Hub started",
		);

		let source = Arc::new(Store::with_bulk_size(
			SOURCE_STORE,
			config.source_backend,
			config.bulk_size,
		));
		let target = Arc::new(Store::with_bulk_size(
			TARGET_STORE,
			config.target_backend,
			config.bulk_size,
		));
		let build_tasks = Arc::new(build_tasks);

		let builder = config.mappings.iter().fold(
			MergeBuilder::new(Arc::clone(&source), Arc::clone(&target), config.build.clone())
				.await
				.with_task_system(Arc::clone(&build_tasks))
				.with_logfile(config.logs_dir().join(BUILD_JOURNAL)),
			|builder, (mapping_type, spec)| builder.register_mapping(mapping_type, spec.clone()),
		);

		Ok(Self {
			source,
			target,
			build_tasks,
			diff_tasks: Arc::new(diff_tasks),
			builder: Arc::new(builder),
			sync_engines: Mutex::default(),
			config,
		})
	}

	#[must_use]
	pub const fn config(&self) -> &HubConfig {
		&self.config
	}

	#[must_use]
	pub fn source(&self) -> Arc<Store> {
		Arc::clone(&self.source)
	}

	#[must_use]
	pub fn target(&self) -> Arc<Store> {
		Arc::clone(&self.target)
	}

	/// The merge builder, with every configured identifier mapping registered.
	#[must_use]
	pub fn builder(&self) -> Arc<MergeBuilder> {
		Arc::clone(&self.builder)
	}

	#[must_use]
	pub fn diff_engine(&self) -> DiffEngine {
		DiffEngine::new(self.config.diff.clone()).with_task_system(Arc::clone(&self.diff_tasks))
	}

	/// The sync engine keeping `<prefix>_current` up to date with the `<prefix>_*` snapshots,
	/// created on first use.
	pub async fn sync_engine(&self, prefix: &str) -> Arc<SyncEngine> {
		let mut engines = self.sync_engines.lock().await;

		if let Some(engine) = engines.get(prefix) {
			return Arc::clone(engine);
		}

		let engine = Arc::new(
			SyncEngine::new(
				Arc::clone(&self.target),
				prefix,
				self.diff_engine(),
				self.config.sync.clone(),
			)
			.await,
		);
		engines.insert(prefix.to_string(), Arc::clone(&engine));

		debug!(%prefix, "Sync engine created");

		engine
	}

	pub async fn shutdown(&self) {
		self.build_tasks.shutdown().await;
		self.diff_tasks.shutdown().await;

		info!("Hub shutdown");
	}
}

fn task_system<E: RunError>(workers: Option<usize>) -> TaskSystem<E> {
	workers.map_or_else(TaskSystem::new, TaskSystem::with_workers)
}
