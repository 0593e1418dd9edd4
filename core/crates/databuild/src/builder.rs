use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	path::{Path, PathBuf},
	sync::Arc,
};

use chrono::{SecondsFormat, Utc};
use futures::TryStreamExt;
use futures_concurrency::future::Join;
use gh_core_backend::{
	Backend, CohortTimestamp, DocId, Document, DocumentBackend, SnapshotName, Store,
};
use gh_core_mapper::IdentifierMapper;
use gh_task_system::{TaskOutput, TaskStatus, TaskSystem};
use gh_utils::{error::FileIOError, partition_ranges};
use itertools::Itertools;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::{
	catalog::{SourceCatalog, SourceMeta},
	config::{BuildConfig, BuildConfigStore},
	mappers::{MappingSpec, Mappers},
	options::{BuildOptions, MergeMode},
	run::{BuildMeta, BuildRun, CountMismatch, ResumePoint, RootStats, SourceMergeStats},
	tasks::merge_partition::{MergePartitionTask, PartitionMerge},
	Error,
};

/// Arguments of a [`MergeBuilder::merge`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeRequest {
	/// Restrict the merge to these sources, all configured sources otherwise.
	pub sources: Option<Vec<String>>,
	/// Continue the latest run at this position of its merge plan, reusing its target and root
	/// key universe.
	pub resume_at: Option<usize>,
	/// Target collection name, generated from the configuration name otherwise.
	pub target_name: Option<String>,
}

impl MergeRequest {
	#[must_use]
	pub fn resume_at(position: usize) -> Self {
		Self {
			resume_at: Some(position),
			..Default::default()
		}
	}
}

/// Where a merge starts from.
struct MergeStart {
	target: Arc<Backend>,
	plan: Vec<String>,
	next: usize,
	keys: Option<Arc<BTreeSet<DocId>>>,
}

#[derive(Debug)]
pub struct MergeBuilder {
	source: Arc<Store>,
	target: Arc<Store>,
	catalog: SourceCatalog,
	configs: BuildConfigStore,
	options: BuildOptions,
	mappings: HashMap<String, MappingSpec>,
	prebuilt: Mappers,
	task_system: Option<Arc<TaskSystem<Error>>>,
	logfile: Option<PathBuf>,
}

impl MergeBuilder {
	pub async fn new(source: Arc<Store>, target: Arc<Store>, options: BuildOptions) -> Self {
		let catalog = SourceCatalog::open(&source).await;
		let configs = BuildConfigStore::open(&source, options.max_build_history).await;

		Self {
			source,
			target,
			catalog,
			configs,
			options,
			mappings: HashMap::new(),
			prebuilt: Mappers::default(),
			task_system: None,
			logfile: None,
		}
	}

	/// Task system used by [`MergeMode::Parallel`].
	#[must_use]
	pub fn with_task_system(mut self, task_system: Arc<TaskSystem<Error>>) -> Self {
		self.task_system = Some(task_system);
		self
	}

	/// Journal file recorded on every build run. Run starts, merged sources and run outcomes are
	/// appended to it.
	#[must_use]
	pub fn with_logfile(mut self, logfile: impl Into<PathBuf>) -> Self {
		self.logfile = Some(logfile.into());
		self
	}

	/// Registers how to build the mapper of an `id_mapping_type`. Mappers are built once per
	/// merge run and dropped with it.
	#[must_use]
	pub fn register_mapping(mut self, mapping_type: impl Into<String>, spec: MappingSpec) -> Self {
		self.mappings.insert(mapping_type.into(), spec);
		self
	}

	/// Uses an already built mapper for an `id_mapping_type`.
	#[must_use]
	pub fn with_mapper(
		mut self,
		mapping_type: impl Into<String>,
		mapper: Arc<IdentifierMapper>,
	) -> Self {
		self.prebuilt.insert(mapping_type, mapper);
		self
	}

	#[must_use]
	pub const fn catalog(&self) -> &SourceCatalog {
		&self.catalog
	}

	#[must_use]
	pub const fn configs(&self) -> &BuildConfigStore {
		&self.configs
	}

	#[must_use]
	pub const fn options(&self) -> &BuildOptions {
		&self.options
	}

	/// Every declared source must exist as a collection and be registered in the catalog.
	#[instrument(skip_all, fields(config = %config.name), err)]
	pub async fn validate(&self, config: &BuildConfig) -> Result<(), Error> {
		config.check()?;

		let mut unknown = vec![];

		for name in config.sources.iter().chain(&config.root_sources).unique() {
			let known = match self.catalog.get(name).await? {
				Some(meta) => self.source.has_collection(meta.collection_name()).await,
				None => false,
			};

			if !known {
				unknown.push(name.clone());
			}
		}

		if unknown.is_empty() {
			Ok(())
		} else {
			Err(Error::UnknownSource(unknown))
		}
	}

	/// Builds the mappers needed by the sources of `config`.
	pub async fn load_mappers(&self, config: &BuildConfig) -> Result<Mappers, Error> {
		let mut needed = vec![];
		for name in config.sources.iter().chain(&config.root_sources).unique() {
			if let Some(mapping_type) = self.source_meta(name).await?.id_mapping_type {
				needed.push(mapping_type);
			}
		}

		let mut mappers = self.prebuilt.clone();
		mappers
			.build_missing(&self.mappings, needed.into_iter().unique(), &self.source)
			.await?;

		Ok(mappers)
	}

	async fn source_meta(&self, name: &str) -> Result<SourceMeta, Error> {
		self.catalog
			.get(name)
			.await?
			.ok_or_else(|| Error::UnknownSource(vec![name.to_string()]))
	}

	async fn source_backend(&self, meta: &SourceMeta) -> Result<Arc<Backend>, Error> {
		self.source
			.collection(meta.collection_name())
			.await
			.map_err(|_| Error::UnknownSource(vec![meta.name.clone()]))
	}

	/// Inserts the root records into `target`, returning the canonical key universe.
	///
	/// Foreign-keyed root records are only inserted when their key has no canonical mapping,
	/// otherwise another root source already describes them.
	#[instrument(skip_all, fields(config = %config.name, target = %target.name()), err)]
	pub async fn build_root(
		&self,
		config: &BuildConfig,
		target: &Backend,
		mappers: &Mappers,
	) -> Result<(BTreeSet<DocId>, RootStats), Error> {
		let filter = config.species_filter();
		let mut keys = BTreeSet::new();
		let mut stats = RootStats::default();

		for root in &config.root_sources {
			let meta = self.source_meta(root).await?;
			let mapper = mappers.for_source(&meta)?;
			let backend = self.source_backend(&meta).await?;

			let mut inserted = 0;
			let mut feeder = backend.doc_feeder(None, self.options.batch_size);

			while let Some(batch) = feeder.try_next().await? {
				let mut docs = Vec::with_capacity(batch.len());

				for Document { id, mut attrs } in batch {
					if !filter.accepts(attrs.get(&self.options.species_attr)) {
						stats.filtered += 1;
						continue;
					}

					if mapper
						.as_ref()
						.is_some_and(|mapper| mapper.translate(&id).is_some())
					{
						stats.overlap += 1;
						continue;
					}

					if !keys.insert(id.clone()) {
						debug!(%id, root_source = %root, "Root key already present, skipping");
						continue;
					}

					for attr in &self.options.merge_exclude_attrs {
						attrs.remove(attr);
					}

					docs.push(Document { id, attrs });
				}

				if !docs.is_empty() {
					inserted += target.insert(docs).await?;
				}
			}

			info!(root_source = %root, inserted, "Root source inserted");
			stats.per_source.insert(root.clone(), inserted);
		}

		stats.total = keys.len();

		info!(
			total = stats.total,
			overlap = stats.overlap,
			filtered = stats.filtered,
			"Root documents built"
		);

		Ok((keys, stats))
	}

	/// Merges one source into `target` through partial updates, records resolving outside
	/// `keys` are dropped.
	#[instrument(skip(self, config, target, keys, mappers), fields(config = %config.name), err)]
	pub async fn merge_source(
		&self,
		config: &BuildConfig,
		src_name: &str,
		target: &Arc<Backend>,
		keys: &Arc<BTreeSet<DocId>>,
		mappers: &Mappers,
	) -> Result<SourceMergeStats, Error> {
		let meta = self.source_meta(src_name).await?;

		let merge = PartitionMerge {
			src_name: src_name.to_string(),
			mapper: mappers.for_source(&meta)?,
			source: self.source_backend(&meta).await?,
			target: Arc::clone(target),
			keys: Arc::clone(keys),
			range: None,
			batch_size: self.options.batch_size,
			exclude_attrs: self.options.merge_exclude_attrs.clone().into(),
			dedup_lists: self.options.dedup_lists,
		};

		let stats = match (self.options.mode, &self.task_system) {
			(MergeMode::Parallel { partition_size }, Some(task_system)) => {
				merge_partitioned(merge, partition_size, task_system).await?
			}
			(MergeMode::Parallel { .. }, None) => {
				warn!("Parallel merge requested without a task system, merging sequentially");
				merge.run().await?
			}
			(MergeMode::Sequential, _) => merge.run().await?,
		};

		info!(?stats, "Source merged");

		Ok(stats)
	}

	/// Runs a full or resumed merge of a build configuration.
	///
	/// Configuration and validation problems are returned as errors before anything is
	/// written. Once the run started, failures are recorded on the returned run instead, and the
	/// target is left as is so the run can be resumed.
	#[instrument(skip(self, request), err)]
	pub async fn merge(&self, config_name: &str, request: MergeRequest) -> Result<BuildRun, Error> {
		let config = self.configs.get(config_name).await?;
		self.validate(&config).await?;

		if let Some(requested) = &request.sources {
			if let Some(unlisted) = requested.iter().find(|s| !config.sources.contains(s)) {
				return Err(Error::Configuration {
					name: config.name.clone(),
					reason: format!("requested source '{unlisted}' is not part of the build"),
				});
			}
		}

		let mut run = BuildRun::start(
			request
				.target_name
				.clone()
				.unwrap_or_else(|| self.generate_target_name(&config)),
			self.target.kind(),
			self.logfile.clone(),
		);

		let resume = match request.resume_at {
			None => None,
			Some(position) => {
				let (plan, keys) = Self::carry_over(&config, position, &mut run)?;
				Some(MergeStart {
					target: self.target.collection(&run.target_name).await?,
					plan,
					next: position,
					keys: Some(keys),
				})
			}
		};

		let target_name = run.target_name.clone();

		self.configs.begin_run(config_name, run).await?;

		info!(%target_name, resumed = resume.is_some(), "Build run started");
		self.journal(&format!(
			"started config='{config_name}' target='{target_name}' resume_at={:?}",
			request.resume_at
		))
		.await;

		let res = self
			.run_merge(&config, &request, &target_name, resume)
			.await;

		if let Err(e) = &res {
			warn!(%target_name, ?e, "Build run failed");
		}

		let run = self
			.configs
			.update_run(config_name, |run| run.finish(res.map_err(|e| e.to_string())))
			.await?;

		info!(%run, "Build run finished");
		match &run.error {
			Some(e) => self.journal(&format!("finished {run}: {e}")).await,
			None => self.journal(&format!("finished {run}")).await,
		}

		Ok(run)
	}

	/// Seeds `run` with what the latest run already did before `position` of its merge plan.
	fn carry_over(
		config: &BuildConfig,
		position: usize,
		run: &mut BuildRun,
	) -> Result<(Vec<String>, Arc<BTreeSet<DocId>>), Error> {
		let (previous, resume_point) = config
			.latest_run()
			.and_then(|previous| {
				previous
					.resume_point
					.as_ref()
					.map(|resume_point| (previous, resume_point))
			})
			.ok_or_else(|| Error::NothingToResume(config.name.clone()))?;

		if position > resume_point.plan.len() {
			return Err(Error::InvalidResumePoint {
				position,
				plan_len: resume_point.plan.len(),
			});
		}

		run.target_name.clone_from(&previous.target_name);
		run.stats.root.clone_from(&previous.stats.root);

		run.src_version.clone_from(&previous.src_version);
		for src_name in &resume_point.plan[position..] {
			run.src_version.remove(src_name);
		}

		for src_name in &resume_point.plan[..position] {
			if let Some(stats) = previous.stats.merged.get(src_name) {
				run.stats.merged.insert(src_name.clone(), *stats);
			}
			if previous.stats.skipped_sources.contains(src_name) {
				run.stats.skipped_sources.push(src_name.clone());
			}
		}

		run.resume_point = Some(ResumePoint {
			next: position,
			..resume_point.clone()
		});

		Ok((
			resume_point.plan.clone(),
			Arc::new(resume_point.canonical_keys.iter().cloned().collect()),
		))
	}

	fn generate_target_name(&self, config: &BuildConfig) -> String {
		SnapshotName::generate(
			&format!("{}_{}", self.options.target_prefix, config.name),
			CohortTimestamp::today(),
		)
		.to_string()
	}

	async fn run_merge(
		&self,
		config: &BuildConfig,
		request: &MergeRequest,
		target_name: &str,
		resume: Option<MergeStart>,
	) -> Result<(), Error> {
		let mappers = self.load_mappers(config).await?;

		let MergeStart {
			target,
			plan,
			next,
			keys,
		} = match resume {
			Some(start) => start,
			None => self.fresh_start(config, request, target_name).await?,
		};

		let keys = match keys {
			Some(keys) => keys,
			None => {
				let (keys, root_stats) = self.build_root(config, &target, &mappers).await?;
				let keys = Arc::new(keys);

				let mut root_versions = BTreeMap::new();
				for root in &config.root_sources {
					if let Some(version) = self.source_meta(root).await?.version {
						root_versions.insert(root.clone(), version);
					}
				}

				let resume_point = ResumePoint {
					plan: plan.clone(),
					next: 0,
					canonical_keys: keys.iter().cloned().collect(),
				};

				self.configs
					.update_run(&config.name, |run| {
						run.stats.root = Some(root_stats);
						run.src_version.extend(root_versions);
						run.resume_point = Some(resume_point);
					})
					.await?;

				keys
			}
		};

		for (position, src_name) in plan.iter().enumerate().skip(next) {
			let meta = self.source_meta(src_name).await?;

			let stats = match self
				.merge_source(config, src_name, &target, &keys, &mappers)
				.await
			{
				Ok(stats) => Some(stats),
				Err(e @ Error::MissingMapper { .. }) => {
					warn!(%src_name, %e, "Skipping source without identifier mapper");
					None
				}
				Err(e) => return Err(e),
			};

			if let Some(stats) = &stats {
				self.journal(&format!(
					"merged source='{src_name}' records={} updated={} dropped={}",
					stats.records, stats.updated, stats.dropped
				))
				.await;
			}

			self.configs
				.update_run(&config.name, |run| {
					match stats {
						Some(stats) => {
							run.stats.merged.insert(src_name.clone(), stats);
							if let Some(version) = meta.version {
								run.src_version.insert(src_name.clone(), version);
							}
						}
						None => run.stats.skipped_sources.push(src_name.clone()),
					}

					if let Some(resume_point) = &mut run.resume_point {
						resume_point.next = position + 1;
					}
				})
				.await?;
		}

		target.finalize().await?;

		let actual = target.count().await?;
		let expected = keys.len();
		let mismatch = (actual != expected).then_some(CountMismatch { expected, actual });

		if let Some(mismatch) = mismatch {
			warn!(%mismatch, "Target count doesn't match the root key universe");
		}

		let run = self
			.configs
			.update_run(&config.name, |run| {
				run.stats.target_count = Some(actual);
				run.stats.count_mismatch = mismatch;
			})
			.await?;

		if let Some(mismatch) = mismatch.filter(|_| self.options.strict_counts) {
			return Err(Error::CountMismatch(mismatch));
		}

		let meta = BuildMeta {
			build_config: config.name.clone(),
			target_name: target_name.to_string(),
			src_version: run.src_version,
			stats: run.stats,
			index_schema: self.catalog.index_schema(&config.sources).await?,
			built_at: Utc::now(),
		};

		self.target
			.set_collection_meta(target_name, to_value(&meta)?)
			.await?;

		Ok(())
	}

	/// Metadata of a successfully built target collection.
	pub async fn build_meta(&self, target_name: &str) -> Result<Option<BuildMeta>, Error> {
		self.target
			.collection_meta(target_name)
			.await
			.map(|meta| {
				serde_json::from_value(meta).map_err(|error| Error::StoredDocument {
					collection: target_name.to_string(),
					id: "_meta".to_string(),
					error,
				})
			})
			.transpose()
	}

	async fn journal(&self, entry: &str) {
		let Some(logfile) = &self.logfile else {
			return;
		};

		let line = format!(
			"{} {entry}\n",
			Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
		);

		if let Err(e) = append_line(logfile, &line).await {
			warn!(?e, "Failed to write build journal");
		}
	}

	/// Recreates the target collection and computes the merge plan of a non resumed run.
	async fn fresh_start(
		&self,
		config: &BuildConfig,
		request: &MergeRequest,
		target_name: &str,
	) -> Result<MergeStart, Error> {
		if self.target.drop_collection(target_name).await? {
			debug!(%target_name, "Dropped previous target collection");
		}
		let target = self.target.create_collection(target_name).await?;

		// Root records from canonically keyed sources were inserted whole by the root phase
		let mut plan = vec![];
		for src_name in request.sources.as_ref().unwrap_or(&config.sources) {
			let meta = self.source_meta(src_name).await?;
			if !config.root_sources.contains(src_name) || meta.is_foreign_keyed() {
				plan.push(src_name.clone());
			}
		}

		debug!(?plan, "Merge plan computed");

		Ok(MergeStart {
			target,
			plan,
			next: 0,
			keys: None,
		})
	}
}

async fn append_line(path: &Path, line: &str) -> Result<(), FileIOError> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)
			.await
			.map_err(|e| FileIOError::from_std_io_err_with_msg(parent, e, "creating journal dir"))?;
	}

	let mut file = fs::OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.await
		.map_err(|e| FileIOError::from_std_io_err_with_msg(path, e, "opening build journal"))?;

	file.write_all(line.as_bytes())
		.await
		.map_err(|e| FileIOError::from_std_io_err(path, e))
}

fn to_value(meta: &BuildMeta) -> Result<serde_json::Value, Error> {
	serde_json::to_value(meta)
		.map_err(|e| Error::Backend(gh_core_backend::Error::InvalidDocument(e.to_string())))
}

async fn merge_partitioned(
	merge: PartitionMerge,
	partition_size: usize,
	task_system: &TaskSystem<Error>,
) -> Result<SourceMergeStats, Error> {
	let count = merge.source.count().await?;
	let partitions = partition_ranges(count, partition_size);

	debug!(count, partitions_count = partitions.len(), "Dispatching merge partitions");

	let handles = task_system
		.dispatch_many(partitions.iter().map(|range| {
			MergePartitionTask::new(PartitionMerge {
				range: Some(range.clone()),
				..merge.clone()
			})
		}))
		.await?;

	let mut stats = SourceMergeStats::default();
	let mut failure = None;

	for (range, res) in partitions.into_iter().zip(handles.join().await) {
		let reason = match res {
			Ok(TaskStatus::Done(TaskOutput::Out(out))) => match out.downcast::<SourceMergeStats>() {
				Ok(partition_stats) => {
					stats += *partition_stats;
					continue;
				}
				Err(_) => "unexpected task output".to_string(),
			},
			Ok(TaskStatus::Done(TaskOutput::Empty)) => "task returned an empty output".to_string(),
			Ok(TaskStatus::Error(e)) => e.to_string(),
			Ok(TaskStatus::Canceled) => "partition was canceled".to_string(),
			Ok(TaskStatus::Shutdown(_)) => "task system shutdown".to_string(),
			Err(e) => e.to_string(),
		};

		// Keep joining the other partitions, what they wrote stays written
		failure.get_or_insert(Error::WorkerFailure {
			src_name: merge.src_name.clone(),
			partition: range,
			reason,
		});
	}

	failure.map_or(Ok(stats), Err)
}
