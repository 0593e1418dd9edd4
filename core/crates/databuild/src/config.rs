use std::{collections::HashSet, sync::Arc};

use gh_core_backend::{Backend, DocumentBackend, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::{
	from_document,
	run::{BuildRun, BuildStatus},
	to_document, Error,
};

/// Collection of the source store holding every [`BuildConfig`].
pub const SRC_BUILD: &str = "src_build";

pub const DEFAULT_MAX_BUILD_HISTORY: usize = 10;

/// Which sources make a merged collection and which of them define its keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
	#[serde(rename = "_id")]
	pub id: String,
	pub name: String,
	pub sources: Vec<String>,
	pub root_sources: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub species_allow: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub species_deny: Option<Vec<String>>,
	/// Most recent runs last.
	#[serde(default)]
	pub history: Vec<BuildRun>,
}

impl BuildConfig {
	pub fn new<S: Into<String>>(
		name: impl Into<String>,
		sources: impl IntoIterator<Item = S>,
		root_sources: impl IntoIterator<Item = S>,
	) -> Self {
		let name = name.into();
		Self {
			id: name.clone(),
			name,
			sources: sources.into_iter().map(Into::into).collect(),
			root_sources: root_sources.into_iter().map(Into::into).collect(),
			species_allow: None,
			species_deny: None,
			history: vec![],
		}
	}

	#[must_use]
	pub fn with_species_allow<S: Into<String>>(mut self, species: impl IntoIterator<Item = S>) -> Self {
		self.species_allow = Some(species.into_iter().map(Into::into).collect());
		self
	}

	#[must_use]
	pub fn with_species_deny<S: Into<String>>(mut self, species: impl IntoIterator<Item = S>) -> Self {
		self.species_deny = Some(species.into_iter().map(Into::into).collect());
		self
	}

	/// Structural checks that need no store access.
	pub fn check(&self) -> Result<(), Error> {
		let invalid = |reason: &str| {
			Err(Error::Configuration {
				name: self.name.clone(),
				reason: reason.to_string(),
			})
		};

		if self.species_allow.is_some() && self.species_deny.is_some() {
			return invalid("species allow and deny lists are mutually exclusive");
		}

		if self.root_sources.is_empty() {
			return invalid("at least one root source is required");
		}

		if let Some(root) = self
			.root_sources
			.iter()
			.find(|root| !self.sources.contains(root))
		{
			return invalid(&format!("root source '{root}' is not listed in sources"));
		}

		Ok(())
	}

	#[must_use]
	pub fn latest_run(&self) -> Option<&BuildRun> {
		self.history.last()
	}

	pub(crate) fn latest_run_mut(&mut self) -> Option<&mut BuildRun> {
		self.history.last_mut()
	}

	pub(crate) fn species_filter(&self) -> SpeciesFilter {
		match (&self.species_allow, &self.species_deny) {
			(Some(allow), _) => SpeciesFilter::Allow(allow.iter().cloned().collect()),
			(None, Some(deny)) => SpeciesFilter::Deny(deny.iter().cloned().collect()),
			(None, None) => SpeciesFilter::All,
		}
	}
}

#[derive(Debug, Clone)]
pub(crate) enum SpeciesFilter {
	All,
	Allow(HashSet<String>),
	Deny(HashSet<String>),
}

impl SpeciesFilter {
	/// Records without a species attribute only pass when no allow list is set.
	pub(crate) fn accepts(&self, species: Option<&Value>) -> bool {
		let matches = |set: &HashSet<String>| {
			species.is_some_and(|value| species_ids(value).any(|id| set.contains(&id)))
		};

		match self {
			Self::All => true,
			Self::Allow(allow) => matches(allow),
			Self::Deny(deny) => !matches(deny),
		}
	}
}

fn species_ids(value: &Value) -> Box<dyn Iterator<Item = String> + '_> {
	match value {
		Value::String(id) => Box::new(std::iter::once(id.clone())),
		Value::Number(id) => Box::new(std::iter::once(id.to_string())),
		Value::Array(ids) => Box::new(ids.iter().flat_map(species_ids)),
		_ => Box::new(std::iter::empty()),
	}
}

/// Build configurations persisted in the [`SRC_BUILD`] collection, each carrying a bounded
/// history of its runs.
#[derive(Debug)]
pub struct BuildConfigStore {
	backend: Arc<Backend>,
	max_history: usize,
	// Serializes read-modify-write cycles on configs
	write_lock: Mutex<()>,
}

impl BuildConfigStore {
	pub async fn open(store: &Store, max_history: usize) -> Self {
		Self {
			backend: store.get_or_create(SRC_BUILD).await,
			max_history: max_history.max(1),
			write_lock: Mutex::new(()),
		}
	}

	pub async fn get(&self, name: &str) -> Result<BuildConfig, Error> {
		match self.backend.get(name).await {
			Ok(doc) => from_document(SRC_BUILD, doc),
			Err(gh_core_backend::Error::NotFound { .. }) => Err(Error::UnknownConfig(name.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	/// Creates or replaces a configuration.
	pub async fn save(&self, config: &BuildConfig) -> Result<(), Error> {
		let _guard = self.write_lock.lock().await;
		self.put(config).await
	}

	async fn put(&self, config: &BuildConfig) -> Result<(), Error> {
		let doc = to_document(config)?;
		if !self.backend.replace(doc.clone()).await? {
			self.backend.insert(vec![doc]).await?;
		}
		Ok(())
	}

	/// Appends a new run to the configuration history, refusing to start while another run of
	/// the same configuration is still building.
	#[instrument(skip(self, run), fields(target = %run.target_name), err)]
	pub async fn begin_run(&self, name: &str, run: BuildRun) -> Result<BuildConfig, Error> {
		let _guard = self.write_lock.lock().await;

		let mut config = self.get(name).await?;

		if config
			.latest_run()
			.is_some_and(|latest| latest.status == BuildStatus::Building)
		{
			return Err(Error::AlreadyBuilding(name.to_string()));
		}

		config.history.push(run);
		if config.history.len() > self.max_history {
			let evicted = config.history.len() - self.max_history;
			config.history.drain(..evicted);
			debug!(evicted, "Evicted old build runs from history");
		}

		self.put(&config).await?;

		Ok(config)
	}

	/// Applies `update` to the latest run and persists it.
	pub async fn update_run(
		&self,
		name: &str,
		update: impl FnOnce(&mut BuildRun) + Send,
	) -> Result<BuildRun, Error> {
		let _guard = self.write_lock.lock().await;

		let mut config = self.get(name).await?;

		let Some(run) = config.latest_run_mut() else {
			return Err(Error::Configuration {
				name: name.to_string(),
				reason: "no build run to update".to_string(),
			});
		};

		update(run);
		let run = run.clone();

		self.put(&config).await?;

		Ok(run)
	}

	pub async fn latest_run(&self, name: &str) -> Result<Option<BuildRun>, Error> {
		self.get(name)
			.await
			.map(|config| config.latest_run().cloned())
	}

	/// Marks a run left in `building` state by a dead process as failed, so a new run or a
	/// resume can start.
	pub async fn abort_run(&self, name: &str, reason: &str) -> Result<Option<BuildRun>, Error> {
		let latest = self.latest_run(name).await?;

		if !latest
			.as_ref()
			.is_some_and(|run| run.status == BuildStatus::Building)
		{
			return Ok(latest);
		}

		warn!(config = %name, %reason, "Aborting build run");

		self.update_run(name, |run| run.finish(Err(format!("aborted: {reason}"))))
			.await
			.map(Some)
	}
}
