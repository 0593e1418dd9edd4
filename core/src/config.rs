use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
};

use gh_core_backend::BackendKind;
use gh_core_databuild::{BuildOptions, MappingSpec};
use gh_core_diff::DiffOptions;
use gh_core_sync::SyncOptions;
use gh_utils::{error::FileIOError, load_json, save_json};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::Error;

pub const CONFIG_FILE_NAME: &str = "genehub.json";

/// Bumped on every change to the persisted shape, older files are migrated on load.
const CONFIG_VERSION: u32 = 1;

/// Settings of one hub instance, persisted as `genehub.json` in its data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
	pub version: u32,
	pub data_dir: PathBuf,
	/// Default filter directive, `RUST_LOG` takes precedence.
	#[serde(default = "default_log_level")]
	pub log_level: String,
	/// Task system workers, one per core when unset.
	#[serde(default)]
	pub workers: Option<usize>,
	#[serde(default)]
	pub source_backend: BackendKind,
	#[serde(default)]
	pub target_backend: BackendKind,
	#[serde(default = "default_bulk_size")]
	pub bulk_size: usize,
	/// Identifier mappers by `id_mapping_type`.
	#[serde(default)]
	pub mappings: BTreeMap<String, MappingSpec>,
	#[serde(default)]
	pub build: BuildOptions,
	#[serde(default)]
	pub diff: DiffOptions,
	#[serde(default)]
	pub sync: SyncOptions,
}

fn default_log_level() -> String {
	"info".to_string()
}

const fn default_bulk_size() -> usize {
	gh_core_backend::DEFAULT_BULK_SIZE
}

impl HubConfig {
	#[must_use]
	pub fn default_with_dir(data_dir: impl Into<PathBuf>) -> Self {
		let data_dir = data_dir.into();

		Self {
			version: CONFIG_VERSION,
			log_level: default_log_level(),
			workers: None,
			source_backend: BackendKind::Memory,
			target_backend: BackendKind::Memory,
			bulk_size: default_bulk_size(),
			mappings: BTreeMap::new(),
			build: BuildOptions::default(),
			diff: DiffOptions::default(),
			sync: SyncOptions {
				archive_dir: Some(data_dir.join("deltas")),
				..Default::default()
			},
			data_dir,
		}
	}

	/// Loads the config of `data_dir`, writing a default one when there is none.
	pub async fn load_from(data_dir: impl AsRef<Path> + Send) -> Result<Self, Error> {
		let data_dir = data_dir.as_ref();
		let path = data_dir.join(CONFIG_FILE_NAME);

		let Some(mut config) = load_json::<Self>(&path).await? else {
			warn!(path = %path.display(), "No config found, creating default");
			let config = Self::default_with_dir(data_dir);
			config.save().await?;
			return Ok(config);
		};

		if config.version > CONFIG_VERSION {
			return Err(Error::UnsupportedConfigVersion {
				path: path.into(),
				found: config.version,
				supported: CONFIG_VERSION,
			});
		}

		// The directory may have moved since the file was written
		config.data_dir = data_dir.to_path_buf();

		if config.version < CONFIG_VERSION {
			info!(
				from = config.version,
				to = CONFIG_VERSION,
				"Migrating config"
			);
			config.version = CONFIG_VERSION;
			config.save().await?;
		}

		Ok(config)
	}

	pub async fn save(&self) -> Result<(), Error> {
		let path = self.data_dir.join(CONFIG_FILE_NAME);
		save_json(&path, self).await?;

		info!(path = %path.display(), "Saved config");

		Ok(())
	}

	#[must_use]
	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	#[must_use]
	pub fn backups_dir(&self) -> PathBuf {
		self.data_dir.join("backups")
	}

	pub async fn ensure_directories(&self) -> Result<(), Error> {
		let mut dirs = vec![self.data_dir.clone(), self.logs_dir(), self.backups_dir()];
		dirs.extend(self.sync.archive_dir.clone());

		for dir in dirs {
			fs::create_dir_all(&dir)
				.await
				.map_err(|e| FileIOError::from_std_io_err_with_msg(&dir, e, "creating hub directory"))?;
		}

		Ok(())
	}
}
