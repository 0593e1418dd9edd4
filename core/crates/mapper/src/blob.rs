use std::{io::ErrorKind, path::Path};

use gh_core_backend::{DocumentBackend, Store};
use gh_utils::error::FileIOError;
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::{mapper::mapping_source, Error, IdentifierMapper};

impl IdentifierMapper {
	/// Persists the map as a MessagePack blob.
	pub async fn save(&self, path: &Path) -> Result<(), Error> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from_std_io_err(parent, e))?;
		}

		fs::write(path, rmp_serde::to_vec_named(self)?)
			.await
			.map_err(|e| FileIOError::from_std_io_err(path, e).into())
	}

	/// Loads a blob written by [`save`](Self::save), `None` if there is no blob at `path`.
	pub async fn load(path: &Path) -> Result<Option<Self>, Error> {
		match fs::read(path).await {
			Ok(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(FileIOError::from_std_io_err(path, e).into()),
		}
	}

	/// Reuses the blob at `path` when it was built from a mapping collection with the same
	/// amount of rows, otherwise builds the map again and refreshes the blob.
	#[instrument(skip(store, path), fields(blob = %path.display()), err)]
	pub async fn load_or_build(
		name: &str,
		store: &Store,
		collection: &str,
		canonical_attr: &str,
		path: &Path,
	) -> Result<Self, Error> {
		let source = mapping_source(name, store, collection).await?;
		let rows = source.count().await?;

		match Self::load(path).await {
			Ok(Some(cached)) if cached.name == name && cached.stats.rows_scanned == rows => {
				debug!(rows, "Reusing identifier map blob");
				return Ok(cached);
			}
			Ok(Some(_)) => debug!(rows, "Identifier map blob is stale, rebuilding"),
			Ok(None) => {}
			Err(e) => warn!(?e, "Ignoring unreadable identifier map blob"),
		}

		let mapper = Self::build_from(name, &*source, canonical_attr).await?;
		mapper.save(path).await?;

		Ok(mapper)
	}
}
