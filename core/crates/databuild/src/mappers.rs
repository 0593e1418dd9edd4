use std::{collections::HashMap, path::PathBuf, sync::Arc};

use gh_core_backend::Store;
use gh_core_mapper::IdentifierMapper;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{catalog::SourceMeta, Error};

/// How to build the mapper of one `id_mapping_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSpec {
	pub collection: String,
	pub canonical_attr: String,
	/// Retired to current canonical key relation the mapped keys go through, as
	/// `(collection, canonical_attr)`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retirement: Option<(String, String)>,
	/// MessagePack cache of the built map.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub blob: Option<PathBuf>,
}

impl MappingSpec {
	pub fn new(collection: impl Into<String>, canonical_attr: impl Into<String>) -> Self {
		Self {
			collection: collection.into(),
			canonical_attr: canonical_attr.into(),
			retirement: None,
			blob: None,
		}
	}

	#[must_use]
	pub fn with_retirement(
		mut self,
		collection: impl Into<String>,
		canonical_attr: impl Into<String>,
	) -> Self {
		self.retirement = Some((collection.into(), canonical_attr.into()));
		self
	}

	#[must_use]
	pub fn with_blob(mut self, blob: impl Into<PathBuf>) -> Self {
		self.blob = Some(blob.into());
		self
	}

	pub(crate) async fn build(&self, name: &str, store: &Store) -> Result<IdentifierMapper, Error> {
		let mapper = if let Some(blob) = &self.blob {
			IdentifierMapper::load_or_build(name, store, &self.collection, &self.canonical_attr, blob)
				.await?
		} else {
			IdentifierMapper::build(name, store, &self.collection, &self.canonical_attr).await?
		};

		let Some((collection, canonical_attr)) = &self.retirement else {
			return Ok(mapper);
		};

		let retired = IdentifierMapper::build(
			&format!("{name}_retirement"),
			store,
			collection,
			canonical_attr,
		)
		.await?;

		Ok(mapper.with_retirement(&retired))
	}
}

/// Identifier mappers available to one merge run, keyed by `id_mapping_type`.
#[derive(Debug, Default, Clone)]
pub struct Mappers {
	available: HashMap<String, Arc<IdentifierMapper>>,
	/// Mapping types that couldn't be built, with the reason.
	missing: HashMap<String, String>,
}

impl Mappers {
	pub fn insert(&mut self, mapping_type: impl Into<String>, mapper: Arc<IdentifierMapper>) {
		let mapping_type = mapping_type.into();
		self.missing.remove(&mapping_type);
		self.available.insert(mapping_type, mapper);
	}

	pub(crate) fn mark_missing(&mut self, mapping_type: impl Into<String>, reason: impl Into<String>) {
		self.missing.insert(mapping_type.into(), reason.into());
	}

	#[must_use]
	pub fn get(&self, mapping_type: &str) -> Option<&Arc<IdentifierMapper>> {
		self.available.get(mapping_type)
	}

	#[must_use]
	pub fn contains(&self, mapping_type: &str) -> bool {
		self.available.contains_key(mapping_type) || self.missing.contains_key(mapping_type)
	}

	/// The mapper a source's keys go through, `None` for sources already keyed canonically.
	pub fn for_source(&self, meta: &SourceMeta) -> Result<Option<Arc<IdentifierMapper>>, Error> {
		let Some(mapping_type) = &meta.id_mapping_type else {
			return Ok(None);
		};

		self.available
			.get(mapping_type)
			.cloned()
			.map(Some)
			.ok_or_else(|| Error::MissingMapper {
				src_name: meta.name.clone(),
				mapping_type: mapping_type.clone(),
				reason: self
					.missing
					.get(mapping_type)
					.cloned()
					.unwrap_or_else(|| "no mapping registered".to_string()),
			})
	}

	/// Builds every mapper in `specs` not already available. Missing mapping collections are
	/// recorded instead of failing, the caller decides how fatal that is per source.
	pub(crate) async fn build_missing(
		&mut self,
		specs: &HashMap<String, MappingSpec>,
		needed: impl IntoIterator<Item = String>,
		store: &Store,
	) -> Result<(), Error> {
		for mapping_type in needed {
			if self.contains(&mapping_type) {
				continue;
			}

			let Some(spec) = specs.get(&mapping_type) else {
				self.mark_missing(mapping_type, "no mapping registered");
				continue;
			};

			match spec.build(&mapping_type, store).await {
				Ok(mapper) => {
					info!(%mapping_type, stats = ?mapper.stats(), "Identifier mapper ready");
					self.insert(mapping_type, Arc::new(mapper));
				}
				Err(Error::Mapper(e @ gh_core_mapper::Error::MappingIncomplete { .. })) => {
					warn!(%mapping_type, %e, "Identifier mapper unavailable");
					self.mark_missing(mapping_type, e.to_string());
				}
				Err(e) => return Err(e),
			}
		}

		Ok(())
	}
}
