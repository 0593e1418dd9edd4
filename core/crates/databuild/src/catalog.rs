use std::sync::Arc;

use gh_core_backend::{Backend, DocumentBackend, Store};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{from_document, to_document, Error};

/// Collection of the source store holding one [`SourceMeta`] per source.
pub const SRC_MASTER: &str = "src_master";

/// Metadata about one uploaded source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
	#[serde(rename = "_id")]
	pub name: String,
	/// Collection holding the source records, defaults to the source name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub collection: Option<String>,
	/// Set when the source is keyed by foreign identifiers, names the mapper to translate them.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_mapping_type: Option<String>,
	/// Search index mapping fragment contributed by this source.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub search_index_schema: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
}

impl SourceMeta {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Default::default()
		}
	}

	#[must_use]
	pub fn with_id_mapping_type(mut self, mapping_type: impl Into<String>) -> Self {
		self.id_mapping_type = Some(mapping_type.into());
		self
	}

	#[must_use]
	pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
		self.collection = Some(collection.into());
		self
	}

	#[must_use]
	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}

	#[must_use]
	pub fn with_search_index_schema(mut self, schema: Value) -> Self {
		self.search_index_schema = Some(schema);
		self
	}

	#[must_use]
	pub fn collection_name(&self) -> &str {
		self.collection.as_deref().unwrap_or(&self.name)
	}

	#[must_use]
	pub const fn is_foreign_keyed(&self) -> bool {
		self.id_mapping_type.is_some()
	}
}

/// Per-source metadata catalog, persisted in the [`SRC_MASTER`] collection.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
	backend: Arc<Backend>,
}

impl SourceCatalog {
	pub async fn open(store: &Store) -> Self {
		Self {
			backend: store.get_or_create(SRC_MASTER).await,
		}
	}

	/// Registers or replaces the metadata of a source.
	pub async fn register(&self, meta: SourceMeta) -> Result<(), Error> {
		let name = meta.name.clone();
		let doc = to_document(&meta)?;

		if !self.backend.replace(doc.clone()).await? {
			self.backend.insert(vec![doc]).await?;
		}

		debug!(source = %name, "Registered source metadata");

		Ok(())
	}

	pub async fn get(&self, name: &str) -> Result<Option<SourceMeta>, Error> {
		match self.backend.get(name).await {
			Ok(doc) => from_document(SRC_MASTER, doc).map(Some),
			Err(gh_core_backend::Error::NotFound { .. }) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Merges the search index schemas of the given sources into one mapping object.
	/// Properties declared by several sources keep the first declaration.
	pub async fn index_schema(&self, sources: &[String]) -> Result<Value, Error> {
		let mut schema = Map::new();

		for name in sources {
			let Some(meta) = self.get(name).await? else {
				return Err(Error::UnknownSource(vec![name.clone()]));
			};

			match meta.search_index_schema {
				Some(Value::Object(properties)) => {
					for (property, mapping) in properties {
						if schema.contains_key(&property) {
							warn!(source = %name, %property, "Search index property already declared, skipping");
						} else {
							schema.insert(property, mapping);
						}
					}
				}
				Some(other) => {
					warn!(source = %name, ?other, "Ignoring search index schema that is not an object");
				}
				None => {}
			}
		}

		Ok(Value::Object(schema))
	}
}
