use std::collections::{BTreeSet, HashMap};

use futures::TryStreamExt;
use gh_core_backend::{DocId, DocumentBackend, Store, DEFAULT_STEP};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperStats {
	pub rows_scanned: usize,
	/// Rows without a usable canonical key attribute.
	pub rows_skipped: usize,
	pub foreign_keys: usize,
	pub canonical_keys: usize,
	/// Foreign keys mapped to more than one canonical key.
	pub one_to_many: usize,
}

/// Bidirectional relation between one foreign identifier space and the canonical one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifierMapper {
	pub(crate) name: String,
	forward: HashMap<DocId, BTreeSet<DocId>>,
	reverse: HashMap<DocId, BTreeSet<DocId>>,
	pub(crate) stats: MapperStats,
}

impl IdentifierMapper {
	/// Builds the mapper from the `collection` of `store`, where each row is
	/// `{_id: foreign_key, <canonical_attr>: key | [key, ...]}`.
	pub async fn build(
		name: &str,
		store: &Store,
		collection: &str,
		canonical_attr: &str,
	) -> Result<Self, Error> {
		let source = mapping_source(name, store, collection).await?;

		Self::build_from(name, &*source, canonical_attr).await
	}

	#[instrument(skip(source), fields(collection = source.name()), err)]
	pub async fn build_from(
		name: &str,
		source: &dyn DocumentBackend,
		canonical_attr: &str,
	) -> Result<Self, Error> {
		let mut pairs = Vec::new();
		let mut rows_scanned = 0;
		let mut rows_skipped = 0;

		let mut feeder = source.doc_feeder(None, DEFAULT_STEP);
		while let Some(batch) = feeder.try_next().await? {
			for doc in batch {
				rows_scanned += 1;

				let keys = doc.get(canonical_attr).map(canonical_keys).unwrap_or_default();
				if keys.is_empty() {
					rows_skipped += 1;
					continue;
				}

				pairs.extend(keys.into_iter().map(|key| (doc.id.clone(), key)));
			}
		}

		let mut mapper = Self::from_pairs(name, pairs);
		mapper.stats.rows_scanned = rows_scanned;
		mapper.stats.rows_skipped = rows_skipped;

		info!(stats = ?mapper.stats, "Identifier map built");

		Ok(mapper)
	}

	pub fn from_pairs(
		name: impl Into<String>,
		pairs: impl IntoIterator<Item = (DocId, DocId)>,
	) -> Self {
		let mut forward = HashMap::<_, BTreeSet<_>>::new();
		for (foreign, canonical) in pairs {
			forward.entry(foreign).or_default().insert(canonical);
		}

		Self::from_forward(name.into(), forward, MapperStats::default())
	}

	fn from_forward(
		name: String,
		forward: HashMap<DocId, BTreeSet<DocId>>,
		stats: MapperStats,
	) -> Self {
		let mut reverse = HashMap::<_, BTreeSet<_>>::new();
		for (foreign, canonicals) in &forward {
			for canonical in canonicals {
				reverse
					.entry(canonical.clone())
					.or_default()
					.insert(foreign.clone());
			}
		}

		let stats = MapperStats {
			foreign_keys: forward.len(),
			canonical_keys: reverse.len(),
			one_to_many: forward.values().filter(|keys| keys.len() > 1).count(),
			..stats
		};

		Self {
			name,
			forward,
			reverse,
			stats,
		}
	}

	/// Translates every canonical key through `retired`, a retired to current relation.
	/// Canonical keys `retired` doesn't know about are deprecated and dropped, along with
	/// foreign keys left without any mapping.
	#[must_use]
	pub fn with_retirement(self, retired: &Self) -> Self {
		let forward = self
			.forward
			.into_iter()
			.filter_map(|(foreign, canonicals)| {
				let current = canonicals
					.iter()
					.filter_map(|canonical| retired.translate(canonical))
					.flatten()
					.cloned()
					.collect::<BTreeSet<_>>();

				(!current.is_empty()).then_some((foreign, current))
			})
			.collect();

		Self::from_forward(self.name, forward, self.stats)
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub const fn stats(&self) -> MapperStats {
		self.stats
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.forward.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.forward.is_empty()
	}

	/// Mapped canonical keys only, `None` when `foreign` has no mapping.
	#[must_use]
	pub fn translate(&self, foreign: &str) -> Option<&BTreeSet<DocId>> {
		self.forward.get(foreign)
	}

	/// Mapped canonical keys, or `{foreign}` itself when unmapped.
	#[must_use]
	pub fn resolve(&self, foreign: &str) -> BTreeSet<DocId> {
		self.translate(foreign)
			.cloned()
			.unwrap_or_else(|| BTreeSet::from([foreign.to_string()]))
	}

	/// Batch form of [`resolve`](Self::resolve), results keep the input order.
	pub fn resolve_many<'k>(
		&self,
		foreign_keys: impl IntoIterator<Item = &'k str>,
	) -> Vec<BTreeSet<DocId>> {
		foreign_keys.into_iter().map(|key| self.resolve(key)).collect()
	}

	/// Foreign keys of a canonical key, or `{canonical}` itself for orphans.
	#[must_use]
	pub fn reverse(&self, canonical: &str) -> BTreeSet<DocId> {
		self.reverse
			.get(canonical)
			.cloned()
			.unwrap_or_else(|| BTreeSet::from([canonical.to_string()]))
	}
}

pub(crate) async fn mapping_source(
	name: &str,
	store: &Store,
	collection: &str,
) -> Result<std::sync::Arc<gh_core_backend::Backend>, Error> {
	store.collection(collection).await.map_err(|e| match e {
		gh_core_backend::Error::UnknownCollection(_) => Error::MappingIncomplete {
			mapper: name.to_string(),
			collection: collection.to_string(),
		},
		e => e.into(),
	})
}

fn canonical_keys(value: &Value) -> Vec<DocId> {
	match value {
		Value::String(key) => vec![key.clone()],
		Value::Number(key) => vec![key.to_string()],
		Value::Array(keys) => keys.iter().flat_map(canonical_keys).collect(),
		_ => vec![],
	}
}
