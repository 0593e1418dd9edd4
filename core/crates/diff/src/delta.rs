use std::{collections::BTreeSet, fmt, path::Path};

use gh_core_backend::{Attrs, CohortTimestamp, DocId};
use gh_utils::{load_json, save_json};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Error;

/// Changes of one document.
///
/// Full entries always carry `add`, `update` and `delete`, even empty. Bare entries, emitted by
/// fast diffs, only carry `_id`: the whole document must be reindexed from the new collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AttrDiffEntry", into = "AttrDiffEntry")]
pub struct AttrDiff {
	pub id: DocId,
	pub add: Attrs,
	pub update: Attrs,
	pub delete: Vec<String>,
	bare: bool,
}

/// Serialized shape of an [`AttrDiff`].
#[derive(Serialize, Deserialize)]
struct AttrDiffEntry {
	#[serde(rename = "_id")]
	id: DocId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	add: Option<Attrs>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	update: Option<Attrs>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	delete: Option<Vec<String>>,
}

impl From<AttrDiffEntry> for AttrDiff {
	fn from(entry: AttrDiffEntry) -> Self {
		let bare = entry.add.is_none() && entry.update.is_none() && entry.delete.is_none();

		Self {
			id: entry.id,
			add: entry.add.unwrap_or_default(),
			update: entry.update.unwrap_or_default(),
			delete: entry.delete.unwrap_or_default(),
			bare,
		}
	}
}

impl From<AttrDiff> for AttrDiffEntry {
	fn from(diff: AttrDiff) -> Self {
		if diff.bare {
			return Self {
				id: diff.id,
				add: None,
				update: None,
				delete: None,
			};
		}

		Self {
			id: diff.id,
			add: Some(diff.add),
			update: Some(diff.update),
			delete: Some(diff.delete),
		}
	}
}

impl AttrDiff {
	/// An empty full entry, attributes are filled in by the caller.
	#[must_use]
	pub fn new(id: impl Into<DocId>) -> Self {
		Self {
			id: id.into(),
			..Default::default()
		}
	}

	/// An entry asking for the whole document to be reindexed.
	#[must_use]
	pub fn bare(id: impl Into<DocId>) -> Self {
		Self {
			id: id.into(),
			bare: true,
			..Default::default()
		}
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
	}

	#[must_use]
	pub const fn is_bare(&self) -> bool {
		self.bare
	}

	/// Attributes to set on the live document, added ones first.
	#[must_use]
	pub fn set_attrs(&self) -> Attrs {
		self.add
			.iter()
			.chain(&self.update)
			.map(|(attr, value)| (attr.clone(), value.clone()))
			.collect()
	}
}

/// Everything needed to turn one collection into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSet {
	/// Name of the new collection.
	pub source: String,
	pub timestamp: CohortTimestamp,
	/// Sorted.
	pub add: Vec<DocId>,
	/// Sorted.
	pub delete: Vec<DocId>,
	pub update: Vec<AttrDiff>,
}

impl DeltaSet {
	#[must_use]
	pub fn new(source: impl Into<String>, timestamp: CohortTimestamp) -> Self {
		Self {
			source: source.into(),
			timestamp,
			add: vec![],
			delete: vec![],
			update: vec![],
		}
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.add.is_empty() && self.delete.is_empty() && self.update.is_empty()
	}

	pub fn updated_ids(&self) -> impl Iterator<Item = &DocId> {
		self.update.iter().map(|diff| &diff.id)
	}

	/// Keys that end up stamped with this delta's timestamp once applied.
	#[must_use]
	pub fn touched_ids(&self) -> BTreeSet<DocId> {
		self.add.iter().chain(self.updated_ids()).cloned().collect()
	}

	#[must_use]
	pub fn stats(&self) -> DeltaStats {
		let mut stats = DeltaStats {
			add: self.add.len(),
			delete: self.delete.len(),
			update: self.update.len(),
			..Default::default()
		};

		for diff in &self.update {
			if diff.is_bare() {
				stats.bare_updates += 1;
			}
			stats.added_attrs.extend(diff.add.keys().cloned());
			stats.updated_attrs.extend(diff.update.keys().cloned());
			stats.deleted_attrs.extend(diff.delete.iter().cloned());
		}

		stats
	}

	pub async fn save(&self, path: impl AsRef<Path> + Send) -> Result<(), Error> {
		save_json(path, self).await.map_err(Into::into)
	}

	/// `None` when there is no file at `path`.
	pub async fn load(path: impl AsRef<Path> + Send) -> Result<Option<Self>, Error> {
		load_json(path).await.map_err(Into::into)
	}
}

/// Summary of a [`DeltaSet`], logged before it is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaStats {
	pub add: usize,
	pub delete: usize,
	pub update: usize,
	pub bare_updates: usize,
	pub added_attrs: BTreeSet<String>,
	pub updated_attrs: BTreeSet<String>,
	pub deleted_attrs: BTreeSet<String>,
}

impl DeltaStats {
	pub fn log(&self, delta: &DeltaSet) {
		info!(
			source = %delta.source,
			timestamp = %delta.timestamp,
			add = self.add,
			delete = self.delete,
			update = self.update,
			"Delta summary"
		);

		for (kind, attrs) in [
			("add", &self.added_attrs),
			("update", &self.updated_attrs),
			("delete", &self.deleted_attrs),
		] {
			if !attrs.is_empty() {
				info!("\t{kind}: {} {}", attrs.len(), attrs.iter().join(", "));
			}
		}
	}
}

impl fmt::Display for DeltaStats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"DeltaStats <add={}, delete={}, update={}, bare_updates={}>",
			self.add, self.delete, self.update, self.bare_updates
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;

	#[test]
	fn full_entries_keep_empty_sections() {
		let mut diff = AttrDiff::new("1017");
		diff.delete.push("go".to_string());

		assert_eq!(
			serde_json::to_value(&diff).unwrap(),
			json!({"_id": "1017", "add": {}, "update": {}, "delete": ["go"]})
		);

		let bare = AttrDiff::bare("1018");
		assert_eq!(serde_json::to_value(&bare).unwrap(), json!({"_id": "1018"}));

		let read: Vec<AttrDiff> = serde_json::from_value(json!([
			{"_id": "1017", "add": {}, "update": {"a": 1}, "delete": []},
			{"_id": "1018"},
		]))
		.unwrap();
		assert!(!read[0].is_bare());
		assert_eq!(read[0].update.get("a"), Some(&json!(1)));
		assert!(read[1].is_bare());
	}
}
