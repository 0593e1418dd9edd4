use gh_core_backend::{Document, TIMESTAMP_ATTR};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delta::AttrDiff;

pub const DEFAULT_DIFF_BATCH_SIZE: usize = 10_000;

/// How attribute values are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
	#[default]
	Strict,
	/// Lists are compared as sets, at any depth.
	UnorderedLists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffOptions {
	pub compare: CompareMode,
	/// Attributes ignored on both sides.
	pub exclude_attrs: Vec<String>,
	/// Common keys compared per chunk.
	pub batch_size: usize,
	/// Compare whole documents and emit bare `{_id}` update entries.
	pub fast: bool,
}

impl Default for DiffOptions {
	fn default() -> Self {
		Self {
			compare: CompareMode::Strict,
			exclude_attrs: vec![TIMESTAMP_ATTR.to_string()],
			batch_size: DEFAULT_DIFF_BATCH_SIZE,
			fast: false,
		}
	}
}

impl DiffOptions {
	fn is_excluded(&self, attr: &str) -> bool {
		self.exclude_attrs.iter().any(|excluded| excluded == attr)
	}
}

#[must_use]
pub fn values_equal(a: &Value, b: &Value, mode: CompareMode) -> bool {
	match (a, b, mode) {
		(Value::Array(a), Value::Array(b), CompareMode::UnorderedLists) => {
			a.iter().all(|x| b.iter().any(|y| values_equal(x, y, mode)))
				&& b.iter().all(|y| a.iter().any(|x| values_equal(x, y, mode)))
		}
		(Value::Object(a), Value::Object(b), CompareMode::UnorderedLists) => {
			a.len() == b.len()
				&& a.iter().all(|(attr, x)| {
					b.get(attr).is_some_and(|y| values_equal(x, y, mode))
				})
		}
		_ => a == b,
	}
}

/// Attribute level difference turning `old` into `new`, `None` when nothing changed.
///
/// In fast mode documents are compared whole and the entry carries no attributes.
#[must_use]
pub fn diff_doc(old: &Document, new: &Document, options: &DiffOptions) -> Option<AttrDiff> {
	let mut diff = AttrDiff::new(new.id.clone());

	for (attr, new_value) in &new.attrs {
		if options.is_excluded(attr) {
			continue;
		}

		match old.attrs.get(attr) {
			None => {
				diff.add.insert(attr.clone(), new_value.clone());
			}
			Some(old_value) if !values_equal(old_value, new_value, options.compare) => {
				diff.update.insert(attr.clone(), new_value.clone());
			}
			Some(_) => {}
		}
	}

	diff.delete = old
		.attrs
		.keys()
		.filter(|attr| !options.is_excluded(attr) && !new.attrs.contains_key(*attr))
		.cloned()
		.collect();

	if diff.is_empty() {
		None
	} else if options.fast {
		Some(AttrDiff::bare(diff.id))
	} else {
		Some(diff)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;

	fn doc(value: Value) -> Document {
		Document::try_from(value).unwrap()
	}

	#[test]
	fn attribute_changes() {
		let old = doc(json!({"_id": "1", "a": 1, "b": 2, "gone": true, "_timestamp": "20240101"}));
		let new = doc(json!({"_id": "1", "a": 1, "b": 3, "c": 4, "_timestamp": "20240202"}));

		let diff = diff_doc(&old, &new, &DiffOptions::default()).unwrap();

		assert_eq!(diff.id, "1");
		assert_eq!(diff.add, json!({"c": 4}).as_object().unwrap().clone());
		assert_eq!(diff.update, json!({"b": 3}).as_object().unwrap().clone());
		assert_eq!(diff.delete, vec!["gone".to_string()]);
	}

	#[test]
	fn excluded_attributes_never_differ() {
		let old = doc(json!({"_id": "1", "a": 1, "_timestamp": "20240101"}));
		let new = doc(json!({"_id": "1", "a": 1}));

		assert!(diff_doc(&old, &new, &DiffOptions::default()).is_none());
	}

	#[test]
	fn unordered_lists() {
		let old = doc(json!({"_id": "1", "go": ["GO:1", "GO:2"], "x": [{"k": [1, 2]}]}));
		let new = doc(json!({"_id": "1", "go": ["GO:2", "GO:1"], "x": [{"k": [2, 1]}]}));

		assert!(diff_doc(&old, &new, &DiffOptions::default()).is_some());

		let unordered = DiffOptions {
			compare: CompareMode::UnorderedLists,
			..Default::default()
		};
		assert!(diff_doc(&old, &new, &unordered).is_none());

		let changed = doc(json!({"_id": "1", "go": ["GO:2"], "x": [{"k": [2, 1]}]}));
		assert!(diff_doc(&old, &changed, &unordered).is_some());
	}

	#[test]
	fn fast_mode_emits_bare_entries() {
		let old = doc(json!({"_id": "1", "a": 1}));
		let new = doc(json!({"_id": "1", "a": 2}));

		let fast = DiffOptions {
			fast: true,
			..Default::default()
		};
		let diff = diff_doc(&old, &new, &fast).unwrap();

		assert!(diff.is_bare());
		assert_eq!(diff.id, "1");
	}
}
