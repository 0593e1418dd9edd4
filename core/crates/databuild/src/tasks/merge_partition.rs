use std::{
	collections::{BTreeMap, BTreeSet},
	ops::Range,
	sync::Arc,
};

use futures::TryStreamExt;
use gh_core_backend::{Attrs, Backend, DocId, Document, DocumentBackend};
use gh_core_mapper::IdentifierMapper;
use gh_task_system::{
	check_interruption, ExecStatus, Interrupter, IntoAnyTaskOutput, Task, TaskId,
};
use serde_json::Value;
use tracing::{instrument, trace, Level};

use crate::{run::SourceMergeStats, Error};

/// Merges one source, or one `[skip, skip + limit)` partition of it, into the target.
#[derive(Debug, Clone)]
pub struct PartitionMerge {
	pub src_name: String,
	pub source: Arc<Backend>,
	pub target: Arc<Backend>,
	pub keys: Arc<BTreeSet<DocId>>,
	pub mapper: Option<Arc<IdentifierMapper>>,
	pub range: Option<Range<usize>>,
	pub batch_size: usize,
	pub exclude_attrs: Arc<[String]>,
	pub dedup_lists: bool,
}

impl PartitionMerge {
	pub async fn run(&self) -> Result<SourceMergeStats, Error> {
		let mut stats = SourceMergeStats::default();

		let mut feeder = self.source.doc_feeder(self.range.clone(), self.batch_size);
		while let Some(batch) = feeder.try_next().await? {
			stats += self.merge_batch(batch).await?;
		}

		Ok(stats)
	}

	/// Records of one batch landing on the same canonical key are combined before a single
	/// partial update, keys outside the root universe are dropped.
	pub async fn merge_batch(&self, batch: Vec<Document>) -> Result<SourceMergeStats, Error> {
		let mut stats = SourceMergeStats {
			records: batch.len(),
			..Default::default()
		};

		let resolved = match &self.mapper {
			Some(mapper) => mapper.resolve_many(batch.iter().map(|doc| doc.id.as_str())),
			None => batch
				.iter()
				.map(|doc| BTreeSet::from([doc.id.clone()]))
				.collect(),
		};

		let mut combined = BTreeMap::<DocId, Attrs>::new();

		for (Document { mut attrs, .. }, canonical) in batch.into_iter().zip(resolved) {
			let in_scope = canonical
				.into_iter()
				.filter(|key| self.keys.contains(key))
				.collect::<Vec<_>>();

			if in_scope.is_empty() {
				stats.dropped += 1;
				continue;
			}

			for attr in self.exclude_attrs.iter() {
				attrs.remove(attr);
			}

			for key in in_scope {
				combine_attrs(
					combined.entry(key).or_default(),
					attrs.clone(),
					self.dedup_lists,
				);
			}
		}

		for (key, attrs) in combined {
			if self.target.partial_update(&key, attrs).await? {
				stats.updated += 1;
			}
		}

		trace!(src_name = %self.src_name, ?stats, "Merged batch");

		Ok(stats)
	}
}

/// Folds `incoming` into `existing`. Lists are concatenated, conflicting scalar values become a
/// list of both.
pub fn combine_attrs(existing: &mut Attrs, incoming: Attrs, dedup: bool) {
	for (attr, value) in incoming {
		match existing.get_mut(&attr) {
			None => {
				existing.insert(attr, value);
			}
			Some(current) if *current == value => {}
			Some(current) => {
				let mut members = match current.take() {
					Value::Array(members) => members,
					other => vec![other],
				};

				let incoming_members = match value {
					Value::Array(members) => members,
					other => vec![other],
				};

				for member in incoming_members {
					if !dedup || !members.contains(&member) {
						members.push(member);
					}
				}

				*current = Value::Array(members);
			}
		}
	}
}

#[derive(Debug)]
pub struct MergePartitionTask {
	id: TaskId,
	merge: PartitionMerge,
	stats: SourceMergeStats,
}

impl MergePartitionTask {
	#[must_use]
	pub fn new(merge: PartitionMerge) -> Self {
		Self {
			id: TaskId::new_v4(),
			merge,
			stats: SourceMergeStats::default(),
		}
	}
}

#[async_trait::async_trait]
impl Task<Error> for MergePartitionTask {
	fn id(&self) -> TaskId {
		self.id
	}

	#[instrument(
		skip_all,
		fields(
			task_id = %self.id,
			src_name = %self.merge.src_name,
			partition = ?self.merge.range,
		),
		ret(level = Level::TRACE),
		err,
	)]
	#[allow(clippy::blocks_in_conditions)] // Due to `err` on `instrument` macro above
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		let mut feeder = self
			.merge
			.source
			.doc_feeder(self.merge.range.clone(), self.merge.batch_size);

		while let Some(batch) = feeder.try_next().await? {
			check_interruption!(interrupter);

			self.stats += self.merge.merge_batch(batch).await?;
		}

		Ok(ExecStatus::Done(self.stats.into_output()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde_json::json;

	fn attrs(value: Value) -> Attrs {
		match value {
			Value::Object(map) => map,
			_ => unreachable!(),
		}
	}

	#[test]
	fn combines_lists_with_dedup() {
		let mut existing = attrs(json!({"go": ["GO:1"], "symbol": "CDK2"}));
		combine_attrs(
			&mut existing,
			attrs(json!({"go": ["GO:1", "GO:2"], "name": "kinase"})),
			true,
		);

		assert_eq!(
			Value::Object(existing),
			json!({"go": ["GO:1", "GO:2"], "symbol": "CDK2", "name": "kinase"})
		);
	}

	#[test]
	fn conflicting_scalars_become_lists() {
		let mut existing = attrs(json!({"symbol": "CDK2"}));
		combine_attrs(&mut existing, attrs(json!({"symbol": "CDK3"})), true);
		combine_attrs(&mut existing, attrs(json!({"symbol": "CDK2"})), true);

		assert_eq!(Value::Object(existing), json!({"symbol": ["CDK2", "CDK3"]}));
	}

	#[test]
	fn without_dedup_members_repeat() {
		let mut existing = attrs(json!({"go": ["GO:1"]}));
		combine_attrs(&mut existing, attrs(json!({"go": ["GO:1", "GO:2"]})), false);

		assert_eq!(Value::Object(existing), json!({"go": ["GO:1", "GO:1", "GO:2"]}));
	}
}
