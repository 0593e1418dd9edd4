use std::{cmp::Ordering, fmt, sync::LazyLock};

use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;

use crate::{CohortTimestamp, Error};

const TOKEN_LEN: usize = 8;

static SNAPSHOT_NAME: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(?P<prefix>[\w-]+)_(?P<date>\d{8})_(?P<token>\w{8})$")
		.expect("snapshot name pattern is valid")
});

/// Name of a timestamped build output: `<prefix>_<YYYYMMDD>_<token>`.
///
/// Snapshots sort chronologically, ties broken by token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
	prefix: String,
	timestamp: CohortTimestamp,
	token: String,
}

impl SnapshotName {
	/// A new name with a random 8 character lowercase alphanumeric token. The prefix is kept as
	/// given so [`SnapshotName::parse_with_prefix`] finds it again.
	#[must_use]
	pub fn generate(prefix: &str, timestamp: CohortTimestamp) -> Self {
		let token = rand::thread_rng()
			.sample_iter(&Alphanumeric)
			.take(TOKEN_LEN)
			.map(|b| char::from(b).to_ascii_lowercase())
			.collect();

		Self {
			prefix: prefix.to_string(),
			timestamp,
			token,
		}
	}

	pub fn parse(name: &str) -> Result<Self, Error> {
		let captures = SNAPSHOT_NAME
			.captures(name)
			.ok_or_else(|| Error::InvalidSnapshotName(name.to_string()))?;

		Ok(Self {
			prefix: captures["prefix"].to_string(),
			timestamp: captures["date"].parse()?,
			token: captures["token"].to_string(),
		})
	}

	/// Parses `name` only if it is a snapshot of `prefix`.
	#[must_use]
	pub fn parse_with_prefix(prefix: &str, name: &str) -> Option<Self> {
		Self::parse(name).ok().filter(|snapshot| snapshot.prefix == prefix)
	}

	/// Name of the collection production reads from for `prefix`.
	#[must_use]
	pub fn live_name(prefix: &str) -> String {
		format!("{prefix}_current")
	}

	#[must_use]
	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	#[must_use]
	pub const fn timestamp(&self) -> CohortTimestamp {
		self.timestamp
	}

	#[must_use]
	pub fn token(&self) -> &str {
		&self.token
	}
}

impl fmt::Display for SnapshotName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}_{}_{}", self.prefix, self.timestamp, self.token)
	}
}

impl PartialOrd for SnapshotName {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for SnapshotName {
	fn cmp(&self, other: &Self) -> Ordering {
		self.timestamp
			.cmp(&other.timestamp)
			.then_with(|| self.token.cmp(&other.token))
			.then_with(|| self.prefix.cmp(&other.prefix))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_names_parse_back() {
		let ts = "20240315".parse().unwrap();
		let name = SnapshotName::generate("GeneDoc_my-gene", ts);

		assert_eq!(name.prefix(), "GeneDoc_my-gene");
		assert_eq!(name.token().len(), 8);
		assert!(name
			.token()
			.chars()
			.all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));

		assert_eq!(SnapshotName::parse(&name.to_string()).unwrap(), name);
		assert_eq!(
			SnapshotName::parse_with_prefix("GeneDoc_my-gene", &name.to_string()),
			Some(name)
		);
	}

	#[test]
	fn prefix_may_contain_underscores() {
		let name = SnapshotName::parse("genedoc_mygene_allspecies_20240101_abcd1234").unwrap();
		assert_eq!(name.prefix(), "genedoc_mygene_allspecies");
		assert_eq!(name.timestamp().to_string(), "20240101");

		assert!(SnapshotName::parse_with_prefix("genedoc_mygene", &name.to_string()).is_none());
	}

	#[test]
	fn rejects_other_names() {
		for name in [
			"genedoc_current",
			"genedoc_20240101_abc",
			"genedoc_20240101_abcd-234",
			"genedoc_20241301_abcd1234",
			"_20240101_abcd1234",
		] {
			assert!(SnapshotName::parse(name).is_err(), "{name}");
		}
	}

	#[test]
	fn tokens_are_any_word_characters() {
		let name = SnapshotName::parse("genedoc_20240101_AB_d1234").unwrap();
		assert_eq!(name.prefix(), "genedoc");
		assert_eq!(name.token(), "AB_d1234");
	}

	#[test]
	fn orders_chronologically() {
		let mut names = [
			"genedoc_20240301_aaaaaaaa",
			"genedoc_20231231_zzzzzzzz",
			"genedoc_20240301_0aaaaaaa",
		]
		.map(|name| SnapshotName::parse(name).unwrap());

		names.sort();

		assert_eq!(
			names.map(|name| name.to_string()),
			[
				"genedoc_20231231_zzzzzzzz",
				"genedoc_20240301_0aaaaaaa",
				"genedoc_20240301_aaaaaaaa",
			]
		);
	}
}
