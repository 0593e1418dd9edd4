use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::Error;

/// Canonical or source-local record key. Integer-like keys are kept as their decimal string.
pub type DocId = String;

/// Top-level attributes of a record, everything besides `_id`.
pub type Attrs = Map<String, Value>;

pub const ID_ATTR: &str = "_id";

/// Attribute stamped on every live record with the cohort that last touched it.
pub const TIMESTAMP_ATTR: &str = "_timestamp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
	#[serde(rename = "_id")]
	pub id: DocId,
	#[serde(flatten)]
	pub attrs: Attrs,
}

impl Document {
	pub fn new(id: impl Into<DocId>, attrs: Attrs) -> Self {
		Self {
			id: id.into(),
			attrs,
		}
	}

	#[must_use]
	pub fn with_attr(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
		self.attrs.insert(attr.into(), value.into());
		self
	}

	#[must_use]
	pub fn get(&self, attr: &str) -> Option<&Value> {
		self.attrs.get(attr)
	}

	/// The cohort timestamp stamped on this record, if any and if well formed.
	#[must_use]
	pub fn timestamp(&self) -> Option<CohortTimestamp> {
		self.attrs
			.get(TIMESTAMP_ATTR)
			.and_then(Value::as_str)
			.and_then(|s| s.parse().ok())
	}

	pub fn set_timestamp(&mut self, timestamp: CohortTimestamp) {
		self.attrs
			.insert(TIMESTAMP_ATTR.to_string(), timestamp.to_string().into());
	}

	#[must_use]
	pub fn into_value(self) -> Value {
		let mut map = self.attrs;
		map.insert(ID_ATTR.to_string(), Value::String(self.id));
		Value::Object(map)
	}
}

impl TryFrom<Value> for Document {
	type Error = Error;

	/// Accepts `{"_id": ..., ...}` objects, where `_id` is either a string or an integer.
	fn try_from(value: Value) -> Result<Self, Self::Error> {
		let Value::Object(mut attrs) = value else {
			return Err(Error::InvalidDocument(format!("expected an object, got: {value}")));
		};

		let id = match attrs.remove(ID_ATTR) {
			Some(Value::String(id)) => id,
			Some(Value::Number(n)) => n.to_string(),
			Some(other) => {
				return Err(Error::InvalidDocument(format!(
					"unsupported `_id` type: {other}"
				)))
			}
			None => return Err(Error::InvalidDocument("missing `_id` attribute".to_string())),
		};

		Ok(Self { id, attrs })
	}
}

/// A calendar date marking the build cohort of a snapshot and of the live records it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CohortTimestamp(NaiveDate);

impl CohortTimestamp {
	pub const FORMAT: &'static str = "%Y%m%d";

	#[must_use]
	pub const fn new(date: NaiveDate) -> Self {
		Self(date)
	}

	#[must_use]
	pub fn today() -> Self {
		Self(Utc::now().date_naive())
	}

	/// Lower bound used when a live collection has no stamped record yet.
	#[must_use]
	pub fn epoch() -> Self {
		Self(DateTime::UNIX_EPOCH.date_naive())
	}

	#[must_use]
	pub const fn date(&self) -> NaiveDate {
		self.0
	}
}

impl From<NaiveDate> for CohortTimestamp {
	fn from(date: NaiveDate) -> Self {
		Self(date)
	}
}

impl FromStr for CohortTimestamp {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
			return Err(Error::InvalidTimestamp(s.to_string()));
		}

		NaiveDate::parse_from_str(s, Self::FORMAT)
			.map(Self)
			.map_err(|_| Error::InvalidTimestamp(s.to_string()))
	}
}

impl fmt::Display for CohortTimestamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.format(Self::FORMAT))
	}
}

impl Serialize for CohortTimestamp {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for CohortTimestamp {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}
