#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::{io::ErrorKind, ops::Range, path::Path};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

pub mod error;

use error::{FileIOError, JsonFileError};

/// Splits `0..total` into consecutive ranges of at most `size` items.
///
/// A `size` of zero is treated as one.
#[must_use]
pub fn partition_ranges(total: usize, size: usize) -> Vec<Range<usize>> {
	let size = size.max(1);

	(0..total)
		.step_by(size)
		.map(|start| start..(start + size).min(total))
		.collect()
}

/// Reads and deserializes a JSON file, returning `None` if it doesn't exist.
pub async fn load_json<T: DeserializeOwned>(
	path: impl AsRef<Path>,
) -> Result<Option<T>, JsonFileError> {
	let path = path.as_ref();

	match fs::read(path).await {
		Ok(bytes) => serde_json::from_slice(&bytes)
			.map(Some)
			.map_err(|source| JsonFileError::Serde {
				path: path.into(),
				source,
			}),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
		Err(e) => Err(FileIOError::from_std_io_err(path, e).into()),
	}
}

/// Serializes a value as pretty JSON and writes it to `path`, creating parent directories.
pub async fn save_json<T: Serialize + Sync>(
	path: impl AsRef<Path>,
	value: &T,
) -> Result<(), JsonFileError> {
	let path = path.as_ref();

	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)
			.await
			.map_err(|e| FileIOError::from_std_io_err_with_msg(parent, e, "creating parent dir"))?;
	}

	let bytes = serde_json::to_vec_pretty(value).map_err(|source| JsonFileError::Serde {
		path: path.into(),
		source,
	})?;

	fs::write(path, bytes)
		.await
		.map_err(|e| FileIOError::from_std_io_err(path, e).into())
}
