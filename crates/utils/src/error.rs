use std::{io, path::Path};

use thiserror::Error;

/// An I/O failure tied to the file or directory it happened on.
#[derive(Error, Debug)]
#[error("file I/O error{} <path='{}'>: {source}", context_suffix(.context.as_deref()), .path.display())]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub context: Option<String>,
}

fn context_suffix(context: Option<&str>) -> String {
	context.map(|ctx| format!(" ({ctx})")).unwrap_or_default()
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			context: None,
		}
	}

	pub fn from_std_io_err_with_msg(
		path: impl AsRef<Path>,
		source: io::Error,
		msg: impl Into<String>,
	) -> Self {
		Self {
			context: Some(msg.into()),
			..Self::from_std_io_err(path, source)
		}
	}
}

/// Errors from reading or writing a JSON document on disk.
#[derive(Error, Debug)]
pub enum JsonFileError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to (de)serialize json file <path='{}'>: {source}", .path.display())]
	Serde {
		path: Box<Path>,
		#[source]
		source: serde_json::Error,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn context_shows_up_in_the_message() {
		let err = FileIOError::from_std_io_err_with_msg(
			"/data/genehub.json",
			io::Error::from(io::ErrorKind::PermissionDenied),
			"saving config",
		);

		let message = err.to_string();
		assert!(message.starts_with("file I/O error (saving config) <path='/data/genehub.json'>"));

		let bare = FileIOError::from_std_io_err("/data", io::Error::from(io::ErrorKind::NotFound));
		assert!(bare.to_string().starts_with("file I/O error <path='/data'>"));
	}
}
